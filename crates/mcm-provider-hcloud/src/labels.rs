//! Labels tagging every resource this driver creates, so it can be found
//! and attributed again later.

use std::collections::HashMap;

use crate::spec::ProviderSpec;

pub const CLUSTER: &str = "mcm.gardener.cloud/cluster";
pub const ROLE: &str = "mcm.gardener.cloud/role";
pub const REGION: &str = "topology.kubernetes.io/region";
pub const ZONE: &str = "topology.kubernetes.io/zone";
pub const FLOATING_POOL: &str = "networking.hcloud.mcm.gardener.cloud/floating-pool";

pub const NODE_ROLE: &str = "node";

/// `hel1-dc2` -> `hel1`.
pub fn region_from_zone(zone: &str) -> &str {
    zone.split_once('-').map_or(zone, |(region, _)| region)
}

pub fn server_labels(spec: &ProviderSpec) -> HashMap<String, String> {
    HashMap::from([
        (CLUSTER.to_string(), spec.cluster.clone()),
        (ROLE.to_string(), NODE_ROLE.to_string()),
        (REGION.to_string(), region_from_zone(&spec.zone).to_string()),
        (ZONE.to_string(), spec.zone.clone()),
    ])
}

pub fn floating_ip_labels(spec: &ProviderSpec, pool: &str) -> HashMap<String, String> {
    HashMap::from([
        (CLUSTER.to_string(), spec.cluster.clone()),
        (FLOATING_POOL.to_string(), pool.to_string()),
    ])
}

/// Whether a server carries exactly the ownership labels `spec` would give it.
pub fn is_owned_by(labels: &HashMap<String, String>, spec: &ProviderSpec) -> bool {
    server_labels(spec)
        .iter()
        .all(|(key, expected)| labels.get(key) == Some(expected))
}

/// Label selector matching every node server of `spec`'s cluster and zone.
pub fn node_selector(spec: &ProviderSpec) -> String {
    format!(
        "{CLUSTER}={},{ROLE}={NODE_ROLE},{ZONE}={}",
        spec.cluster, spec.zone
    )
}

pub fn floating_ip_name(pool: &str, machine: &str) -> String {
    format!("{pool}-{machine}-ipv4")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::tests::valid_spec;

    #[test]
    fn test_region_is_zone_prefix() {
        assert_eq!(region_from_zone("hel1-dc2"), "hel1");
        assert_eq!(region_from_zone("fsn1-dc14-extra"), "fsn1");
        assert_eq!(region_from_zone("nbg1"), "nbg1");
    }

    #[test]
    fn test_server_labels_record_ownership() {
        let labels = server_labels(&valid_spec());
        assert_eq!(labels[CLUSTER], "xyz");
        assert_eq!(labels[ROLE], "node");
        assert_eq!(labels[REGION], "hel1");
        assert_eq!(labels[ZONE], "hel1-dc2");
        assert!(is_owned_by(&labels, &valid_spec()));
    }

    #[test]
    fn test_foreign_labels_are_not_owned() {
        let spec = valid_spec();
        let mut labels = server_labels(&spec);
        labels.insert(CLUSTER.into(), "other".into());
        assert!(!is_owned_by(&labels, &spec));

        labels = server_labels(&spec);
        labels.remove(REGION);
        assert!(!is_owned_by(&labels, &spec));

        assert!(!is_owned_by(&HashMap::new(), &spec));
    }

    #[test]
    fn test_node_selector() {
        assert_eq!(
            node_selector(&valid_spec()),
            "mcm.gardener.cloud/cluster=xyz,mcm.gardener.cloud/role=node,topology.kubernetes.io/zone=hel1-dc2"
        );
    }

    #[test]
    fn test_floating_ip_name() {
        assert_eq!(floating_ip_name("pool", "machine-1"), "pool-machine-1-ipv4");
    }
}
