//! Provider ID encoding: `hcloud:///<zone>/<server id>`.
//!
//! The zone segment is percent-encoded; the server ID is the numeric
//! Hetzner server ID.

use std::fmt;
use std::str::FromStr;

use url::Url;

pub const SCHEME: &str = "hcloud";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderIdError {
    #[error("provider ID {0:?} is malformed: {1}")]
    Malformed(String, String),

    #[error("provider ID {0:?} uses an unsupported scheme (expected {SCHEME})")]
    UnsupportedScheme(String),

    #[error("provider ID {0:?} must contain a zone and a server ID")]
    MissingPathComponent(String),

    #[error("provider ID {0:?} contains an invalid server ID {1:?}")]
    InvalidServerId(String, String),
}

/// Decoded provider ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderId {
    pub zone: String,
    pub server_id: i64,
}

impl ProviderId {
    pub fn new(zone: impl Into<String>, server_id: i64) -> Self {
        Self {
            zone: zone.into(),
            server_id,
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{SCHEME}:///{}/{}",
            urlencoding::encode(&self.zone),
            self.server_id
        )
    }
}

impl FromStr for ProviderId {
    type Err = ProviderIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode(s)
    }
}

pub fn encode(zone: &str, server_id: i64) -> String {
    ProviderId::new(zone, server_id).to_string()
}

pub fn decode(provider_id: &str) -> Result<ProviderId, ProviderIdError> {
    let url = Url::parse(provider_id)
        .map_err(|e| ProviderIdError::Malformed(provider_id.to_string(), e.to_string()))?;

    if url.scheme() != SCHEME {
        return Err(ProviderIdError::UnsupportedScheme(provider_id.to_string()));
    }

    // Everything after the zone belongs to the server ID, so `a/b/c`
    // fails as an invalid ID rather than being silently truncated.
    let path = url.path().strip_prefix('/').unwrap_or(url.path());
    let (zone, server_id) = match path.split_once('/') {
        Some((zone, server_id)) if !zone.is_empty() && !server_id.is_empty() => (zone, server_id),
        _ => return Err(ProviderIdError::MissingPathComponent(provider_id.to_string())),
    };

    let zone = urlencoding::decode(zone)
        .map_err(|e| ProviderIdError::Malformed(provider_id.to_string(), e.to_string()))?;

    let server_id = server_id
        .parse::<i64>()
        .ok()
        .filter(|id| *id >= 0)
        .ok_or_else(|| {
            ProviderIdError::InvalidServerId(provider_id.to_string(), server_id.to_string())
        })?;

    Ok(ProviderId::new(zone.into_owned(), server_id))
}
