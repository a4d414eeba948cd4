//! Machine lifecycle driver for Hetzner Cloud.
//!
//! Translates create, delete, status and list requests of the machine
//! controller manager into Hetzner Cloud API calls. Every server carries
//! labels recording the cluster, role, region and zone it belongs to, and is
//! addressed afterwards through a provider ID of the form
//! `hcloud:///<zone>/<server id>`.

pub mod api;
pub mod cloud;
mod create;
pub mod driver;
pub mod error;
pub mod hetzner;
pub mod labels;
pub mod provider_id;
pub mod registry;
pub mod rollback;
pub mod spec;
pub mod types;
pub mod waiter;

#[cfg(test)]
mod testing;

use async_trait::async_trait;

pub use api::CloudApi;
pub use driver::HcloudDriver;
pub use error::{Code, Result, Status};
pub use hetzner::HetznerCloud;
pub use provider_id::ProviderId;
pub use registry::ClientRegistry;
pub use spec::ProviderSpec;
pub use types::*;
pub use waiter::ActionWaiter;

/// The machine lifecycle operations a provider answers.
///
/// Calls are independent; cancelling one means dropping its future, which
/// also stops any action polling in progress.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Provision a server for a machine that has no provider ID yet.
    ///
    /// Partially created resources are removed again on failure.
    async fn create_machine(&self, req: &CreateMachineRequest) -> Result<CreateMachineResponse>;

    /// Remove the machine's server. Succeeds when it is already gone.
    async fn delete_machine(&self, req: &DeleteMachineRequest) -> Result<DeleteMachineResponse>;

    /// Fails with [`Code::NotFound`] when the server does not exist.
    async fn get_machine_status(&self, req: &GetMachineStatusRequest) -> Result<GetMachineStatusResponse>;

    /// All node servers of the class's cluster and zone, keyed by provider ID.
    async fn list_machines(&self, req: &ListMachinesRequest) -> Result<ListMachinesResponse>;

    async fn get_volume_ids(&self, req: &GetVolumeIdsRequest) -> Result<GetVolumeIdsResponse>;

    async fn initialize_machine(&self, req: &InitializeMachineRequest) -> Result<InitializeMachineResponse>;

    async fn generate_machine_class_for_migration(
        &self,
        req: &GenerateMachineClassForMigrationRequest,
    ) -> Result<GenerateMachineClassForMigrationResponse>;
}
