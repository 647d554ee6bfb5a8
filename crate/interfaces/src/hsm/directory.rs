use async_trait::async_trait;

use crate::InterfaceResult;

/// Directory service publishing the network location of the HSMs of a cluster
#[async_trait]
pub trait HsmDirectory: Send + Sync {
    /// Locate a reachable HSM of the cluster.
    /// # Arguments
    /// * `cluster_id` - the identifier of the HSM cluster
    /// * `region` - the region hosting the cluster
    /// # Returns
    /// * `InterfaceResult<String>` - the network address (IP) of the first HSM of the cluster
    /// # Errors
    /// * `InterfaceError::Dependency` if the directory cannot be queried
    /// * `InterfaceError::NotFound` if the cluster has no HSM
    async fn locate(&self, cluster_id: &str, region: &str) -> InterfaceResult<String>;
}
