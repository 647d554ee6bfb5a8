use async_trait::async_trait;
use hsm_signer_interfaces::{HsmDirectory, InterfaceError, InterfaceResult};
use tracing::debug;

/// A directory answering with the HSM address set in the configuration
#[derive(Debug, Clone)]
pub struct StaticDirectory {
    address: Option<String>,
}

impl StaticDirectory {
    #[must_use]
    pub const fn new(address: Option<String>) -> Self {
        Self { address }
    }
}

#[async_trait]
impl HsmDirectory for StaticDirectory {
    async fn locate(&self, cluster_id: &str, region: &str) -> InterfaceResult<String> {
        let address = self
            .address
            .as_deref()
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .ok_or_else(|| {
                InterfaceError::NotFound(format!(
                    "no HSM address is configured for the cluster {cluster_id} in {region}"
                ))
            })?;
        debug!("cluster {cluster_id}: HSM at {address}");
        Ok(address.to_owned())
    }
}
