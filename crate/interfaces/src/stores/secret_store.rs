use async_trait::async_trait;

use crate::InterfaceResult;

/// Name of the secret holding the HSM credentials of a cluster
#[must_use]
pub fn credentials_secret_name(cluster_id: &str) -> String {
    format!("CloudHSM/{cluster_id}/credentials")
}

/// Secret store holding the HSM login credentials
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the credentials of the HSM cluster.
    ///
    /// The payload is opaque to the store: a JSON document, see
    /// [`crate::HsmCredentials::from_secret`].
    /// # Arguments
    /// * `cluster_id` - the identifier of the HSM cluster
    /// * `region` - the region hosting the secret
    /// # Errors
    /// * `InterfaceError::NotFound` if the secret does not exist
    /// * `InterfaceError::Dependency` if the store cannot be reached
    async fn credentials(&self, cluster_id: &str, region: &str) -> InterfaceResult<String>;
}
