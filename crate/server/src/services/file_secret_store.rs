use std::{io::ErrorKind, path::PathBuf};

use async_trait::async_trait;
use hsm_signer_interfaces::{
    InterfaceError, InterfaceResult, SecretStore, credentials_secret_name,
};
use tracing::debug;

/// Secrets stored as files named after the secret, under a root directory:
/// the credentials of a cluster are read from `<root>/CloudHSM/<cluster id>/credentials`
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    root: PathBuf,
}

impl FileSecretStore {
    #[must_use]
    pub const fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn credentials(&self, cluster_id: &str, _region: &str) -> InterfaceResult<String> {
        let path = self.root.join(credentials_secret_name(cluster_id));
        debug!("reading the secret {}", path.display());
        tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                InterfaceError::NotFound(format!("no secret at {}", path.display()))
            } else {
                InterfaceError::Dependency(format!(
                    "failed to read the secret {}: {e}",
                    path.display()
                ))
            }
        })
    }
}

#[expect(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_credentials() {
        let dir = TempDir::new().unwrap();
        let secret_dir = dir.path().join("CloudHSM").join("cluster-1");
        std::fs::create_dir_all(&secret_dir).unwrap();
        std::fs::write(
            secret_dir.join("credentials"),
            r#"{"HSM_USER":"crypto_user","HSM_PASSWORD":"secret"}"#,
        )
        .unwrap();

        let store = FileSecretStore::new(dir.path().to_owned());
        let secret = store.credentials("cluster-1", "us-east-1").await.unwrap();
        assert!(secret.contains("crypto_user"));
        assert!(matches!(
            store.credentials("cluster-2", "us-east-1").await,
            Err(InterfaceError::NotFound(_))
        ));
    }
}
