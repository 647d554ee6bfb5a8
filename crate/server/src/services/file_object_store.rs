use std::{io::ErrorKind, path::PathBuf};

use async_trait::async_trait;
use hsm_signer_interfaces::{InterfaceError, InterfaceResult, ObjectStore};
use tracing::{debug, trace};

/// An object store keeping each object in `<root>/<bucket>/<key>`.
///
/// The region is ignored.
#[derive(Debug, Clone)]
pub struct FileObjectStore {
    root: PathBuf,
}

impl FileObjectStore {
    #[must_use]
    pub const fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path(&self, key: &str, bucket: &str) -> InterfaceResult<PathBuf> {
        for name in [key, bucket] {
            if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
                return Err(InterfaceError::InvalidRequest(format!(
                    "invalid object store name: '{name}'"
                )));
            }
        }
        Ok(self.root.join(bucket).join(key))
    }
}

fn dependency_error(action: &str, path: &std::path::Path, e: &std::io::Error) -> InterfaceError {
    InterfaceError::Dependency(format!("failed to {action} {}: {e}", path.display()))
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn get(&self, key: &str, bucket: &str, region: &str) -> InterfaceResult<Vec<u8>> {
        let path = self.path(key, bucket)?;
        trace!("get {} ({region})", path.display());
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                InterfaceError::NotFound(format!("no object {bucket}/{key}"))
            } else {
                dependency_error("read", &path, &e)
            }
        })
    }

    async fn put(
        &self,
        key: &str,
        bucket: &str,
        region: &str,
        bytes: Vec<u8>,
    ) -> InterfaceResult<()> {
        let path = self.path(key, bucket)?;
        let bucket_dir = self.root.join(bucket);
        tokio::fs::create_dir_all(&bucket_dir)
            .await
            .map_err(|e| dependency_error("create", &bucket_dir, &e))?;
        // replace the object atomically
        let staging = bucket_dir.join(format!(".{key}.tmp"));
        tokio::fs::write(&staging, &bytes)
            .await
            .map_err(|e| dependency_error("write", &staging, &e))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| dependency_error("rename", &staging, &e))?;
        debug!("put {} bytes to {} ({region})", bytes.len(), path.display());
        Ok(())
    }
}

#[expect(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_get_put() {
        let dir = TempDir::new().unwrap();
        let store = FileObjectStore::new(dir.path().to_owned());
        assert!(matches!(
            store.get("KeyStoreHSM", "keystore-c1", "r").await,
            Err(InterfaceError::NotFound(_))
        ));
        store
            .put("KeyStoreHSM", "keystore-c1", "r", b"v1".to_vec())
            .await
            .unwrap();
        store
            .put("KeyStoreHSM", "keystore-c1", "r", b"v2".to_vec())
            .await
            .unwrap();
        assert_eq!(
            store.get("KeyStoreHSM", "keystore-c1", "r").await.unwrap(),
            b"v2".to_vec()
        );
        assert!(matches!(
            store.get("../etc", "keystore-c1", "r").await,
            Err(InterfaceError::InvalidRequest(_))
        ));
    }
}
