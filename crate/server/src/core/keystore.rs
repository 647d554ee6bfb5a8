//! The keystore maps each key label to its certificate chain and to a
//! reference to its private key.
//!
//! It is serialized as JSON into a local file, mirrored to the object store
//! after every mutation and restored from the object store at startup.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc, time::Duration};

use hsm_signer_interfaces::{InterfaceError, ObjectStore};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    config::SnapshotLocation,
    error::SignerError,
    result::{SResult, SResultHelper},
};

/// Where the private key of an entry lives
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum KeyReference {
    /// A private key object of the HSM, found by its label
    Hsm { label: String },
    /// A software private key, as a PKCS#8 PEM encrypted with the keystore password
    Software { encrypted_private_key: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct KeyStoreEntry {
    /// PEM certificates, leaf first
    pub certificate_chain: Vec<String>,
    pub key: KeyReference,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct KeyStore {
    entries: BTreeMap<String, KeyStoreEntry>,
}

impl KeyStore {
    pub(crate) fn contains(&self, label: &str) -> bool {
        self.entries.contains_key(label)
    }

    pub(crate) fn entry(&self, label: &str) -> Option<&KeyStoreEntry> {
        self.entries.get(label)
    }

    /// Add an entry; an existing label is never overwritten
    pub(crate) fn insert(&mut self, label: String, entry: KeyStoreEntry) -> SResult<()> {
        if self.entries.contains_key(&label) {
            return Err(SignerError::LabelExists(label));
        }
        self.entries.insert(label, entry);
        Ok(())
    }

    pub(crate) fn remove(&mut self, label: &str) -> Option<KeyStoreEntry> {
        self.entries.remove(label)
    }

    /// The labels, in lexicographic order
    pub(crate) fn labels(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Reads and writes the keystore file and its object store snapshot
pub(crate) struct KeyStoreSnapshot {
    object_store: Arc<dyn ObjectStore>,
    location: SnapshotLocation,
    local_file: PathBuf,
    timeout: Duration,
}

impl KeyStoreSnapshot {
    pub(crate) fn new(
        object_store: Arc<dyn ObjectStore>,
        location: SnapshotLocation,
        local_file: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            object_store,
            location,
            local_file,
            timeout,
        }
    }

    /// Restore the keystore from the object store.
    ///
    /// A missing or unreadable snapshot yields an empty keystore.
    pub(crate) async fn load(&self) -> KeyStore {
        let SnapshotLocation {
            bucket,
            key,
            region,
        } = &self.location;
        let bytes = match timeout(self.timeout, self.object_store.get(key, bucket, region)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(InterfaceError::NotFound(e))) => {
                info!("no keystore snapshot in {bucket}/{key} ({e}), starting with an empty keystore");
                return KeyStore::default();
            }
            Ok(Err(e)) => {
                warn!("failed to download the keystore snapshot {bucket}/{key}: {e}; starting with an empty keystore");
                return KeyStore::default();
            }
            Err(_) => {
                warn!("timeout downloading the keystore snapshot {bucket}/{key}; starting with an empty keystore");
                return KeyStore::default();
            }
        };
        let keystore: KeyStore = match serde_json::from_slice(&bytes) {
            Ok(keystore) => keystore,
            Err(e) => {
                warn!("the keystore snapshot {bucket}/{key} is unreadable: {e}; starting with an empty keystore");
                return KeyStore::default();
            }
        };
        if let Err(e) = tokio::fs::write(&self.local_file, &bytes).await {
            warn!(
                "failed to write the keystore file {}: {e}",
                self.local_file.display()
            );
        }
        info!(
            "loaded {} keystore entries from {bucket}/{key}",
            keystore.len()
        );
        keystore
    }

    /// Write the keystore to the local file, then upload the file to the object store
    pub(crate) async fn save(&self, keystore: &KeyStore) -> SResult<()> {
        let bytes = serde_json::to_vec_pretty(keystore)
            .context("failed to serialize the keystore")?;
        tokio::fs::write(&self.local_file, &bytes)
            .await
            .with_context(|| {
                format!(
                    "failed to write the keystore file {}",
                    self.local_file.display()
                )
            })?;
        let SnapshotLocation {
            bucket,
            key,
            region,
        } = &self.location;
        timeout(
            self.timeout,
            self.object_store.put(key, bucket, region, bytes),
        )
        .await
        .map_err(|_| {
            SignerError::Timeout(format!("uploading the keystore snapshot {bucket}/{key}"))
        })??;
        debug!("keystore saved to {bucket}/{key}");
        Ok(())
    }
}

#[expect(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use hsm_signer_interfaces::ObjectStore;
    use tempfile::TempDir;

    use super::*;
    use crate::services::FileObjectStore;

    fn location() -> SnapshotLocation {
        SnapshotLocation {
            bucket: "keystore-cluster-1".to_owned(),
            key: "KeyStoreHSM".to_owned(),
            region: "eu-west-3".to_owned(),
        }
    }

    fn entry(label: &str) -> KeyStoreEntry {
        KeyStoreEntry {
            certificate_chain: vec!["-----BEGIN CERTIFICATE-----".to_owned()],
            key: KeyReference::Hsm {
                label: label.to_owned(),
            },
        }
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FileObjectStore::new(dir.path().join("objects")));
        let snapshot = KeyStoreSnapshot::new(
            store.clone(),
            location(),
            dir.path().join("KeyStoreHSM"),
            Duration::from_secs(5),
        );

        // nothing uploaded yet
        assert_eq!(snapshot.load().await, KeyStore::default());

        let mut keystore = KeyStore::default();
        keystore.insert("b".to_owned(), entry("b")).unwrap();
        keystore.insert("a".to_owned(), entry("a")).unwrap();
        assert!(matches!(
            keystore.insert("a".to_owned(), entry("other")),
            Err(SignerError::LabelExists(_))
        ));
        snapshot.save(&keystore).await.unwrap();
        assert!(dir.path().join("KeyStoreHSM").exists());

        let other_file = dir.path().join("restored");
        let restored = KeyStoreSnapshot::new(store, location(), other_file.clone(), Duration::from_secs(5))
            .load()
            .await;
        assert_eq!(restored, keystore);
        assert_eq!(restored.labels(), vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(restored.entry("a"), Some(&entry("a")));
        assert!(other_file.exists());
    }

    #[tokio::test]
    async fn test_unreadable_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileObjectStore::new(dir.path().to_owned()));
        store
            .put("KeyStoreHSM", "keystore-cluster-1", "eu-west-3", b"not json".to_vec())
            .await
            .unwrap();
        let snapshot = KeyStoreSnapshot::new(
            store,
            location(),
            dir.path().join("KeyStoreHSM"),
            Duration::from_secs(5),
        );
        assert_eq!(snapshot.load().await.len(), 0);
    }
}
