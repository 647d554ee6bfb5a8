use std::sync::Arc;

use hsm_signer_base_hsm::HsmSession;
use hsm_signer_crypto::{
    CryptoError,
    certificate::CertificateData,
    xmldsig::{EmbeddedKeySelector, sign_document, validate_document},
};
use hsm_signer_interfaces::ObjectStore;
use tokio::{sync::Mutex, task::spawn_blocking, time::timeout};
use tracing::{debug, trace};

use super::{
    cache::{ExpiringCache, SweeperHandle},
    key_manager::KeyManager,
    keystore::KeyStoreSnapshot,
};
use crate::{config::ServerParams, error::SignerError, result::SResult, signer_ensure};

/// The XML signing authority: resolves key labels to HSM key pairs and
/// signs or validates XML documents with them.
pub struct HsmSigner {
    /// The server parameters are built from the configuration file or command line arguments.
    pub(crate) params: Arc<ServerParams>,

    pub(crate) session: Arc<HsmSession>,

    keys: KeyManager,

    /// Cancelled on shutdown
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl HsmSigner {
    /// Instantiate the signer on top of an authenticated HSM session.
    ///
    /// The keystore is restored from the object store and the cache sweeper
    /// is started.
    pub(crate) async fn instantiate(
        params: Arc<ServerParams>,
        session: Arc<HsmSession>,
        object_store: Arc<dyn ObjectStore>,
    ) -> SResult<Self> {
        trace!("params: {params:?}");
        let snapshot = KeyStoreSnapshot::new(
            object_store,
            params.snapshot.clone(),
            params.keystore_file.clone(),
            params.dependency_timeout,
        );
        let keystore = snapshot.load().await;

        let cache = Arc::new(ExpiringCache::new(params.cache.capacity, params.cache.ttl));
        let sweeper = cache.spawn_sweeper(params.cache.sweep_interval);

        let keys = KeyManager::new(
            session.clone(),
            keystore,
            snapshot,
            cache,
            params.key_size_bits,
            params.allow_software_fallback,
        );
        Ok(Self {
            params,
            session,
            keys,
            sweeper: Mutex::new(sweeper),
        })
    }

    /// Sign `xml` with an enveloped signature made with the key `label`
    pub(crate) async fn sign(&self, xml: String, label: &str) -> SResult<String> {
        let key_pair = self.keys.resolve(label).await?;
        let signing = spawn_blocking(move || sign_document(&xml, &key_pair));
        let signed = timeout(self.params.signing_timeout, signing)
            .await
            .map_err(|_| {
                SignerError::Timeout(format!(
                    "signing with {label} took more than {:?}",
                    self.params.signing_timeout
                ))
            })??;
        match signed {
            Ok(signed) => {
                debug!("signed a document with {label}");
                Ok(signed)
            }
            Err(e @ CryptoError::Signing(_)) => {
                // the key handle may no longer be valid
                self.keys.evict(label).await;
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Validate the first signature of `xml` against the public key it embeds
    pub(crate) async fn validate(&self, xml: String) -> SResult<bool> {
        signer_ensure!(
            !xml.trim().is_empty(),
            SignerError::InvalidRequest("You did not sent XML file for validation.".to_owned())
        );
        Ok(spawn_blocking(move || validate_document(&xml, &EmbeddedKeySelector)).await??)
    }

    pub(crate) async fn create_key(&self, label: &str, data: CertificateData) -> SResult<String> {
        self.keys.create_key(label, data).await
    }

    pub(crate) async fn list_labels(&self) -> Vec<String> {
        self.keys.list_labels().await
    }

    #[cfg(test)]
    pub(crate) async fn cached_keys(&self) -> usize {
        self.keys.cached_keys().await
    }

    /// Stop the cache sweeper; calling it again is a no-op
    pub(crate) async fn shutdown(&self) {
        if let Some(sweeper) = self.sweeper.lock().await.take() {
            sweeper.stop().await;
        }
    }
}
