//! In-memory doubles of the HSM and of its external dependencies,
//! used by the tests of this crate and of the server.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use hsm_signer_crypto::{
    CryptoResult,
    keys::{DigestAlgorithm, KeyAlgorithm, KeyPairHandle, Signer, SoftwareSigner},
};
use hsm_signer_interfaces::{
    HsmConnector, HsmCredentials, HsmDirectory, HsmProvider, InterfaceError, InterfaceResult,
    SecretStore, public_key_label,
};

/// JSON payload of the credentials secret
#[must_use]
pub fn credentials_secret(user: &str, password: &str) -> String {
    format!(r#"{{"HSM_USER":"{user}","HSM_PASSWORD":"{password}"}}"#)
}

/// A software key posing as an HSM key object
struct MemorySigner(SoftwareSigner);

impl fmt::Debug for MemorySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MemorySigner")
    }
}

impl Signer for MemorySigner {
    fn key_algorithm(&self) -> KeyAlgorithm {
        self.0.key_algorithm()
    }

    fn sign(&self, digest: DigestAlgorithm, data: &[u8]) -> CryptoResult<Vec<u8>> {
        self.0.sign(digest, data)
    }

    fn is_hardware_backed(&self) -> bool {
        true
    }
}

/// An HSM keeping its keys in process memory.
///
/// Calls are counted so that tests can observe round-trips to the HSM.
#[derive(Default)]
pub struct MemoryHsm {
    keys: Mutex<HashMap<String, Arc<dyn Signer>>>,
    unavailable: AtomicBool,
    generate_calls: AtomicUsize,
    private_key_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
    logout_calls: AtomicUsize,
}

impl MemoryHsm {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make key generation fail with `ProviderUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn private_key_calls(&self) -> usize {
        self.private_key_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    /// Labels of the key objects, public keys included
    pub fn labels(&self) -> Vec<String> {
        let Ok(keys) = self.keys.lock() else {
            return vec![];
        };
        let mut labels: Vec<String> = keys
            .keys()
            .flat_map(|label| [label.clone(), public_key_label(label)])
            .collect();
        labels.sort();
        labels
    }
}

impl HsmProvider for MemoryHsm {
    fn name(&self) -> &str {
        "memory"
    }

    fn generate_rsa_key_pair(&self, label: &str, bits: u32) -> InterfaceResult<KeyPairHandle> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(InterfaceError::ProviderUnavailable(
                "the memory HSM is switched off".to_owned(),
            ));
        }
        let mut keys = self
            .keys
            .lock()
            .map_err(|e| InterfaceError::Hsm(e.to_string()))?;
        if keys.contains_key(label) {
            return Err(InterfaceError::LabelExists(label.to_owned()));
        }
        let software = SoftwareSigner::generate_rsa(bits)?;
        let public_key = software.public_key()?;
        let signer: Arc<dyn Signer> = Arc::new(MemorySigner(software));
        keys.insert(label.to_owned(), signer.clone());
        Ok(KeyPairHandle::new(label.to_owned(), public_key, signer))
    }

    fn private_key(&self, label: &str) -> InterfaceResult<Option<Arc<dyn Signer>>> {
        self.private_key_calls.fetch_add(1, Ordering::SeqCst);
        let keys = self
            .keys
            .lock()
            .map_err(|e| InterfaceError::Hsm(e.to_string()))?;
        Ok(keys.get(label).cloned())
    }

    fn destroy_key_pair(&self, label: &str) -> InterfaceResult<()> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        self.keys
            .lock()
            .map_err(|e| InterfaceError::Hsm(e.to_string()))?
            .remove(label);
        Ok(())
    }

    fn logout(&self) -> InterfaceResult<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Logs into a [`MemoryHsm`] when presented the expected credentials
pub struct MemoryConnector {
    pub hsm: Arc<MemoryHsm>,
    user: String,
    password: String,
}

impl MemoryConnector {
    #[must_use]
    pub fn new(hsm: Arc<MemoryHsm>, user: &str, password: &str) -> Self {
        Self {
            hsm,
            user: user.to_owned(),
            password: password.to_owned(),
        }
    }
}

impl HsmConnector for MemoryConnector {
    fn connect(
        &self,
        _partition: &str,
        credentials: &HsmCredentials,
    ) -> InterfaceResult<Arc<dyn HsmProvider>> {
        if credentials.user != self.user || credentials.password.as_str() != self.password {
            return Err(InterfaceError::AuthenticationFailed(format!(
                "invalid password for {}",
                credentials.user
            )));
        }
        Ok(self.hsm.clone())
    }
}

/// A directory answering with a fixed address, or failing when there is none
pub struct FixedDirectory(pub Option<String>);

#[async_trait]
impl HsmDirectory for FixedDirectory {
    async fn locate(&self, cluster_id: &str, _region: &str) -> InterfaceResult<String> {
        self.0
            .clone()
            .ok_or_else(|| InterfaceError::NotFound(format!("the cluster {cluster_id} has no HSM")))
    }
}

/// A secret store holding a single secret, or failing when there is none
pub struct FixedSecretStore(pub Option<String>);

#[async_trait]
impl SecretStore for FixedSecretStore {
    async fn credentials(&self, cluster_id: &str, _region: &str) -> InterfaceResult<String> {
        self.0.clone().ok_or_else(|| {
            InterfaceError::Dependency(format!("no credentials for the cluster {cluster_id}"))
        })
    }
}
