use std::sync::Arc;

use hsm_signer_base_hsm::HsmSession;
use hsm_signer_crypto::{
    certificate::{CertificateData, issue_self_signed},
    keys::{KeyPairHandle, Signer, SoftwareSigner},
};
use hsm_signer_interfaces::{InterfaceError, public_key_label};
use openssl::x509::X509;
use time::OffsetDateTime;
use tokio::{sync::Mutex, task::spawn_blocking};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::{
    cache::ExpiringCache,
    keystore::{KeyReference, KeyStore, KeyStoreEntry, KeyStoreSnapshot},
};
use crate::{
    error::SignerError,
    result::{SResult, SResultHelper},
    signer_ensure,
};

/// Resolves key labels to key pairs and creates new key pairs
pub(crate) struct KeyManager {
    session: Arc<HsmSession>,
    /// Held for the whole creation of a key so that a label is only created once
    keystore: Mutex<KeyStore>,
    snapshot: KeyStoreSnapshot,
    cache: Arc<ExpiringCache<String, KeyPairHandle>>,
    key_size_bits: u32,
    allow_software_fallback: bool,
}

impl KeyManager {
    pub(crate) fn new(
        session: Arc<HsmSession>,
        keystore: KeyStore,
        snapshot: KeyStoreSnapshot,
        cache: Arc<ExpiringCache<String, KeyPairHandle>>,
        key_size_bits: u32,
        allow_software_fallback: bool,
    ) -> Self {
        Self {
            session,
            keystore: Mutex::new(keystore),
            snapshot,
            cache,
            key_size_bits,
            allow_software_fallback,
        }
    }

    /// The key pair stored under `label`, from the cache when possible.
    ///
    /// A label absent from the keystore is an `ItemNotFound` error and
    /// leaves the cache untouched.
    pub(crate) async fn resolve(&self, label: &str) -> SResult<KeyPairHandle> {
        let label = label.to_owned();
        if let Some(key_pair) = self.cache.get(&label).await {
            debug!("key {label}: cache hit");
            return Ok(key_pair);
        }
        let entry = self
            .keystore
            .lock()
            .await
            .entry(&label)
            .cloned()
            .ok_or_else(|| SignerError::ItemNotFound(format!("no key with the label {label}")))?;

        let certificate = entry.certificate_chain.first().with_context(|| {
            format!("the keystore entry {label} has no certificate")
        })?;
        let public_key = X509::from_pem(certificate.as_bytes())?.public_key()?;
        let private_key: Arc<dyn Signer> = match entry.key {
            KeyReference::Hsm { label: hsm_label } => {
                let provider = self.session.provider()?;
                spawn_blocking(move || provider.private_key(&hsm_label))
                    .await??
                    .ok_or_else(|| {
                        SignerError::CryptographicError(format!(
                            "the HSM holds no private key for {label}"
                        ))
                    })?
            }
            KeyReference::Software {
                encrypted_private_key,
            } => {
                let password = Zeroizing::new(self.session.keystore_password()?.to_owned());
                Arc::new(
                    spawn_blocking(move || {
                        SoftwareSigner::from_encrypted_pkcs8_pem(
                            encrypted_private_key.as_bytes(),
                            &password,
                        )
                    })
                    .await??,
                )
            }
        };
        let key_pair = KeyPairHandle::new(label.clone(), public_key, private_key);
        self.cache.put(label.clone(), key_pair.clone()).await;
        debug!(
            "key {label}: loaded from the keystore ({} cached keys)",
            self.cache.len().await
        );
        Ok(key_pair)
    }

    /// Drop the cached key pair of `label`, which is resolved again on next use
    pub(crate) async fn evict(&self, label: &str) {
        if self.cache.remove(&label.to_owned()).await.is_some() {
            debug!("key {label}: evicted from the cache");
        }
    }

    #[cfg(test)]
    pub(crate) async fn cached_keys(&self) -> usize {
        self.cache.len().await
    }

    /// Generate a key pair under `label`, issue its self-signed certificate
    /// and persist the keystore.
    ///
    /// Returns the confirmation message.
    pub(crate) async fn create_key(&self, label: &str, data: CertificateData) -> SResult<String> {
        signer_ensure!(
            !label.trim().is_empty(),
            SignerError::InvalidRequest("the key label is missing".to_owned())
        );
        data.validate()?;

        let mut keystore = self.keystore.lock().await;
        if keystore.contains(label) {
            return Err(SignerError::LabelExists(label.to_owned()));
        }

        let (key_pair, key) = self.generate_key_pair(label).await?;
        if let Err(e) = self
            .store_key_pair(&mut keystore, label, &key_pair, key, data)
            .await
        {
            if !key_pair.is_software_key() {
                self.destroy_hsm_key_pair(label).await;
            }
            return Err(e);
        }
        drop(keystore);

        let software_key = key_pair.is_software_key();
        self.cache.put(label.to_owned(), key_pair).await;

        let mut confirmation = format!(
            "Created a key pair with the labels {label}, {}",
            public_key_label(label)
        );
        if software_key {
            confirmation.push_str(" (software key: the HSM provider is unavailable)");
        }
        info!("{confirmation}");
        Ok(confirmation)
    }

    /// Issue the certificate of `key_pair` and persist it under `label`.
    ///
    /// On failure the keystore is left without the entry.
    async fn store_key_pair(
        &self,
        keystore: &mut KeyStore,
        label: &str,
        key_pair: &KeyPairHandle,
        key: KeyReference,
        data: CertificateData,
    ) -> SResult<()> {
        let certificate = {
            let key_pair = key_pair.clone();
            spawn_blocking(move || {
                issue_self_signed(
                    key_pair.public_key(),
                    key_pair.private_key(),
                    &data,
                    OffsetDateTime::now_utc(),
                )
            })
            .await??
        };
        let certificate_pem = String::from_utf8(certificate.to_pem()?)
            .context("the certificate PEM is not UTF-8")?;

        keystore.insert(
            label.to_owned(),
            KeyStoreEntry {
                certificate_chain: vec![certificate_pem],
                key,
            },
        )?;
        if let Err(e) = self.snapshot.save(keystore).await {
            keystore.remove(label);
            return Err(e);
        }
        Ok(())
    }

    /// Delete a key pair whose keystore entry could not be stored
    async fn destroy_hsm_key_pair(&self, label: &str) {
        let provider = match self.session.provider() {
            Ok(provider) => provider,
            Err(e) => {
                warn!("key {label}: cannot delete the HSM key pair: {e}");
                return;
            }
        };
        let hsm_label = label.to_owned();
        match spawn_blocking(move || provider.destroy_key_pair(&hsm_label)).await {
            Ok(Ok(())) => info!("key {label}: HSM key pair deleted after a failed creation"),
            Ok(Err(e)) => warn!("key {label}: failed to delete the HSM key pair: {e}"),
            Err(e) => warn!("key {label}: failed to delete the HSM key pair: {e}"),
        }
    }

    async fn generate_key_pair(&self, label: &str) -> SResult<(KeyPairHandle, KeyReference)> {
        let provider = self.session.provider()?;
        let bits = self.key_size_bits;
        let hsm_label = label.to_owned();
        match spawn_blocking(move || provider.generate_rsa_key_pair(&hsm_label, bits)).await? {
            Ok(key_pair) => Ok((
                key_pair,
                KeyReference::Hsm {
                    label: label.to_owned(),
                },
            )),
            Err(InterfaceError::ProviderUnavailable(e)) if self.allow_software_fallback => {
                warn!(
                    "the HSM provider is unavailable ({e}): generating the key {label} in \
                     software"
                );
                self.generate_software_key_pair(label).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn generate_software_key_pair(
        &self,
        label: &str,
    ) -> SResult<(KeyPairHandle, KeyReference)> {
        let password = Zeroizing::new(self.session.keystore_password()?.to_owned());
        let bits = self.key_size_bits;
        let (signer, pem) = spawn_blocking(move || {
            let signer = SoftwareSigner::generate_rsa(bits)?;
            let pem = signer.to_encrypted_pkcs8_pem(&password)?;
            Ok::<_, SignerError>((signer, pem))
        })
        .await??;
        let encrypted_private_key =
            String::from_utf8(pem.to_vec()).context("the private key PEM is not UTF-8")?;
        let public_key = signer.public_key()?;
        Ok((
            KeyPairHandle::new(label.to_owned(), public_key, Arc::new(signer)),
            KeyReference::Software {
                encrypted_private_key,
            },
        ))
    }

    pub(crate) async fn list_labels(&self) -> Vec<String> {
        self.keystore.lock().await.labels()
    }
}
