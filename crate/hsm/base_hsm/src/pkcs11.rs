//! PKCS#11 implementation of the HSM provider.
//!
//! Keys are looked up by label on every call; the provider only keeps the
//! logged-in session.

use std::{
    fmt,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
};

use cryptoki::{
    context::{CInitializeArgs, Pkcs11},
    error::{Error as Pkcs11Error, RvError},
    mechanism::Mechanism,
    object::{Attribute, AttributeType, ObjectClass, ObjectHandle},
    session::{Session, UserType},
    slot::Slot,
    types::{AuthPin, Ulong},
};
use hsm_signer_crypto::{
    CryptoError, CryptoResult,
    keys::{DigestAlgorithm, KeyAlgorithm, KeyPairHandle, RSA_PUBLIC_EXPONENT, Signer},
};
use hsm_signer_interfaces::{
    HsmConnector, HsmCredentials, HsmProvider, InterfaceError, InterfaceResult, public_key_label,
};
use openssl::{bn::BigNum, pkey::PKey, rsa::Rsa};
use tracing::{debug, info};

fn hsm_error(context: &str, e: &Pkcs11Error) -> InterfaceError {
    InterfaceError::Hsm(format!("{context}: {e}"))
}

/// Like [`hsm_error`], except that a device or session that is gone makes
/// the provider unavailable
fn provider_error(context: &str, e: &Pkcs11Error) -> InterfaceError {
    match e {
        Pkcs11Error::Pkcs11(
            RvError::DeviceError
            | RvError::DeviceRemoved
            | RvError::TokenNotPresent
            | RvError::SessionClosed
            | RvError::SessionHandleInvalid
            | RvError::CryptokiNotInitialized,
            _,
        ) => InterfaceError::ProviderUnavailable(format!("{context}: {e}")),
        e => hsm_error(context, e),
    }
}

fn lock(session: &Mutex<Session>) -> InterfaceResult<MutexGuard<'_, Session>> {
    session
        .lock()
        .map_err(|e| InterfaceError::Hsm(format!("failed to acquire the HSM session: {e}")))
}

/// Opens PKCS#11 sessions through the HSM vendor library
#[derive(Debug, Clone)]
pub struct Pkcs11Connector {
    library: PathBuf,
}

impl Pkcs11Connector {
    #[must_use]
    pub const fn new(library: PathBuf) -> Self {
        Self { library }
    }

    /// The slot whose token is labelled `partition`, else the first slot with a token
    fn select_slot(pkcs11: &Pkcs11, partition: &str) -> InterfaceResult<Slot> {
        let slots = pkcs11
            .get_slots_with_token()
            .map_err(|e| hsm_error("failed to list the slots", &e))?;
        for slot in &slots {
            let info = pkcs11
                .get_token_info(*slot)
                .map_err(|e| hsm_error("failed to read the token info", &e))?;
            if info.label().trim() == partition {
                return Ok(*slot);
            }
        }
        debug!("no token labelled {partition}, using the first slot");
        slots.first().copied().ok_or_else(|| {
            InterfaceError::ProviderUnavailable("no slot with a token is available".to_owned())
        })
    }
}

impl HsmConnector for Pkcs11Connector {
    fn connect(
        &self,
        partition: &str,
        credentials: &HsmCredentials,
    ) -> InterfaceResult<Arc<dyn HsmProvider>> {
        let pkcs11 = Pkcs11::new(&self.library).map_err(|e| {
            InterfaceError::ProviderUnavailable(format!(
                "failed to load the PKCS#11 library {}: {e}",
                self.library.display()
            ))
        })?;
        match pkcs11.initialize(CInitializeArgs::OsThreads) {
            Ok(()) | Err(Pkcs11Error::Pkcs11(RvError::CryptokiAlreadyInitialized, _)) => {}
            Err(e) => return Err(hsm_error("failed to initialize the PKCS#11 library", &e)),
        }
        let slot = Self::select_slot(&pkcs11, partition)?;
        let session = pkcs11
            .open_rw_session(slot)
            .map_err(|e| hsm_error("failed to open a session", &e))?;

        // the CloudHSM PIN is `<user>:<password>`
        let pin = AuthPin::new(format!(
            "{}:{}",
            credentials.user,
            credentials.password.as_str()
        ));
        session
            .login(UserType::User, Some(&pin))
            .map_err(|e| match e {
                Pkcs11Error::Pkcs11(
                    RvError::PinIncorrect | RvError::PinInvalid | RvError::PinLenRange,
                    _,
                ) => InterfaceError::AuthenticationFailed(format!(
                    "the HSM rejected the credentials of {}: {e}",
                    credentials.user
                )),
                e => hsm_error("login failed", &e),
            })?;
        info!(
            "PKCS#11 session opened on the slot {} of {}",
            slot.id(),
            self.library.display()
        );
        Ok(Arc::new(Pkcs11Provider {
            _pkcs11: pkcs11,
            session: Arc::new(Mutex::new(session)),
        }))
    }
}

/// A logged-in PKCS#11 session
pub struct Pkcs11Provider {
    // the library must outlive the session
    _pkcs11: Pkcs11,
    session: Arc<Mutex<Session>>,
}

impl Pkcs11Provider {
    fn find(
        session: &Session,
        label: &str,
        class: ObjectClass,
    ) -> InterfaceResult<Option<ObjectHandle>> {
        let handles = session
            .find_objects(&[
                Attribute::Label(label.as_bytes().to_vec()),
                Attribute::Class(class),
            ])
            .map_err(|e| provider_error("failed to search objects", &e))?;
        Ok(handles.first().copied())
    }

    fn rsa_public_key(
        session: &Session,
        handle: ObjectHandle,
    ) -> InterfaceResult<PKey<openssl::pkey::Public>> {
        let attributes = session
            .get_attributes(handle, &[AttributeType::Modulus, AttributeType::PublicExponent])
            .map_err(|e| provider_error("failed to read the public key", &e))?;
        let mut modulus = None;
        let mut exponent = None;
        for attribute in attributes {
            match attribute {
                Attribute::Modulus(n) => modulus = Some(n),
                Attribute::PublicExponent(e) => exponent = Some(e),
                _ => {}
            }
        }
        let (Some(n), Some(e)) = (modulus, exponent) else {
            return Err(InterfaceError::Hsm(
                "the public key has no modulus or exponent".to_owned(),
            ));
        };
        let rsa = Rsa::from_public_components(
            BigNum::from_slice(&n).map_err(CryptoError::from)?,
            BigNum::from_slice(&e).map_err(CryptoError::from)?,
        )
        .map_err(CryptoError::from)?;
        Ok(PKey::from_rsa(rsa).map_err(CryptoError::from)?)
    }
}

impl HsmProvider for Pkcs11Provider {
    fn name(&self) -> &str {
        "pkcs11"
    }

    fn generate_rsa_key_pair(&self, label: &str, bits: u32) -> InterfaceResult<KeyPairHandle> {
        let session = lock(&self.session)?;
        if Self::find(&session, label, ObjectClass::PRIVATE_KEY)?.is_some() {
            return Err(InterfaceError::LabelExists(label.to_owned()));
        }
        let id = uuid::Uuid::new_v4().as_bytes().to_vec();
        let public_template = [
            Attribute::ModulusBits(Ulong::from(u64::from(bits))),
            Attribute::PublicExponent(RSA_PUBLIC_EXPONENT.to_vec()),
            Attribute::Label(public_key_label(label).into_bytes()),
            Attribute::Id(id.clone()),
            Attribute::Token(true),
            Attribute::Verify(true),
        ];
        let private_template = [
            Attribute::Label(label.as_bytes().to_vec()),
            Attribute::Id(id),
            Attribute::Token(true),
            Attribute::Private(true),
            Attribute::Sensitive(true),
            Attribute::Sign(true),
            Attribute::Extractable(false),
        ];
        let (public_handle, private_handle) = session
            .generate_key_pair(
                &Mechanism::RsaPkcsKeyPairGen,
                &public_template,
                &private_template,
            )
            .map_err(|e| provider_error("key pair generation failed", &e))?;
        let public_key = Self::rsa_public_key(&session, public_handle)?;
        debug!("generated the RSA {bits} key pair {label} in the HSM");
        Ok(KeyPairHandle::new(
            label.to_owned(),
            public_key,
            Arc::new(Pkcs11Signer {
                label: label.to_owned(),
                session: self.session.clone(),
                handle: private_handle,
            }),
        ))
    }

    fn private_key(&self, label: &str) -> InterfaceResult<Option<Arc<dyn Signer>>> {
        let session = lock(&self.session)?;
        Ok(
            Self::find(&session, label, ObjectClass::PRIVATE_KEY)?.map(|handle| {
                Arc::new(Pkcs11Signer {
                    label: label.to_owned(),
                    session: self.session.clone(),
                    handle,
                }) as Arc<dyn Signer>
            }),
        )
    }

    fn destroy_key_pair(&self, label: &str) -> InterfaceResult<()> {
        let session = lock(&self.session)?;
        let objects = [
            Self::find(&session, label, ObjectClass::PRIVATE_KEY)?,
            Self::find(&session, &public_key_label(label), ObjectClass::PUBLIC_KEY)?,
        ];
        for handle in objects.into_iter().flatten() {
            session
                .destroy_object(handle)
                .map_err(|e| hsm_error("failed to delete a key object", &e))?;
        }
        debug!("deleted the key pair {label} from the HSM");
        Ok(())
    }

    fn logout(&self) -> InterfaceResult<()> {
        lock(&self.session)?
            .logout()
            .map_err(|e| hsm_error("logout failed", &e))
    }
}

/// An RSA private key object of the HSM
pub struct Pkcs11Signer {
    label: String,
    session: Arc<Mutex<Session>>,
    handle: ObjectHandle,
}

impl fmt::Debug for Pkcs11Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pkcs11Signer")
            .field("label", &self.label)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Signer for Pkcs11Signer {
    fn key_algorithm(&self) -> KeyAlgorithm {
        KeyAlgorithm::Rsa
    }

    fn sign(&self, digest: DigestAlgorithm, data: &[u8]) -> CryptoResult<Vec<u8>> {
        let mechanism = match digest {
            DigestAlgorithm::Sha1 => Mechanism::Sha1RsaPkcs,
            DigestAlgorithm::Sha256 => Mechanism::Sha256RsaPkcs,
            DigestAlgorithm::Sha512 => Mechanism::Sha512RsaPkcs,
        };
        let session = self
            .session
            .lock()
            .map_err(|e| CryptoError::Signing(format!("failed to acquire the HSM session: {e}")))?;
        session.sign(&mechanism, self.handle, data).map_err(|e| {
            CryptoError::Signing(format!("the HSM failed to sign with {}: {e}", self.label))
        })
    }

    fn is_hardware_backed(&self) -> bool {
        true
    }
}

#[expect(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use std::{env, sync::Arc};

    use cryptoki::{
        context::Function,
        error::{Error as Pkcs11Error, RvError},
    };
    use hsm_signer_crypto::xmldsig::{EmbeddedKeySelector, sign_document, validate_document};
    use hsm_signer_interfaces::{HsmConnector, HsmCredentials, InterfaceError};
    use zeroize::Zeroizing;

    use super::{Pkcs11Connector, provider_error};

    const SOFTHSM2_LIB: &str = "/usr/lib/softhsm/libsofthsm2.so";

    /// A SoftHSM2 token labelled `HSM_SIGNER_TOKEN` (default `signer`) whose
    /// user PIN is `<HSM_SIGNER_USER>:<HSM_SIGNER_PASSWORD>`
    fn connect() -> Arc<dyn hsm_signer_interfaces::HsmProvider> {
        let library = env::var("HSM_SIGNER_PKCS11_LIB").unwrap_or_else(|_| SOFTHSM2_LIB.to_owned());
        let partition = env::var("HSM_SIGNER_TOKEN").unwrap_or_else(|_| "signer".to_owned());
        let credentials = HsmCredentials {
            user: env::var("HSM_SIGNER_USER").unwrap_or_else(|_| "crypto_user".to_owned()),
            password: Zeroizing::new(
                env::var("HSM_SIGNER_PASSWORD").unwrap_or_else(|_| "password".to_owned()),
            ),
        };
        Pkcs11Connector::new(library.into())
            .connect(&partition, &credentials)
            .unwrap()
    }

    #[test]
    fn test_unreachable_device_makes_provider_unavailable() {
        for rv in [
            RvError::DeviceError,
            RvError::DeviceRemoved,
            RvError::TokenNotPresent,
            RvError::SessionClosed,
            RvError::SessionHandleInvalid,
            RvError::CryptokiNotInitialized,
        ] {
            let e = Pkcs11Error::Pkcs11(rv, Function::GenerateKeyPair);
            assert!(
                matches!(
                    provider_error("key pair generation failed", &e),
                    InterfaceError::ProviderUnavailable(_)
                ),
                "{rv:?}"
            );
        }
        for rv in [RvError::TemplateIncomplete, RvError::KeySizeRange] {
            let e = Pkcs11Error::Pkcs11(rv, Function::GenerateKeyPair);
            assert!(
                matches!(
                    provider_error("key pair generation failed", &e),
                    InterfaceError::Hsm(_)
                ),
                "{rv:?}"
            );
        }
    }

    #[test]
    #[ignore = "Requires a SoftHSM2 token"]
    fn test_generate_and_sign() {
        hsm_signer_logger::log_init(None);
        let provider = connect();
        let label = format!("test-{}", uuid::Uuid::new_v4());
        let key_pair = provider.generate_rsa_key_pair(&label, 2048).unwrap();
        assert!(!key_pair.is_software_key());
        assert!(matches!(
            provider.generate_rsa_key_pair(&label, 2048),
            Err(InterfaceError::LabelExists(_))
        ));

        let signed = sign_document("<doc>hello</doc>", &key_pair).unwrap();
        assert!(validate_document(&signed, &EmbeddedKeySelector).unwrap());

        let signer = provider.private_key(&label).unwrap().unwrap();
        assert!(signer.is_hardware_backed());
        assert!(provider.private_key("missing-label").unwrap().is_none());

        provider.destroy_key_pair(&label).unwrap();
        assert!(provider.private_key(&label).unwrap().is_none());
        provider.generate_rsa_key_pair(&label, 2048).unwrap();
        provider.destroy_key_pair(&label).unwrap();
        provider.logout().unwrap();
    }
}
