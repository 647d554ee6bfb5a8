use std::{fmt, sync::Arc};

use openssl::{
    hash::MessageDigest,
    pkey::{Id, PKey, Private, Public},
    rsa::Rsa,
    symm::Cipher,
};
use zeroize::Zeroizing;

use crate::{CryptoError, error::result::CryptoResult};

/// The public exponent used for every generated RSA key (65537)
pub const RSA_PUBLIC_EXPONENT: [u8; 3] = [0x01, 0x00, 0x01];

/// Asymmetric key algorithms known to the signer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    Dsa,
}

impl KeyAlgorithm {
    /// Determine the algorithm of an OpenSSL public key
    pub fn of(public_key: &PKey<Public>) -> CryptoResult<Self> {
        match public_key.id() {
            Id::RSA => Ok(Self::Rsa),
            Id::DSA => Ok(Self::Dsa),
            other => Err(CryptoError::NotSupported(format!(
                "unsupported public key type: {other:?}"
            ))),
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa => write!(f, "RSA"),
            Self::Dsa => write!(f, "DSA"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    #[must_use]
    pub fn message_digest(self) -> MessageDigest {
        match self {
            Self::Sha1 => MessageDigest::sha1(),
            Self::Sha256 => MessageDigest::sha256(),
            Self::Sha512 => MessageDigest::sha512(),
        }
    }

    pub fn digest(self, data: &[u8]) -> CryptoResult<Vec<u8>> {
        Ok(openssl::hash::hash(self.message_digest(), data)?.to_vec())
    }
}

/// A private key able to produce signatures.
///
/// The key itself may live outside the process (an HSM object handle):
/// implementations only expose the signing capability, never the key bytes.
pub trait Signer: Send + Sync + fmt::Debug {
    /// Algorithm of the underlying key
    fn key_algorithm(&self) -> KeyAlgorithm;

    /// Hash `data` with `digest` and sign the result.
    ///
    /// RSA keys produce a PKCS#1 v1.5 signature.
    fn sign(&self, digest: DigestAlgorithm, data: &[u8]) -> CryptoResult<Vec<u8>>;

    /// `false` for keys generated and held in process memory
    fn is_hardware_backed(&self) -> bool;
}

/// A private key held in process memory
pub struct SoftwareSigner {
    private_key: PKey<Private>,
}

impl SoftwareSigner {
    #[must_use]
    pub const fn new(private_key: PKey<Private>) -> Self {
        Self { private_key }
    }

    /// Generate a fresh RSA key pair of `bits` size
    pub fn generate_rsa(bits: u32) -> CryptoResult<Self> {
        let rsa = Rsa::generate(bits)?;
        Ok(Self::new(PKey::from_rsa(rsa)?))
    }

    /// Load a private key from a password protected PKCS#8 PEM
    pub fn from_encrypted_pkcs8_pem(pem: &[u8], password: &str) -> CryptoResult<Self> {
        let private_key = PKey::private_key_from_pem_passphrase(pem, password.as_bytes())
            .map_err(|e| {
                CryptoError::ConversionError(format!(
                    "unable to decrypt the PKCS#8 private key: {e}"
                ))
            })?;
        Ok(Self::new(private_key))
    }

    /// Export the private key as a password protected PKCS#8 PEM
    pub fn to_encrypted_pkcs8_pem(&self, password: &str) -> CryptoResult<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new(
            self.private_key
                .private_key_to_pem_pkcs8_passphrase(Cipher::aes_256_cbc(), password.as_bytes())?,
        ))
    }

    pub fn public_key(&self) -> CryptoResult<PKey<Public>> {
        let der = self.private_key.public_key_to_der()?;
        Ok(PKey::public_key_from_der(&der)?)
    }
}

impl fmt::Debug for SoftwareSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareSigner")
            .field("bits", &self.private_key.bits())
            .finish_non_exhaustive()
    }
}

impl Signer for SoftwareSigner {
    fn key_algorithm(&self) -> KeyAlgorithm {
        match self.private_key.id() {
            Id::DSA => KeyAlgorithm::Dsa,
            _ => KeyAlgorithm::Rsa,
        }
    }

    fn sign(&self, digest: DigestAlgorithm, data: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut signer = openssl::sign::Signer::new(digest.message_digest(), &self.private_key)
            .map_err(|e| CryptoError::Signing(e.to_string()))?;
        signer
            .update(data)
            .map_err(|e| CryptoError::Signing(e.to_string()))?;
        signer
            .sign_to_vec()
            .map_err(|e| CryptoError::Signing(e.to_string()))
    }

    fn is_hardware_backed(&self) -> bool {
        false
    }
}

/// A resolved key pair: the exportable public key and a handle on the private key.
///
/// Dropping a handle never destroys the key inside the HSM.
#[derive(Clone)]
pub struct KeyPairHandle {
    label: String,
    public_key: PKey<Public>,
    private_key: Arc<dyn Signer>,
}

impl KeyPairHandle {
    #[must_use]
    pub fn new(label: String, public_key: PKey<Public>, private_key: Arc<dyn Signer>) -> Self {
        Self {
            label,
            public_key,
            private_key,
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub const fn public_key(&self) -> &PKey<Public> {
        &self.public_key
    }

    #[must_use]
    pub fn private_key(&self) -> &dyn Signer {
        self.private_key.as_ref()
    }

    /// DER encoded `SubjectPublicKeyInfo`
    pub fn public_key_der(&self) -> CryptoResult<Vec<u8>> {
        Ok(self.public_key.public_key_to_der()?)
    }

    /// `true` when the private key was generated in software instead of in the HSM
    #[must_use]
    pub fn is_software_key(&self) -> bool {
        !self.private_key.is_hardware_backed()
    }
}

impl fmt::Debug for KeyPairHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPairHandle")
            .field("label", &self.label)
            .field("public_key_bits", &self.public_key.bits())
            .field("private_key", &self.private_key)
            .finish()
    }
}
