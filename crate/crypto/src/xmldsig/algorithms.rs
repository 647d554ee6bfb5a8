use openssl::{
    bn::BigNum,
    dsa::DsaSig,
    pkey::{PKey, Public},
    sign::Verifier,
};
use tracing::debug;

use crate::{
    CryptoError,
    error::result::CryptoResult,
    keys::{DigestAlgorithm, KeyAlgorithm},
};

pub const DSIG_NAMESPACE: &str = "http://www.w3.org/2000/09/xmldsig#";

pub const C14N_INCLUSIVE: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const C14N_INCLUSIVE_WITH_COMMENTS: &str =
    "http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments";
pub const C14N_EXCLUSIVE: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const C14N_EXCLUSIVE_WITH_COMMENTS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";

pub const TRANSFORM_ENVELOPED_SIGNATURE: &str =
    "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

pub const DIGEST_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const DIGEST_SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

pub const SIGNATURE_RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const SIGNATURE_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const SIGNATURE_RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";
pub const SIGNATURE_DSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#dsa-sha1";

pub fn digest_from_uri(uri: &str) -> CryptoResult<DigestAlgorithm> {
    match uri {
        DIGEST_SHA1 => Ok(DigestAlgorithm::Sha1),
        DIGEST_SHA256 => Ok(DigestAlgorithm::Sha256),
        DIGEST_SHA512 => Ok(DigestAlgorithm::Sha512),
        other => Err(CryptoError::NotSupported(format!(
            "unknown digest method: {other}"
        ))),
    }
}

#[must_use]
pub const fn digest_uri(digest: DigestAlgorithm) -> &'static str {
    match digest {
        DigestAlgorithm::Sha1 => DIGEST_SHA1,
        DigestAlgorithm::Sha256 => DIGEST_SHA256,
        DigestAlgorithm::Sha512 => DIGEST_SHA512,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMethod {
    RsaSha1,
    RsaSha256,
    RsaSha512,
    DsaSha1,
}

impl SignatureMethod {
    pub fn from_uri(uri: &str) -> CryptoResult<Self> {
        match uri {
            SIGNATURE_RSA_SHA1 => Ok(Self::RsaSha1),
            SIGNATURE_RSA_SHA256 => Ok(Self::RsaSha256),
            SIGNATURE_RSA_SHA512 => Ok(Self::RsaSha512),
            SIGNATURE_DSA_SHA1 => Ok(Self::DsaSha1),
            other => Err(CryptoError::NotSupported(format!(
                "unknown signature method: {other}"
            ))),
        }
    }

    #[must_use]
    pub const fn uri(self) -> &'static str {
        match self {
            Self::RsaSha1 => SIGNATURE_RSA_SHA1,
            Self::RsaSha256 => SIGNATURE_RSA_SHA256,
            Self::RsaSha512 => SIGNATURE_RSA_SHA512,
            Self::DsaSha1 => SIGNATURE_DSA_SHA1,
        }
    }

    #[must_use]
    pub const fn key_algorithm(self) -> KeyAlgorithm {
        match self {
            Self::DsaSha1 => KeyAlgorithm::Dsa,
            _ => KeyAlgorithm::Rsa,
        }
    }

    #[must_use]
    pub const fn digest(self) -> DigestAlgorithm {
        match self {
            Self::RsaSha1 | Self::DsaSha1 => DigestAlgorithm::Sha1,
            Self::RsaSha256 => DigestAlgorithm::Sha256,
            Self::RsaSha512 => DigestAlgorithm::Sha512,
        }
    }

    /// Verify a `SignatureValue` over `data`.
    ///
    /// A signature value that cannot even be decoded is reported as invalid.
    /// DSA values are the concatenation of `r` and `s`.
    pub fn verify(
        self,
        public_key: &PKey<Public>,
        data: &[u8],
        signature_value: &[u8],
    ) -> CryptoResult<bool> {
        let signature = match self {
            Self::DsaSha1 => match dsa_signature_to_der(signature_value) {
                Ok(der) => der,
                Err(e) => {
                    debug!("undecodable DSA signature value: {e}");
                    return Ok(false);
                }
            },
            _ => signature_value.to_vec(),
        };
        let mut verifier = Verifier::new(self.digest().message_digest(), public_key)?;
        verifier.update(data)?;
        Ok(verifier.verify(&signature).unwrap_or_else(|e| {
            debug!("signature verification error: {e}");
            false
        }))
    }
}

fn dsa_signature_to_der(value: &[u8]) -> CryptoResult<Vec<u8>> {
    if value.is_empty() || value.len() % 2 != 0 {
        return Err(CryptoError::ConversionError(format!(
            "a DSA signature value of {} bytes cannot be split into r and s",
            value.len()
        )));
    }
    let (r, s) = value.split_at(value.len() / 2);
    let signature = DsaSig::from_private_components(BigNum::from_slice(r)?, BigNum::from_slice(s)?)?;
    Ok(signature.to_der()?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    EnvelopedSignature,
    Canonicalization(super::c14n::CanonicalizationMethod),
}

impl Transform {
    pub fn from_uri(uri: &str) -> CryptoResult<Self> {
        if uri == TRANSFORM_ENVELOPED_SIGNATURE {
            return Ok(Self::EnvelopedSignature);
        }
        super::c14n::CanonicalizationMethod::from_uri(uri)
            .map(Self::Canonicalization)
            .map_err(|_| CryptoError::NotSupported(format!("unsupported transform: {uri}")))
    }
}

#[expect(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use openssl::{dsa::Dsa, hash::MessageDigest, sign::Signer};

    use super::*;

    #[test]
    fn test_uris() {
        for method in [
            SignatureMethod::RsaSha1,
            SignatureMethod::RsaSha256,
            SignatureMethod::RsaSha512,
            SignatureMethod::DsaSha1,
        ] {
            assert_eq!(SignatureMethod::from_uri(method.uri()).unwrap(), method);
        }
        assert_eq!(
            digest_from_uri(DIGEST_SHA256).unwrap(),
            DigestAlgorithm::Sha256
        );
        SignatureMethod::from_uri("urn:unknown").unwrap_err();
        assert_eq!(
            Transform::from_uri(TRANSFORM_ENVELOPED_SIGNATURE).unwrap(),
            Transform::EnvelopedSignature
        );
        Transform::from_uri(C14N_EXCLUSIVE).unwrap_err();
    }

    #[test]
    fn test_dsa_verify() {
        let dsa = Dsa::generate(1024).unwrap();
        let private_key = PKey::from_dsa(dsa).unwrap();
        let public_key =
            PKey::public_key_from_der(&private_key.public_key_to_der().unwrap()).unwrap();

        let mut signer = Signer::new(MessageDigest::sha1(), &private_key).unwrap();
        signer.update(b"data").unwrap();
        let der = signer.sign_to_vec().unwrap();
        let signature = DsaSig::from_der(&der).unwrap();
        let mut raw = vec![0_u8; 40];
        let r = signature.r().to_vec();
        let s = signature.s().to_vec();
        raw[20 - r.len()..20].copy_from_slice(&r);
        raw[40 - s.len()..].copy_from_slice(&s);

        assert!(
            SignatureMethod::DsaSha1
                .verify(&public_key, b"data", &raw)
                .unwrap()
        );
        assert!(
            !SignatureMethod::DsaSha1
                .verify(&public_key, b"other", &raw)
                .unwrap()
        );
        assert!(
            !SignatureMethod::DsaSha1
                .verify(&public_key, b"data", &raw[..39])
                .unwrap()
        );
    }
}
