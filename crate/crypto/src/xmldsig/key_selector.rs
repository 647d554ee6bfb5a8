use base64::{Engine, engine::general_purpose::STANDARD};
use openssl::{
    bn::BigNum,
    dsa::Dsa,
    pkey::{PKey, Public},
    rsa::Rsa,
};
use tracing::debug;

use super::{
    algorithms::{DSIG_NAMESPACE, SignatureMethod},
    dom::Element,
};
use crate::{CryptoError, error::result::CryptoResult, keys::KeyAlgorithm};

/// Strategy resolving the key that verifies a signature.
///
/// Implementations must reject candidate keys whose algorithm does not match
/// the declared signature method.
pub trait KeySelector: Send + Sync {
    fn select(
        &self,
        key_info: Option<&Element>,
        method: SignatureMethod,
    ) -> CryptoResult<PKey<Public>>;
}

/// Trusts the public key embedded in the `KeyInfo/KeyValue` elements
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedKeySelector;

impl KeySelector for EmbeddedKeySelector {
    fn select(
        &self,
        key_info: Option<&Element>,
        method: SignatureMethod,
    ) -> CryptoResult<PKey<Public>> {
        let expected = method.key_algorithm();
        let candidates = key_info
            .into_iter()
            .flat_map(|key_info| key_info.children_named(DSIG_NAMESPACE, "KeyValue"))
            .flat_map(Element::child_elements);
        for candidate in candidates {
            let algorithm = match candidate.local_name.as_str() {
                "RSAKeyValue" => KeyAlgorithm::Rsa,
                "DSAKeyValue" => KeyAlgorithm::Dsa,
                other => {
                    debug!("ignoring unknown key value {other}");
                    continue;
                }
            };
            if candidate.namespace.as_deref() != Some(DSIG_NAMESPACE) || algorithm != expected {
                debug!(
                    "skipping {algorithm} key value for the {} signature method",
                    method.uri()
                );
                continue;
            }
            return match algorithm {
                KeyAlgorithm::Rsa => rsa_key_value(candidate),
                KeyAlgorithm::Dsa => dsa_key_value(candidate),
            };
        }
        Err(CryptoError::NoMatchingKeyMaterial(format!(
            "no {expected} KeyValue element found for the signature method {}",
            method.uri()
        )))
    }
}

/// Decode a `ds:CryptoBinary` value, ignoring the whitespace wrapping
pub(crate) fn decode_base64(text: &str) -> CryptoResult<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(STANDARD.decode(compact)?)
}

fn big_num(key_value: &Element, name: &str) -> CryptoResult<BigNum> {
    let element = key_value.first_child(DSIG_NAMESPACE, name).ok_or_else(|| {
        CryptoError::MalformedXml(format!("{} has no {name} element", key_value.local_name))
    })?;
    Ok(BigNum::from_slice(&decode_base64(&element.text_content())?)?)
}

fn rsa_key_value(key_value: &Element) -> CryptoResult<PKey<Public>> {
    let rsa = Rsa::from_public_components(
        big_num(key_value, "Modulus")?,
        big_num(key_value, "Exponent")?,
    )?;
    Ok(PKey::from_rsa(rsa)?)
}

fn dsa_key_value(key_value: &Element) -> CryptoResult<PKey<Public>> {
    let dsa = Dsa::from_public_components(
        big_num(key_value, "P")?,
        big_num(key_value, "Q")?,
        big_num(key_value, "G")?,
        big_num(key_value, "Y")?,
    )?;
    Ok(PKey::from_dsa(dsa)?)
}
