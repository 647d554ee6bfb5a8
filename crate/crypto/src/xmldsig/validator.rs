use openssl::memcmp;
use tracing::{info, warn};

use super::{
    algorithms::{DSIG_NAMESPACE, SignatureMethod, Transform, digest_from_uri},
    c14n::{CanonicalizationMethod, Canonicalizer},
    dom::{Document, Element},
    key_selector::{KeySelector, decode_base64},
};
use crate::{CryptoError, crypto_ensure, error::result::CryptoResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceValidation {
    pub uri: String,
    pub valid: bool,
}

/// Outcome of the core validation of a signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub signature_value_valid: bool,
    pub references: Vec<ReferenceValidation>,
}

impl ValidationReport {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.signature_value_valid && self.references.iter().all(|r| r.valid)
    }
}

/// Validate the first signature of `xml`.
///
/// Returns `false` when the document holds no signature or when the
/// signature is invalid; the details of an invalid signature are only logged.
/// Malformed XML, unsupported algorithms and key selection failures are errors.
pub fn validate_document(xml: &str, selector: &dyn KeySelector) -> CryptoResult<bool> {
    let Some(report) = verify_document(xml, selector)? else {
        info!("the document holds no XML signature");
        return Ok(false);
    };
    if report.is_valid() {
        return Ok(true);
    }
    warn!("Signature failed core validation");
    info!("signature validation status: {}", report.signature_value_valid);
    for (i, reference) in report.references.iter().enumerate() {
        info!(
            "ref[{i}] (URI=\"{}\") validity status: {}",
            reference.uri, reference.valid
        );
    }
    Ok(false)
}

/// Check the signature value and every reference of the first signature of
/// `xml`, or `None` when the document is not signed
pub fn verify_document(
    xml: &str,
    selector: &dyn KeySelector,
) -> CryptoResult<Option<ValidationReport>> {
    let document = Document::parse(xml)?;
    let Some(signature_path) = document.root.path_to_first(DSIG_NAMESPACE, "Signature") else {
        return Ok(None);
    };
    let Some(&signature) = signature_path.last() else {
        return Ok(None);
    };

    let signed_info = required_child(signature, "SignedInfo")?;
    let canonicalization = CanonicalizationMethod::from_uri(algorithm(required_child(
        signed_info,
        "CanonicalizationMethod",
    )?)?)?;
    let method =
        SignatureMethod::from_uri(algorithm(required_child(signed_info, "SignatureMethod")?)?)?;
    let signature_value =
        decode_base64(&required_child(signature, "SignatureValue")?.text_content())?;

    let public_key = selector.select(signature.first_child(DSIG_NAMESPACE, "KeyInfo"), method)?;

    let mut signed_info_path = signature_path.clone();
    signed_info_path.push(signed_info);
    let canonical = Canonicalizer::new(canonicalization.with_comments()).subtree(&signed_info_path);
    let signature_value_valid =
        method.verify(&public_key, canonical.as_bytes(), &signature_value)?;

    let references = signed_info
        .children_named(DSIG_NAMESPACE, "Reference")
        .map(|reference| verify_reference(&document, signature, reference))
        .collect::<CryptoResult<Vec<_>>>()?;
    crypto_ensure!(
        !references.is_empty(),
        CryptoError::MalformedXml("SignedInfo holds no Reference".to_owned())
    );

    Ok(Some(ValidationReport {
        signature_value_valid,
        references,
    }))
}

fn verify_reference(
    document: &Document,
    signature: &Element,
    reference: &Element,
) -> CryptoResult<ReferenceValidation> {
    let uri = reference.attribute("URI").ok_or_else(|| {
        CryptoError::NotSupported("references without a URI are not supported".to_owned())
    })?;
    let transforms = reference
        .first_child(DSIG_NAMESPACE, "Transforms")
        .map(|transforms| {
            transforms
                .children_named(DSIG_NAMESPACE, "Transform")
                .map(|t| Transform::from_uri(algorithm(t)?))
                .collect::<CryptoResult<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();
    let digest = digest_from_uri(algorithm(required_child(reference, "DigestMethod")?)?)?;
    let expected = decode_base64(&required_child(reference, "DigestValue")?.text_content())?;

    // same-document node sets never contain comments
    let mut canonicalizer = Canonicalizer::new(false);
    if transforms.contains(&Transform::EnvelopedSignature) {
        canonicalizer = canonicalizer.excluding(signature);
    }
    let octets = if uri.is_empty() {
        canonicalizer.document(document)
    } else if let Some(id) = uri.strip_prefix('#') {
        let path = document.root.path_to_id(id)?.ok_or_else(|| {
            CryptoError::MalformedXml(format!("no element carries the identifier '{id}'"))
        })?;
        canonicalizer.subtree(&path)
    } else {
        return Err(CryptoError::NotSupported(format!(
            "only same-document references are supported, not '{uri}'"
        )));
    };

    let actual = digest.digest(octets.as_bytes())?;
    Ok(ReferenceValidation {
        uri: uri.to_owned(),
        valid: actual.len() == expected.len() && memcmp::eq(&actual, &expected),
    })
}

fn required_child<'a>(parent: &'a Element, local_name: &str) -> CryptoResult<&'a Element> {
    parent.first_child(DSIG_NAMESPACE, local_name).ok_or_else(|| {
        CryptoError::MalformedXml(format!(
            "{} has no {local_name} element",
            parent.local_name
        ))
    })
}

fn algorithm(element: &Element) -> CryptoResult<&str> {
    element.attribute("Algorithm").ok_or_else(|| {
        CryptoError::MalformedXml(format!("{} has no Algorithm attribute", element.local_name))
    })
}
