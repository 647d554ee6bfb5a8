use base64::{Engine, engine::general_purpose::STANDARD};
use tracing::debug;

use super::{
    algorithms::{DSIG_NAMESPACE, SignatureMethod, TRANSFORM_ENVELOPED_SIGNATURE, digest_uri},
    c14n::{CanonicalizationMethod, Canonicalizer},
    dom::{Document, Element, Node},
};
use crate::{
    CryptoError, crypto_bail,
    error::result::{CryptoResult, CryptoResultHelper},
    keys::{DigestAlgorithm, KeyPairHandle},
};

/// Parameters of an enveloped signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureOptions {
    pub canonicalization: CanonicalizationMethod,
    pub signature_method: SignatureMethod,
    pub digest: DigestAlgorithm,
    /// `""` for the whole document or `#<id>` for the element carrying that `Id`
    pub reference_uri: String,
}

impl Default for SignatureOptions {
    fn default() -> Self {
        Self {
            canonicalization: CanonicalizationMethod::InclusiveWithComments,
            signature_method: SignatureMethod::RsaSha256,
            digest: DigestAlgorithm::Sha256,
            reference_uri: String::new(),
        }
    }
}

/// Sign `xml` with an enveloped signature using the default options:
/// a single reference over the whole document (enveloped transform, SHA-256),
/// inclusive canonicalization with comments of `SignedInfo`, RSA-SHA256 and
/// the public key embedded as a `KeyValue`.
pub fn sign_document(xml: &str, key_pair: &KeyPairHandle) -> CryptoResult<String> {
    sign_document_with(xml, key_pair, &SignatureOptions::default())
}

/// Sign `xml` with an enveloped signature appended to the root element
pub fn sign_document_with(
    xml: &str,
    key_pair: &KeyPairHandle,
    options: &SignatureOptions,
) -> CryptoResult<String> {
    let signer = key_pair.private_key();
    if signer.key_algorithm() != options.signature_method.key_algorithm() {
        crypto_bail!(CryptoError::NotSupported(format!(
            "a {} key cannot produce {} signatures",
            signer.key_algorithm(),
            options.signature_method.uri()
        )));
    }
    let rsa = key_pair.public_key().rsa()?;

    let mut document = Document::parse(xml)?;
    let referenced = match options.reference_uri.strip_prefix('#') {
        None if options.reference_uri.is_empty() => {
            Canonicalizer::new(false).document(&document)
        }
        Some(id) => {
            let path = document.root.path_to_id(id)?.with_context(|| {
                format!("no element carries the identifier '{id}'")
            })?;
            Canonicalizer::new(false).subtree(&path)
        }
        None => crypto_bail!(CryptoError::NotSupported(format!(
            "only same-document references can be signed, not '{}'",
            options.reference_uri
        ))),
    };
    let digest_value = STANDARD.encode(options.digest.digest(referenced.as_bytes())?);

    let signature = signature_template(
        options,
        &digest_value,
        &STANDARD.encode(rsa.n().to_vec()),
        &STANDARD.encode(rsa.e().to_vec()),
    );
    document.root.children.push(Node::Element(signature));

    let signed_info = {
        let signature = last_child_element(&document.root)?;
        let signed_info = signature
            .first_child(DSIG_NAMESPACE, "SignedInfo")
            .context("the signature template has no SignedInfo")?;
        Canonicalizer::new(options.canonicalization.with_comments())
            .subtree(&[&document.root, signature, signed_info])
    };
    let signature_value = signer.sign(options.signature_method.digest(), signed_info.as_bytes())?;
    set_signature_value(&mut document.root, &STANDARD.encode(signature_value))?;

    debug!(
        "signed the document with the key {} ({})",
        key_pair.label(),
        options.signature_method.uri()
    );
    Ok(document.to_xml_string())
}

fn signature_template(
    options: &SignatureOptions,
    digest_value: &str,
    modulus: &str,
    exponent: &str,
) -> Element {
    let ds = Some(DSIG_NAMESPACE);
    let reference = Element::new("Reference", ds)
        .with_attribute("URI", &options.reference_uri)
        .with_child(
            Element::new("Transforms", ds).with_child(
                Element::new("Transform", ds)
                    .with_attribute("Algorithm", TRANSFORM_ENVELOPED_SIGNATURE),
            ),
        )
        .with_child(
            Element::new("DigestMethod", ds).with_attribute("Algorithm", digest_uri(options.digest)),
        )
        .with_child(Element::new("DigestValue", ds).with_text(digest_value));
    let signed_info = Element::new("SignedInfo", ds)
        .with_child(
            Element::new("CanonicalizationMethod", ds)
                .with_attribute("Algorithm", options.canonicalization.uri()),
        )
        .with_child(
            Element::new("SignatureMethod", ds)
                .with_attribute("Algorithm", options.signature_method.uri()),
        )
        .with_child(reference);
    let key_info = Element::new("KeyInfo", ds).with_child(
        Element::new("KeyValue", ds).with_child(
            Element::new("RSAKeyValue", ds)
                .with_child(Element::new("Modulus", ds).with_text(modulus))
                .with_child(Element::new("Exponent", ds).with_text(exponent)),
        ),
    );
    Element::new("Signature", ds)
        .declaring_default_namespace()
        .with_child(signed_info)
        .with_child(Element::new("SignatureValue", ds))
        .with_child(key_info)
}

fn last_child_element(element: &Element) -> CryptoResult<&Element> {
    match element.children.last() {
        Some(Node::Element(child)) => Ok(child),
        _ => Err(CryptoError::Default(
            "the signature element was not appended".to_owned(),
        )),
    }
}

fn set_signature_value(root: &mut Element, value: &str) -> CryptoResult<()> {
    let Some(Node::Element(signature)) = root.children.last_mut() else {
        crypto_bail!("the signature element was not appended");
    };
    for child in &mut signature.children {
        if let Node::Element(element) = child {
            if element.is(DSIG_NAMESPACE, "SignatureValue") {
                element.children = vec![Node::Text(value.to_owned())];
                return Ok(());
            }
        }
    }
    crypto_bail!("the signature template has no SignatureValue")
}
