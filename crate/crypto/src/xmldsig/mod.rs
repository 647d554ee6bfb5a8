//! XML digital signatures (enveloped), following the W3C XML-DSig recommendation.

pub mod algorithms;
pub mod c14n;
pub mod dom;
mod key_selector;
mod signer;
mod validator;

pub use key_selector::{EmbeddedKeySelector, KeySelector};
pub use signer::{SignatureOptions, sign_document, sign_document_with};
pub use validator::{ReferenceValidation, ValidationReport, validate_document, verify_document};
