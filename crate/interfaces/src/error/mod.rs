use thiserror::Error;

pub type InterfaceResult<T> = Result<T, InterfaceError>;

#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("{0}")]
    Default(String),

    #[error("Invalid Request: {0}")]
    InvalidRequest(String),

    #[error("HSM Error: {0}")]
    Hsm(String),

    /// The HSM security provider cannot be reached or is not installed
    #[error("HSM provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("A key with the label {0} already exists")]
    LabelExists(String),

    #[error("HSM authentication failed: {0}")]
    AuthenticationFailed(String),

    /// An external service (directory, secret store, object store) failed
    #[error("Dependency Error: {0}")]
    Dependency(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for InterfaceError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidRequest(e.to_string())
    }
}

impl From<hsm_signer_crypto::CryptoError> for InterfaceError {
    fn from(e: hsm_signer_crypto::CryptoError) -> Self {
        Self::Hsm(e.to_string())
    }
}
