use hsm_signer_base_hsm::SessionError;
use hsm_signer_crypto::CryptoError;
use hsm_signer_interfaces::InterfaceError;
use thiserror::Error;

// Each error type must have a corresponding HTTP status code (see `routes/mod.rs`)
#[derive(Error, Debug)]
pub enum SignerError {
    // When a user requests a key label which does not exist
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    // Missing or empty arguments in the request
    #[error("Invalid Request: {0}")]
    InvalidRequest(String),

    // The certificate metadata of a key creation request cannot be encoded
    #[error("Invalid certificate data: {0}")]
    InvalidCertificateData(String),

    #[error("A key with the label {0} already exists")]
    LabelExists(String),

    // A failure originating from the signing provider or the XML signature engine
    #[error("Cryptographic error: {0}")]
    CryptographicError(String),

    #[error("No matching key material: {0}")]
    NoMatchingKeyMaterial(String),

    // Error related to X509 Certificate
    #[error("Certificate error: {0}")]
    Certificate(String),

    // The HSM directory, the secret store or the object store cannot be reached
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    // The HSM session is not usable: authentication failure, client process death
    #[error("HSM session fault: {0}")]
    SessionFault(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // Any errors related to a bad behavior of the server but not related to the user input
    #[error("Unexpected server error: {0}")]
    ServerError(String),
}

impl From<CryptoError> for SignerError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::NoMatchingKeyMaterial(s) => Self::NoMatchingKeyMaterial(s),
            CryptoError::InvalidCertificateData(s) => Self::InvalidCertificateData(s),
            CryptoError::Certificate(s) => Self::Certificate(s),
            e => Self::CryptographicError(e.to_string()),
        }
    }
}

impl From<InterfaceError> for SignerError {
    fn from(e: InterfaceError) -> Self {
        match e {
            InterfaceError::LabelExists(label) => Self::LabelExists(label),
            InterfaceError::NotFound(s) => Self::ItemNotFound(s),
            InterfaceError::InvalidRequest(s) => Self::InvalidRequest(s),
            InterfaceError::Dependency(s) | InterfaceError::ProviderUnavailable(s) => {
                Self::DependencyUnavailable(s)
            }
            InterfaceError::AuthenticationFailed(s) => Self::SessionFault(s),
            InterfaceError::Hsm(s) | InterfaceError::Default(s) => Self::CryptographicError(s),
        }
    }
}

impl From<SessionError> for SignerError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Directory(s) | SessionError::Secrets(s) => Self::DependencyUnavailable(s),
            e => Self::SessionFault(e.to_string()),
        }
    }
}

impl From<std::io::Error> for SignerError {
    fn from(e: std::io::Error) -> Self {
        Self::ServerError(e.to_string())
    }
}

impl From<openssl::error::ErrorStack> for SignerError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Self::CryptographicError(format!("{e}. Details: {e:?}"))
    }
}

impl From<serde_json::Error> for SignerError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidRequest(e.to_string())
    }
}

impl From<tokio::task::JoinError> for SignerError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::ServerError(format!("task failure: {e}"))
    }
}

impl From<std::sync::mpsc::SendError<actix_web::dev::ServerHandle>> for SignerError {
    fn from(e: std::sync::mpsc::SendError<actix_web::dev::ServerHandle>) -> Self {
        Self::ServerError(format!("failed to send the server handle: {e}"))
    }
}

impl From<toml::de::Error> for SignerError {
    fn from(e: toml::de::Error) -> Self {
        Self::ServerError(format!("invalid configuration file: {e}"))
    }
}

/// Return early with an error if a condition is not satisfied.
///
/// This macro is equivalent to `if !$cond { return Err(From::from($err)); }`.
#[macro_export]
macro_rules! signer_ensure {
    ($cond:expr, $msg:literal $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($crate::signer_error!($msg));
        }
    };
    ($cond:expr, $err:expr $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($err);
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !$cond {
            return ::core::result::Result::Err($crate::signer_error!($fmt, $($arg)*));
        }
    };
}

/// Construct a server error from a string.
#[macro_export]
macro_rules! signer_error {
    ($msg:literal) => {
        $crate::error::SignerError::ServerError(::core::format_args!($msg).to_string())
    };
    ($err:expr $(,)?) => ({
        $crate::error::SignerError::ServerError($err.to_string())
    });
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::SignerError::ServerError(::core::format_args!($fmt, $($arg)*).to_string())
    };
}

/// Return early with an error if a condition is not satisfied.
#[macro_export]
macro_rules! signer_bail {
    ($msg:literal) => {
        return ::core::result::Result::Err($crate::signer_error!($msg))
    };
    ($err:expr $(,)?) => {
        return ::core::result::Result::Err($err)
    };
    ($fmt:expr, $($arg:tt)*) => {
        return ::core::result::Result::Err($crate::signer_error!($fmt, $($arg)*))
    };
}
