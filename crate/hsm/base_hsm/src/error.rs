use std::time::Duration;

use hsm_signer_interfaces::InterfaceError;
use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{0}")]
    Default(String),

    #[error("HSM directory error: {0}")]
    Directory(String),

    #[error("HSM client process error: {0}")]
    ClientProcess(String),

    #[error("HSM client exited before being ready: {0}")]
    ClientExited(String),

    #[error("HSM client not ready after {0:?}")]
    ReadinessTimeout(Duration),

    #[error("Secret store error: {0}")]
    Secrets(String),

    #[error("HSM authentication failed: {0}")]
    Authentication(String),

    #[error("HSM provider error: {0}")]
    Provider(String),

    #[error("Invalid HSM session state: {0}")]
    InvalidState(String),
}

impl SessionError {
    /// Whether the HSM rejected the credentials, as opposed to any other failure
    #[must_use]
    pub const fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        Self::ClientProcess(e.to_string())
    }
}

impl From<InterfaceError> for SessionError {
    fn from(e: InterfaceError) -> Self {
        match e {
            InterfaceError::AuthenticationFailed(msg) => Self::Authentication(msg),
            other => Self::Provider(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for SessionError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Default(format!("task failure: {e}"))
    }
}
