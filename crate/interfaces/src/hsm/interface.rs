//! HSM interface.
//! This module defines what the signer needs from the HSM security provider:
//! key pair generation, access to private keys by label, and logout.

use std::{fmt, sync::Arc};

use hsm_signer_crypto::keys::{KeyPairHandle, Signer};
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::{InterfaceError, InterfaceResult};

/// Suffix appended to a key label to name its public key object
pub const PUBLIC_KEY_LABEL_SUFFIX: &str = ":public";

/// Label of the public key object of the key pair `label`
#[must_use]
pub fn public_key_label(label: &str) -> String {
    format!("{label}{PUBLIC_KEY_LABEL_SUFFIX}")
}

/// HSM login credentials
pub struct HsmCredentials {
    pub user: String,
    pub password: Zeroizing<String>,
}

#[derive(Deserialize)]
struct SecretPayload {
    #[serde(rename = "HSM_USER")]
    user: String,
    #[serde(rename = "HSM_PASSWORD")]
    password: String,
}

impl HsmCredentials {
    /// Parse the JSON secret `{"HSM_USER": "...", "HSM_PASSWORD": "..."}`
    pub fn from_secret(secret: &str) -> InterfaceResult<Self> {
        let payload: SecretPayload = serde_json::from_str(secret).map_err(|e| {
            InterfaceError::InvalidRequest(format!("invalid HSM credentials payload: {e}"))
        })?;
        Ok(Self {
            user: payload.user,
            password: Zeroizing::new(payload.password),
        })
    }
}

impl fmt::Debug for HsmCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HsmCredentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// A logged-in HSM security provider.
///
/// Calls are blocking: they round-trip to the HSM.
pub trait HsmProvider: Send + Sync {
    /// Name of the provider, for logging
    fn name(&self) -> &str;

    /// Generate an RSA key pair inside the HSM.
    ///
    /// The private key is stored under `label` and the public key under
    /// `label:public`; the private key is not extractable.
    /// # Arguments
    /// * `label` - the label of the key pair
    /// * `bits` - the size of the modulus in bits
    /// # Returns
    /// * `InterfaceResult<KeyPairHandle>` - a handle on the new key pair
    /// # Errors
    /// * `InterfaceError::LabelExists` if a key already uses that label
    /// * `InterfaceError::ProviderUnavailable` if the HSM cannot generate keys
    fn generate_rsa_key_pair(&self, label: &str, bits: u32) -> InterfaceResult<KeyPairHandle>;

    /// Get a signing handle on the private key stored under `label`.
    /// # Returns
    /// * `InterfaceResult<Option<Arc<dyn Signer>>>` - `None` if no private key uses that label
    fn private_key(&self, label: &str) -> InterfaceResult<Option<Arc<dyn Signer>>>;

    /// Delete the private key `label` and the public key `label:public`.
    ///
    /// Missing objects are ignored.
    fn destroy_key_pair(&self, label: &str) -> InterfaceResult<()>;

    /// Release the HSM login
    fn logout(&self) -> InterfaceResult<()>;
}

/// Opens a logged-in provider on an HSM partition
pub trait HsmConnector: Send + Sync {
    /// Log into `partition` with `credentials`.
    /// # Errors
    /// * `InterfaceError::AuthenticationFailed` on bad credentials
    /// * `InterfaceError::ProviderUnavailable` if the provider library cannot be loaded
    fn connect(
        &self,
        partition: &str,
        credentials: &HsmCredentials,
    ) -> InterfaceResult<Arc<dyn HsmProvider>>;
}

#[expect(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials() {
        let credentials =
            HsmCredentials::from_secret(r#"{"HSM_USER":"crypto_user","HSM_PASSWORD":"pwd"}"#)
                .unwrap();
        assert_eq!(credentials.user, "crypto_user");
        assert_eq!(credentials.password.as_str(), "pwd");
        assert!(!format!("{credentials:?}").contains("pwd"));

        assert!(matches!(
            HsmCredentials::from_secret(r#"{"HSM_USER":"crypto_user"}"#),
            Err(InterfaceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_public_key_label() {
        assert_eq!(public_key_label("invoices"), "invoices:public");
    }
}
