use std::path::PathBuf;

use clap::Args;
use serde::{Deserialize, Serialize};

#[derive(Debug, Args, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct KeyStoreConfig {
    /// The local keystore file, also the name of its snapshot in the object store
    #[clap(long, env = "SIGNER_KEYSTORE_FILE", default_value = "KeyStoreHSM")]
    pub keystore_file: PathBuf,

    /// The directory holding the object store buckets
    #[clap(
        long,
        env = "SIGNER_OBJECT_STORE_ROOT",
        default_value = "/var/lib/hsm_signer/objects"
    )]
    pub object_store_root: PathBuf,

    /// The directory holding the secrets, one file per secret name
    #[clap(
        long,
        env = "SIGNER_SECRETS_ROOT",
        default_value = "/var/lib/hsm_signer/secrets"
    )]
    pub secrets_root: PathBuf,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            keystore_file: PathBuf::from("KeyStoreHSM"),
            object_store_root: PathBuf::from("/var/lib/hsm_signer/objects"),
            secrets_root: PathBuf::from("/var/lib/hsm_signer/secrets"),
        }
    }
}
