mod error;
mod hsm;
mod stores;

pub use error::{InterfaceError, InterfaceResult};
pub use hsm::{
    HsmConnector, HsmCredentials, HsmDirectory, HsmProvider, PUBLIC_KEY_LABEL_SUFFIX,
    public_key_label,
};
pub use stores::{ObjectStore, SecretStore, credentials_secret_name};
