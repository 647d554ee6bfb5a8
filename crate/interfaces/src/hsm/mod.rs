mod directory;
mod interface;

pub use directory::HsmDirectory;
pub use interface::{
    HsmConnector, HsmCredentials, HsmProvider, PUBLIC_KEY_LABEL_SUFFIX, public_key_label,
};
