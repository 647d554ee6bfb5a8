mod cache;
mod key_manager;
mod keystore;
mod signer;

pub use signer::HsmSigner;
