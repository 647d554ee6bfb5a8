mod object_store;
mod secret_store;

pub use object_store::ObjectStore;
pub use secret_store::{SecretStore, credentials_secret_name};
