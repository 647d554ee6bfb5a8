//! Local implementations of the external collaborators: the HSM directory,
//! the secret store and the object store.

mod file_object_store;
mod file_secret_store;
mod static_directory;

pub use file_object_store::FileObjectStore;
pub use file_secret_store::FileSecretStore;
pub use static_directory::StaticDirectory;
