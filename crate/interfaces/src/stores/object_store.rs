use async_trait::async_trait;

use crate::InterfaceResult;

/// Remote object store holding the snapshots of the local keystore file
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download an object.
    /// # Arguments
    /// * `key` - the name of the object
    /// * `bucket` - the bucket holding the object
    /// * `region` - the region hosting the bucket
    /// # Returns
    /// * `InterfaceResult<Vec<u8>>` - the content of the object
    /// # Errors
    /// * `InterfaceError::NotFound` if the object does not exist
    /// * `InterfaceError::Dependency` if the store cannot be reached
    async fn get(&self, key: &str, bucket: &str, region: &str) -> InterfaceResult<Vec<u8>>;

    /// Upload an object, replacing any previous version.
    /// # Arguments
    /// * `key` - the name of the object
    /// * `bucket` - the bucket holding the object
    /// * `region` - the region hosting the bucket
    /// * `bytes` - the content of the object
    async fn put(&self, key: &str, bucket: &str, region: &str, bytes: Vec<u8>)
    -> InterfaceResult<()>;
}
