mod command_line;
mod params;

pub use command_line::{
    CacheConfig, ClapConfig, DEFAULT_CONFIG_PATH, HsmConfig, HttpConfig, KeyStoreConfig,
    LoggingConfig,
};
pub use params::{CacheParams, ServerParams, SnapshotLocation};
