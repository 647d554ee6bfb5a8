mod cache_config;
mod clap_config;
mod hsm_config;
mod http_config;
mod keystore_config;
mod logging;

pub use cache_config::CacheConfig;
pub use clap_config::{ClapConfig, DEFAULT_CONFIG_PATH};
pub use hsm_config::HsmConfig;
pub use http_config::HttpConfig;
pub use keystore_config::KeyStoreConfig;
pub use logging::LoggingConfig;
