use clap::Args;
use serde::{Deserialize, Serialize};

/// Cache of the resolved key pairs.
/// A value lower or equal to zero disables the corresponding feature.
#[derive(Debug, Args, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Idle time in seconds after which a cached key pair is evicted
    #[clap(
        long,
        env = "SIGNER_CACHE_TTL_SECS",
        default_value = "600",
        allow_negative_numbers = true
    )]
    pub cache_ttl_secs: i64,

    /// Interval in seconds between two sweeps of the idle entries
    #[clap(
        long,
        env = "SIGNER_CACHE_SWEEP_INTERVAL_SECS",
        default_value = "100",
        allow_negative_numbers = true
    )]
    pub cache_sweep_interval_secs: i64,

    /// Maximum number of cached key pairs
    #[clap(
        long,
        env = "SIGNER_CACHE_MAX_ITEMS",
        default_value = "3000",
        allow_negative_numbers = true
    )]
    pub cache_max_items: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 600,
            cache_sweep_interval_secs: 100,
            cache_max_items: 3000,
        }
    }
}
