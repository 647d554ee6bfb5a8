use std::{
    fmt::{self},
    path::PathBuf,
};

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{CacheConfig, HsmConfig, HttpConfig, KeyStoreConfig, LoggingConfig};
use crate::result::{SResult, SResultHelper};

/// The configuration file read when `--config` is not provided
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hsm_signer/signer.toml";

#[derive(Parser, Serialize, Deserialize, PartialEq, Eq)]
#[clap(version, about, long_about = None)]
#[serde(default)]
pub struct ClapConfig {
    /// A TOML configuration file replacing the command line arguments
    #[clap(long, env = "SIGNER_CONFIG_PATH")]
    #[serde(skip)]
    pub config: Option<PathBuf>,

    #[clap(flatten)]
    pub http: HttpConfig,

    #[clap(flatten)]
    pub hsm: HsmConfig,

    #[clap(flatten)]
    pub cache: CacheConfig,

    #[clap(flatten)]
    pub keystore: KeyStoreConfig,

    #[clap(flatten)]
    pub logging: LoggingConfig,

    /// The maximum time in seconds to sign a document
    #[clap(long, env = "SIGNER_SIGNING_TIMEOUT_SECS", default_value = "30")]
    pub signing_timeout_secs: u64,

    /// The maximum time in seconds to wait for the HSM directory,
    /// the secret store, the object store and the client configuration tool
    #[clap(verbatim_doc_comment, long, env = "SIGNER_DEPENDENCY_TIMEOUT_SECS", default_value = "30")]
    pub dependency_timeout_secs: u64,
}

impl Default for ClapConfig {
    fn default() -> Self {
        Self {
            config: None,
            http: HttpConfig::default(),
            hsm: HsmConfig::default(),
            cache: CacheConfig::default(),
            keystore: KeyStoreConfig::default(),
            logging: LoggingConfig::default(),
            signing_timeout_secs: 30,
            dependency_timeout_secs: 30,
        }
    }
}

impl ClapConfig {
    /// Parse the command line, then load the configuration file if one is
    /// given with `--config`, or if the default configuration file exists.
    ///
    /// A configuration file replaces the command line arguments entirely.
    ///
    /// # Errors
    /// Fails if the configuration file cannot be read or parsed
    pub fn load_from_file() -> SResult<Self> {
        let from_command_line = Self::parse();
        let path = match &from_command_line.config {
            Some(path) => Some(path.clone()),
            None => Some(PathBuf::from(DEFAULT_CONFIG_PATH)).filter(|p| p.exists()),
        };
        let Some(path) = path else {
            return Ok(from_command_line);
        };
        info!("Reading the configuration from {}", path.display());
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read the configuration file {}", path.display()))?;
        let mut config = Self::from_toml(&content)?;
        config.config = Some(path);
        Ok(config)
    }

    /// Parse a TOML configuration; missing entries take their default value
    pub fn from_toml(content: &str) -> SResult<Self> {
        Ok(toml::from_str(content)?)
    }
}

impl fmt::Debug for ClapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("")
            .field("config file", &self.config)
            .field("http", &self.http)
            .field("hsm", &self.hsm)
            .field("cache", &self.cache)
            .field("keystore", &self.keystore)
            .field("logging", &self.logging)
            .field("signing timeout (s)", &self.signing_timeout_secs)
            .field("dependency timeout (s)", &self.dependency_timeout_secs)
            .finish()
    }
}

#[expect(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn test_command_line_defaults() {
        let config = ClapConfig::parse_from(["hsm_signer", "--cluster-id", "cluster-1234"]);
        assert_eq!(config.hsm.cluster_id, "cluster-1234");
        assert_eq!(config.hsm.partition, "PARTITION_1");
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.cache.cache_max_items, 3000);
        assert!(!config.hsm.allow_software_fallback);
        assert_eq!(
            ClapConfig {
                config: None,
                hsm: HsmConfig {
                    cluster_id: "cluster-1234".to_owned(),
                    ..Default::default()
                },
                ..Default::default()
            },
            config
        );
    }

    #[test]
    fn test_negative_cache_values() {
        let config = ClapConfig::parse_from(["hsm_signer", "--cache-ttl-secs", "-1"]);
        assert_eq!(config.cache.cache_ttl_secs, -1);
    }

    #[test]
    fn test_toml() {
        let config = ClapConfig {
            http: HttpConfig {
                port: 9090,
                hostname: "[hostname]".to_owned(),
                max_payload_bytes: 1024,
            },
            hsm: HsmConfig {
                cluster_id: "[cluster id]".to_owned(),
                hsm_address: Some("[hsm address]".to_owned()),
                allow_software_fallback: true,
                ..Default::default()
            },
            cache: CacheConfig {
                cache_ttl_secs: 0,
                ..Default::default()
            },
            ..Default::default()
        };

        let toml_string = r#"
signing_timeout_secs = 30
dependency_timeout_secs = 30

[http]
port = 9090
hostname = "[hostname]"
max_payload_bytes = 1024

[hsm]
cluster_id = "[cluster id]"
hsm_address = "[hsm address]"
allow_software_fallback = true

[cache]
cache_ttl_secs = 0
"#;
        assert_eq!(ClapConfig::from_toml(toml_string).unwrap(), config);

        // serializing then parsing again is lossless
        let serialized = toml::to_string(&config).unwrap();
        assert_eq!(ClapConfig::from_toml(&serialized).unwrap(), config);
    }
}
