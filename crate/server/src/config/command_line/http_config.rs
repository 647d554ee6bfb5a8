use std::fmt::Display;

use clap::Args;
use serde::{Deserialize, Serialize};

#[derive(Args, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    /// The signer server port
    #[clap(long, env = "SIGNER_PORT", default_value = "8080")]
    pub port: u16,

    /// The signer server hostname
    #[clap(long, env = "SIGNER_HOSTNAME", default_value = "0.0.0.0")]
    pub hostname: String,

    /// The maximum size in bytes of a request body (an XML document)
    #[clap(long, env = "SIGNER_MAX_PAYLOAD_BYTES", default_value = "10000000")]
    pub max_payload_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            hostname: "0.0.0.0".to_owned(),
            max_payload_bytes: 10_000_000,
        }
    }
}

impl Display for HttpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "http://{}:{}", self.hostname, self.port)
    }
}

impl std::fmt::Debug for HttpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "{} (max payload: {} bytes)",
            &self, self.max_payload_bytes
        ))
    }
}
