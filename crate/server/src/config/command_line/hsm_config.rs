use std::path::PathBuf;

use clap::Args;
use serde::{Deserialize, Serialize};

const CLIENT_BIN_DEFAULT: &str = "/opt/cloudhsm/bin/cloudhsm_client";
const CLIENT_CONFIG_DEFAULT: &str = "/opt/cloudhsm/etc/cloudhsm_client.cfg";
const CONFIGURE_BIN_DEFAULT: &str = "/opt/cloudhsm/bin/configure";
const CLIENT_LOG_DEFAULT: &str = "/tmp/client.log";
const READINESS_MARKER_DEFAULT: &str = "libevmulti_init: Ready !";
const PKCS11_LIB_DEFAULT: &str = "/opt/cloudhsm/lib/libcloudhsm_pkcs11.so";

#[derive(Debug, Args, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HsmConfig {
    /// The identifier of the HSM cluster
    #[clap(long, env = "SIGNER_HSM_CLUSTER_ID", default_value = "")]
    pub cluster_id: String,

    /// The region hosting the HSM cluster, its secrets and its keystore bucket
    #[clap(long, env = "SIGNER_HSM_REGION", default_value = "us-east-1")]
    pub region: String,

    /// The HSM partition to log into
    #[clap(long, env = "SIGNER_HSM_PARTITION", default_value = "PARTITION_1")]
    pub partition: String,

    /// The network address of the HSM of the cluster, as published by the HSM directory
    #[clap(long, env = "SIGNER_HSM_ADDRESS")]
    pub hsm_address: Option<String>,

    /// The HSM client executable
    #[clap(long, env = "SIGNER_HSM_CLIENT_BIN", default_value = CLIENT_BIN_DEFAULT)]
    pub client_bin: PathBuf,

    /// The configuration file passed to the HSM client
    #[clap(long, env = "SIGNER_HSM_CLIENT_CONFIG", default_value = CLIENT_CONFIG_DEFAULT)]
    pub client_config: PathBuf,

    /// The tool pointing the client configuration at the HSM address.
    /// Set an empty path to skip this step
    #[clap(
        verbatim_doc_comment,
        long,
        env = "SIGNER_HSM_CONFIGURE_BIN",
        default_value = CONFIGURE_BIN_DEFAULT
    )]
    pub configure_bin: Option<PathBuf>,

    /// The file receiving the output of the HSM client
    #[clap(long, env = "SIGNER_HSM_CLIENT_LOG", default_value = CLIENT_LOG_DEFAULT)]
    pub client_log: PathBuf,

    /// The log line announcing that the HSM client is ready
    #[clap(long, env = "SIGNER_HSM_READINESS_MARKER", default_value = READINESS_MARKER_DEFAULT)]
    pub readiness_marker: String,

    /// The maximum time in seconds to wait for the readiness of the HSM client
    #[clap(long, env = "SIGNER_HSM_READINESS_TIMEOUT_SECS", default_value = "60")]
    pub readiness_timeout_secs: u64,

    /// The PKCS#11 library of the HSM
    #[clap(long, env = "SIGNER_HSM_PKCS11_LIB", default_value = PKCS11_LIB_DEFAULT)]
    pub pkcs11_lib: PathBuf,

    /// The size in bits of the generated RSA keys
    #[clap(long, env = "SIGNER_HSM_KEY_SIZE_BITS", default_value = "2048")]
    pub key_size_bits: u32,

    /// Generate a software key pair when the HSM provider is unavailable.
    /// Such keys are stored encrypted in the keystore, outside of the HSM
    #[clap(
        verbatim_doc_comment,
        long,
        env = "SIGNER_HSM_ALLOW_SOFTWARE_FALLBACK",
        default_value = "false"
    )]
    pub allow_software_fallback: bool,
}

impl Default for HsmConfig {
    fn default() -> Self {
        Self {
            cluster_id: String::new(),
            region: "us-east-1".to_owned(),
            partition: "PARTITION_1".to_owned(),
            hsm_address: None,
            client_bin: PathBuf::from(CLIENT_BIN_DEFAULT),
            client_config: PathBuf::from(CLIENT_CONFIG_DEFAULT),
            configure_bin: Some(PathBuf::from(CONFIGURE_BIN_DEFAULT)),
            client_log: PathBuf::from(CLIENT_LOG_DEFAULT),
            readiness_marker: READINESS_MARKER_DEFAULT.to_owned(),
            readiness_timeout_secs: 60,
            pkcs11_lib: PathBuf::from(PKCS11_LIB_DEFAULT),
            key_size_bits: 2048,
            allow_software_fallback: false,
        }
    }
}
