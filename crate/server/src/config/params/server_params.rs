use std::{fmt, num::NonZeroUsize, path::PathBuf, time::Duration};

use hsm_signer_base_hsm::SessionConfig;

use crate::{
    config::ClapConfig,
    error::SignerError,
    result::SResult,
    signer_ensure,
};

/// Delay between two reads of the HSM client log once its end is reached
const CLIENT_LOG_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where the keystore snapshots are stored in the object store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLocation {
    pub bucket: String,
    pub key: String,
    pub region: String,
}

impl SnapshotLocation {
    /// The bucket holding the keystore snapshot of a cluster
    #[must_use]
    pub fn bucket_name(cluster_id: &str) -> String {
        format!("keystore-{cluster_id}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheParams {
    /// `None` for an unbounded cache
    pub capacity: Option<NonZeroUsize>,
    /// `None` disables the expiry sweeper
    pub ttl: Option<Duration>,
    pub sweep_interval: Option<Duration>,
}

/// The runtime parameters of the signer, validated from a [`ClapConfig`]
pub struct ServerParams {
    pub hostname: String,
    pub port: u16,
    pub max_payload_bytes: usize,

    pub session: SessionConfig,
    /// Static answer of the HSM directory
    pub hsm_address: Option<String>,
    pub pkcs11_lib: PathBuf,
    pub key_size_bits: u32,
    pub allow_software_fallback: bool,

    pub cache: CacheParams,

    pub keystore_file: PathBuf,
    pub snapshot: SnapshotLocation,
    pub object_store_root: PathBuf,
    pub secrets_root: PathBuf,

    pub signing_timeout: Duration,
    pub dependency_timeout: Duration,
}

/// Upper bound of every configured duration: one year
const MAX_DURATION_SECS: u64 = 365 * 24 * 3600;

/// `None` for a value ≤ 0, an error above [`MAX_DURATION_SECS`]
fn positive_secs(name: &str, value: i64) -> SResult<Option<Duration>> {
    let Some(secs) = u64::try_from(value).ok().filter(|secs| *secs > 0) else {
        return Ok(None);
    };
    bounded_secs(name, secs).map(Some)
}

fn bounded_secs(name: &str, secs: u64) -> SResult<Duration> {
    signer_ensure!(
        secs <= MAX_DURATION_SECS,
        SignerError::InvalidRequest(format!(
            "{name} of {secs} seconds exceeds the maximum of {MAX_DURATION_SECS} seconds"
        ))
    );
    Ok(Duration::from_secs(secs))
}

impl TryFrom<ClapConfig> for ServerParams {
    type Error = SignerError;

    fn try_from(conf: ClapConfig) -> SResult<Self> {
        let hsm = conf.hsm;
        signer_ensure!(
            !hsm.cluster_id.trim().is_empty(),
            SignerError::InvalidRequest("the HSM cluster identifier is required".to_owned())
        );
        signer_ensure!(
            hsm.key_size_bits >= 2048,
            SignerError::InvalidRequest(format!(
                "RSA keys of {} bits are too small",
                hsm.key_size_bits
            ))
        );
        signer_ensure!(
            conf.signing_timeout_secs > 0 && conf.dependency_timeout_secs > 0,
            SignerError::InvalidRequest("timeouts must be positive".to_owned())
        );
        let dependency_timeout =
            bounded_secs("the dependency timeout", conf.dependency_timeout_secs)?;
        let signing_timeout = bounded_secs("the signing timeout", conf.signing_timeout_secs)?;
        let readiness_timeout =
            bounded_secs("the readiness timeout", hsm.readiness_timeout_secs)?;

        let keystore_key = conf
            .keystore
            .keystore_file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                SignerError::InvalidRequest(format!(
                    "invalid keystore file: {}",
                    conf.keystore.keystore_file.display()
                ))
            })?;

        let cache = CacheParams {
            capacity: usize::try_from(conf.cache.cache_max_items)
                .ok()
                .and_then(NonZeroUsize::new),
            ttl: positive_secs("the cache TTL", conf.cache.cache_ttl_secs)?,
            sweep_interval: positive_secs(
                "the cache sweep interval",
                conf.cache.cache_sweep_interval_secs,
            )?,
        };

        let session = SessionConfig {
            cluster_id: hsm.cluster_id.clone(),
            region: hsm.region.clone(),
            partition: hsm.partition,
            client_bin: hsm.client_bin,
            client_args: vec![hsm.client_config.to_string_lossy().into_owned()],
            configure_bin: hsm
                .configure_bin
                .filter(|path| !path.as_os_str().is_empty()),
            client_log: hsm.client_log,
            readiness_marker: hsm.readiness_marker,
            readiness_timeout,
            dependency_timeout,
            poll_interval: CLIENT_LOG_POLL_INTERVAL,
        };

        Ok(Self {
            hostname: conf.http.hostname,
            port: conf.http.port,
            max_payload_bytes: conf.http.max_payload_bytes,
            session,
            hsm_address: hsm.hsm_address,
            pkcs11_lib: hsm.pkcs11_lib,
            key_size_bits: hsm.key_size_bits,
            allow_software_fallback: hsm.allow_software_fallback,
            cache,
            snapshot: SnapshotLocation {
                bucket: SnapshotLocation::bucket_name(&hsm.cluster_id),
                key: keystore_key,
                region: hsm.region,
            },
            keystore_file: conf.keystore.keystore_file,
            object_store_root: conf.keystore.object_store_root,
            secrets_root: conf.keystore.secrets_root,
            signing_timeout,
            dependency_timeout,
        })
    }
}

impl fmt::Debug for ServerParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("")
            .field("http", &format!("http://{}:{}", self.hostname, self.port))
            .field("cluster", &self.session.cluster_id)
            .field("region", &self.session.region)
            .field("partition", &self.session.partition)
            .field("hsm client", &self.session.client_bin)
            .field("hsm address", &self.hsm_address)
            .field("pkcs11 library", &self.pkcs11_lib)
            .field("key size", &self.key_size_bits)
            .field("software fallback", &self.allow_software_fallback)
            .field("cache", &self.cache)
            .field("keystore file", &self.keystore_file)
            .field("keystore snapshot", &self.snapshot)
            .field("signing timeout", &self.signing_timeout)
            .finish_non_exhaustive()
    }
}

#[expect(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, HsmConfig};

    fn clap_config() -> ClapConfig {
        ClapConfig {
            hsm: HsmConfig {
                cluster_id: "cluster-1234".to_owned(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_server_params() {
        let params = ServerParams::try_from(clap_config()).unwrap();
        assert_eq!(params.snapshot.bucket, "keystore-cluster-1234");
        assert_eq!(params.snapshot.key, "KeyStoreHSM");
        assert_eq!(params.snapshot.region, "us-east-1");
        assert_eq!(
            params.session.client_args,
            vec!["/opt/cloudhsm/etc/cloudhsm_client.cfg".to_owned()]
        );
        assert_eq!(params.cache.capacity, NonZeroUsize::new(3000));
        assert_eq!(params.cache.ttl, Some(Duration::from_secs(600)));
        assert_eq!(params.cache.sweep_interval, Some(Duration::from_secs(100)));
    }

    #[test]
    fn test_disabled_cache_features() {
        let mut config = clap_config();
        config.cache = CacheConfig {
            cache_ttl_secs: 0,
            cache_sweep_interval_secs: -5,
            cache_max_items: -1,
        };
        config.hsm.configure_bin = Some(PathBuf::new());
        let params = ServerParams::try_from(config).unwrap();
        assert_eq!(params.cache.capacity, None);
        assert_eq!(params.cache.ttl, None);
        assert_eq!(params.cache.sweep_interval, None);
        assert_eq!(params.session.configure_bin, None);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            ServerParams::try_from(ClapConfig::default()),
            Err(SignerError::InvalidRequest(_))
        ));
        let mut config = clap_config();
        config.hsm.key_size_bits = 1024;
        ServerParams::try_from(config).unwrap_err();
    }

    #[test]
    fn test_oversized_durations() {
        let mut config = clap_config();
        config.cache.cache_sweep_interval_secs = i64::MAX - 1;
        assert!(matches!(
            ServerParams::try_from(config),
            Err(SignerError::InvalidRequest(m)) if m.contains("sweep interval")
        ));

        let mut config = clap_config();
        config.cache.cache_ttl_secs = i64::MAX;
        ServerParams::try_from(config).unwrap_err();

        let mut config = clap_config();
        config.signing_timeout_secs = u64::MAX;
        ServerParams::try_from(config).unwrap_err();

        let mut config = clap_config();
        config.cache.cache_sweep_interval_secs = i64::try_from(MAX_DURATION_SECS).unwrap();
        let params = ServerParams::try_from(config).unwrap();
        assert_eq!(
            params.cache.sweep_interval,
            Some(Duration::from_secs(MAX_DURATION_SECS))
        );
    }
}
