#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{path::Path, sync::Arc, time::Duration};

use actix_http::Request;
use actix_web::{
    App,
    body::MessageBody,
    dev::{Service, ServiceResponse},
    test,
    web::{Data, PayloadConfig},
};
use hsm_signer_base_hsm::{
    HsmSession,
    test_helpers::{FixedDirectory, FixedSecretStore, MemoryConnector, MemoryHsm, credentials_secret},
};
use hsm_signer_crypto::certificate::CertificateData;
use hsm_signer_interfaces::ObjectStore;
use tempfile::TempDir;

use crate::{
    config::{CacheConfig, ClapConfig, HsmConfig, KeyStoreConfig, ServerParams},
    core::HsmSigner,
    routes::{json_config, xml::xml_scope},
    services::FileObjectStore,
    start_signer_server::Collaborators,
};

pub(crate) const MARKER: &str = "libevmulti_init: Ready !";
pub(crate) const HSM_USER: &str = "crypto_user";
pub(crate) const HSM_PASSWORD: &str = "secret";

/// A signer backed by an in-memory HSM and by a temporary directory
pub(crate) struct TestSigner {
    pub(crate) signer: Arc<HsmSigner>,
    pub(crate) hsm: Arc<MemoryHsm>,
    pub(crate) params: Arc<ServerParams>,
    pub(crate) dir: TempDir,
}

/// A client printing the readiness marker then waiting to be killed
pub(crate) fn ready_client_script() -> String {
    format!("echo 'starting'\necho '{MARKER}'\nexec sleep 60\n")
}

pub(crate) fn test_clap_config(dir: &Path) -> ClapConfig {
    ClapConfig {
        hsm: HsmConfig {
            cluster_id: "cluster-1234".to_owned(),
            region: "eu-west-1".to_owned(),
            hsm_address: Some("10.0.0.12".to_owned()),
            client_bin: "/bin/sh".into(),
            client_config: dir.join("client.sh"),
            configure_bin: None,
            client_log: dir.join("client.log"),
            readiness_timeout_secs: 5,
            ..Default::default()
        },
        cache: CacheConfig {
            cache_ttl_secs: 600,
            cache_sweep_interval_secs: 100,
            cache_max_items: 100,
        },
        keystore: KeyStoreConfig {
            keystore_file: dir.join("KeyStoreHSM"),
            object_store_root: dir.join("objects"),
            secrets_root: dir.join("secrets"),
        },
        ..Default::default()
    }
}

/// Server parameters whose HSM client runs `script` with `/bin/sh`
pub(crate) fn test_server_params(dir: &Path, script: &str) -> ServerParams {
    std::fs::write(dir.join("client.sh"), script).unwrap();
    let mut params = ServerParams::try_from(test_clap_config(dir)).unwrap();
    params.session.poll_interval = Duration::from_millis(20);
    params
}

/// Collaborators answering with the test HSM address and credentials
pub(crate) fn test_collaborators(hsm: Arc<MemoryHsm>, dir: &Path) -> Collaborators {
    Collaborators {
        directory: Box::new(FixedDirectory(Some("10.0.0.12".to_owned()))),
        secrets: Box::new(FixedSecretStore(Some(credentials_secret(
            HSM_USER,
            HSM_PASSWORD,
        )))),
        connector: Arc::new(MemoryConnector::new(hsm, HSM_USER, HSM_PASSWORD)),
        object_store: Arc::new(FileObjectStore::new(dir.join("objects"))),
    }
}

impl TestSigner {
    pub(crate) async fn new() -> Self {
        Self::with_params(|_| {}).await
    }

    /// A signer whose parameters are adjusted by `update` before it starts
    pub(crate) async fn with_params(update: impl FnOnce(&mut ServerParams)) -> Self {
        hsm_signer_logger::log_init(option_env!("RUST_LOG"));
        let dir = TempDir::new().unwrap();
        let mut params = test_server_params(dir.path(), &ready_client_script());
        update(&mut params);
        let params = Arc::new(params);
        let hsm = Arc::new(MemoryHsm::new());
        Self::start(params, hsm, dir).await
    }

    /// Start a signer on an existing HSM and directory, as a restarted server would
    pub(crate) async fn start(params: Arc<ServerParams>, hsm: Arc<MemoryHsm>, dir: TempDir) -> Self {
        let collaborators = test_collaborators(hsm.clone(), dir.path());
        let session = Arc::new(HsmSession::new(params.session.clone()));
        session
            .start(
                collaborators.directory.as_ref(),
                collaborators.secrets.as_ref(),
                collaborators.connector,
            )
            .await
            .unwrap();
        let signer = Arc::new(
            HsmSigner::instantiate(params.clone(), session, collaborators.object_store)
                .await
                .unwrap(),
        );
        Self {
            signer,
            hsm,
            params,
            dir,
        }
    }

    pub(crate) fn object_store(&self) -> Arc<dyn ObjectStore> {
        Arc::new(FileObjectStore::new(self.params.object_store_root.clone()))
    }

    /// Stop the sweeper and log out, keeping the HSM and the directory
    pub(crate) async fn stop(self) -> (Arc<MemoryHsm>, TempDir) {
        self.signer.shutdown().await;
        self.signer.session.logout().await.unwrap();
        (self.hsm, self.dir)
    }
}

pub(crate) fn certificate_data() -> CertificateData {
    CertificateData {
        common_name: "signer.example.com".to_owned(),
        organization_name: "Example Corp".to_owned(),
        organization_unit: "Signing".to_owned(),
        city: "Paris".to_owned(),
        state: "Ile-de-France".to_owned(),
        country: "FR".to_owned(),
    }
}

pub(crate) async fn test_app(
    signer: Arc<HsmSigner>,
) -> impl Service<Request, Response = ServiceResponse<impl MessageBody>, Error = actix_web::Error> {
    let max_payload_bytes = signer.params.max_payload_bytes;
    test::init_service(
        App::new()
            .app_data(Data::new(signer))
            .app_data(PayloadConfig::new(max_payload_bytes))
            .app_data(json_config(max_payload_bytes))
            .service(xml_scope()),
    )
    .await
}
