use std::sync::{Arc, mpsc};

use actix_web::{
    App, HttpServer,
    dev::ServerHandle,
    web::{Data, PayloadConfig},
};
use hsm_signer_base_hsm::{HsmSession, Pkcs11Connector};
use hsm_signer_interfaces::{HsmConnector, HsmDirectory, ObjectStore, SecretStore};
use tracing::{error, info, warn};

use crate::{
    config::ServerParams,
    core::HsmSigner,
    error::SignerError,
    result::{SResult, SResultHelper},
    routes::{json_config, xml::xml_scope},
    services::{FileObjectStore, FileSecretStore, StaticDirectory},
};

/// The external collaborators of the signer
pub struct Collaborators {
    pub directory: Box<dyn HsmDirectory>,
    pub secrets: Box<dyn SecretStore>,
    pub connector: Arc<dyn HsmConnector>,
    pub object_store: Arc<dyn ObjectStore>,
}

impl Collaborators {
    /// The collaborators described by the server parameters:
    /// configured HSM address, file based secret and object stores, PKCS#11 library
    #[must_use]
    pub fn from_params(params: &ServerParams) -> Self {
        Self {
            directory: Box::new(StaticDirectory::new(params.hsm_address.clone())),
            secrets: Box::new(FileSecretStore::new(params.secrets_root.clone())),
            connector: Arc::new(Pkcs11Connector::new(params.pkcs11_lib.clone())),
            object_store: Arc::new(FileObjectStore::new(params.object_store_root.clone())),
        }
    }
}

/// Start the HSM session, then serve the signer until the server is stopped
/// or the HSM client exits.
///
/// The handle of the HTTP server is sent on `server_handle_tx` once it is bound.
pub async fn start_signer_server(
    server_params: Arc<ServerParams>,
    collaborators: Collaborators,
    server_handle_tx: Option<mpsc::Sender<ServerHandle>>,
) -> SResult<()> {
    let session = Arc::new(HsmSession::new(server_params.session.clone()));
    if let Err(e) = session
        .start(
            collaborators.directory.as_ref(),
            collaborators.secrets.as_ref(),
            collaborators.connector,
        )
        .await
    {
        if e.is_authentication_failure() {
            error!("start signer server: the HSM rejected the credentials");
        }
        return Err(e.into());
    }

    let res = serve(
        server_params,
        session.clone(),
        collaborators.object_store,
        server_handle_tx,
    )
    .await;

    if let Err(e) = session.logout().await {
        warn!("start signer server: HSM logout failed: {e}");
    }
    res
}

async fn serve(
    server_params: Arc<ServerParams>,
    session: Arc<HsmSession>,
    object_store: Arc<dyn ObjectStore>,
    server_handle_tx: Option<mpsc::Sender<ServerHandle>>,
) -> SResult<()> {
    let signer = Arc::new(
        HsmSigner::instantiate(server_params.clone(), session.clone(), object_store)
            .await
            .context("start signer server: failed instantiating the signer")?,
    );

    info!("HSM signer configuration: {server_params:#?}");
    let server = match prepare_signer_server(signer.clone()) {
        Ok(server) => server,
        Err(e) => {
            signer.shutdown().await;
            return Err(e);
        }
    };
    if let Some(tx) = &server_handle_tx {
        if let Err(e) = tx.send(server.handle()) {
            signer.shutdown().await;
            return Err(e.into());
        }
    }

    // stop serving as soon as the HSM client dies
    let handle = server.handle();
    let watchdog = tokio::spawn(async move {
        let status = session.wait_for_client_exit().await;
        if status.is_some() {
            handle.stop(true).await;
        }
        status
    });

    info!(
        "Starting the HSM signer server on {}:{}...",
        server_params.hostname, server_params.port
    );
    let res = server.await.map_err(SignerError::from);

    signer.shutdown().await;
    if let Err(e) = signer.session.logout().await {
        warn!("HSM logout failed: {e}");
    }
    match watchdog.await? {
        Some(status) => Err(SignerError::SessionFault(format!(
            "the HSM client {status}"
        ))),
        None => res,
    }
}

/// Build the HTTP server of the signer
pub(crate) fn prepare_signer_server(signer: Arc<HsmSigner>) -> SResult<actix_web::dev::Server> {
    let address = (signer.params.hostname.clone(), signer.params.port);
    let max_payload_bytes = signer.params.max_payload_bytes;
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(signer.clone()))
            .app_data(PayloadConfig::new(max_payload_bytes))
            .app_data(json_config(max_payload_bytes))
            .service(xml_scope())
    })
    .bind(address)?
    .run();
    Ok(server)
}
