use std::sync::Arc;

use dotenvy::dotenv;
use hsm_signer_logger::log_init;
use hsm_signer_server::{
    config::{ClapConfig, ServerParams},
    result::SResult,
    start_signer_server::{Collaborators, start_signer_server},
};
use tracing::{debug, info, span};

/// The main entrypoint of the program.
///
/// This function sets up the necessary environment variables and logging options,
/// then parses the command line arguments and the configuration file using
/// [`ClapConfig::load_from_file`].
#[tokio::main]
async fn main() -> SResult<()> {
    // Set up environment variables and logging options
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info,hsm_signer=info,actix_web=info");
        }
    }

    // Load variable from a .env file
    dotenv().ok();

    let clap_config = ClapConfig::load_from_file()?;

    if let Some(rust_log) = &clap_config.logging.rust_log {
        unsafe {
            std::env::set_var("RUST_LOG", rust_log);
        }
    }
    log_init(None);

    let span = span!(tracing::Level::INFO, "start");
    let _guard = span.enter();

    info!(
        "OpenSSL version: {}, in {}, number: {:x}",
        openssl::version::version(),
        openssl::version::dir(),
        openssl::version::number()
    );

    // Instantiate a config object using the env variables and the args of the binary
    debug!("Command line config: {clap_config:#?}");

    // Parse the Server Config from the command line arguments
    let server_params = Arc::new(ServerParams::try_from(clap_config)?);
    let collaborators = Collaborators::from_params(&server_params);

    Box::pin(start_signer_server(server_params, collaborators, None)).await
}
