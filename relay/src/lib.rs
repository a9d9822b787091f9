pub mod config;
pub mod delivery;
pub mod errors;
pub mod handler;
pub mod metrics_defs;
pub mod payload;
pub mod receipt;
pub mod service;
pub mod test_signal;

#[cfg(test)]
mod testutils;

use errors::RelayError;
use handler::RelayHandler;
use service::RelayService;
use shared::http::run_http_service;
use std::sync::Arc;

/// Serves the relay. Only returns if the handler or listener cannot be set up.
pub async fn run(config: config::Config) -> Result<(), RelayError> {
    config.validate()?;

    let host = config.listener.host.clone();
    let port = config.listener.port;
    let handler = Arc::new(RelayHandler::new(config)?);

    tracing::info!(
        downstream = handler.forwarder().target_url(),
        environment = handler.config().environment.as_str(),
        "Starting webhook relay"
    );

    run_http_service(&host, port, move |peer| {
        RelayService::new(handler.clone(), Some(peer))
    })
    .await
}
