//! Startup orchestration.
//!
//! # Responsibilities
//! - Spawn one relay session per configured stream
//! - Load TLS material when configured
//! - Bind the listener and serve until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when sessions exist)

use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::net::load_tls_config;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {address}: {source}")]
    Bind { address: String, source: io::Error },

    #[error("failed to load TLS material: {0}")]
    Tls(io::Error),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("server error: {0}")]
    Serve(io::Error),
}

/// Start every relay and serve viewers until `shutdown` is triggered.
pub async fn serve(config: RelayConfig, shutdown: &Shutdown) -> Result<(), StartupError> {
    let address = config.listener.bind_address.clone();
    let tls = config.listener.tls.clone();
    let server = HttpServer::new(config)?;

    match tls {
        Some(tls) => {
            let addr: SocketAddr = address.parse().map_err(|e| StartupError::Bind {
                address: address.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, e),
            })?;
            let rustls = load_tls_config(&tls).await.map_err(StartupError::Tls)?;
            server
                .run_tls(addr, rustls, shutdown.subscribe())
                .await
                .map_err(StartupError::Serve)
        }
        None => {
            let listener = TcpListener::bind(&address)
                .await
                .map_err(|source| StartupError::Bind {
                    address: address.clone(),
                    source,
                })?;
            tracing::info!(address = %address, "Listening for viewers");
            server
                .run(listener, shutdown.subscribe())
                .await
                .map_err(StartupError::Serve)
        }
    }
}
