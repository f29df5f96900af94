//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Spawn one relay session per configured stream
//! - Create Axum Router: one route per stream path, plus the directory
//! - Wire up middleware (tracing)
//! - Serve over plain TCP or TLS
//! - On shutdown, end every viewer so streaming responses can finish

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, response::Response, routing::get, Router};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::config::{validate_config, RelayConfig};
use crate::error::{RelayError, RelayResult};
use crate::http::directory::{directory_handler, DirectoryEntry};
use crate::http::response;
use crate::relay::{RelaySession, SessionHandle};

/// How long TLS connections get to drain after shutdown.
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP server for the MJPEG relay.
pub struct HttpServer {
    router: Router,
    sessions: Vec<SessionHandle>,
}

impl HttpServer {
    /// Create the server and spawn a relay session for every stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: RelayConfig) -> RelayResult<Self> {
        validate_config(&config).map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            RelayError::Configuration(messages.join("; "))
        })?;

        let mut entries = Vec::with_capacity(config.streams.len());
        for stream in &config.streams {
            let session = RelaySession::from_config(
                stream,
                &config.retries,
                &config.timeouts,
                &config.viewers,
            )?;
            tracing::info!(
                stream = %stream.name,
                path = %stream.path,
                source = stream.url.as_deref().unwrap_or_default(),
                "Relay configured"
            );
            entries.push(DirectoryEntry {
                path: stream.path.clone(),
                source: stream.url.clone().unwrap_or_default(),
                session,
            });
        }

        let sessions = entries.iter().map(|e| e.session.clone()).collect();
        let router = Self::build_router(&config, entries);
        Ok(Self { router, sessions })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &RelayConfig, entries: Vec<DirectoryEntry>) -> Router {
        let mut router = Router::new();
        for entry in &entries {
            router = router.route(
                &entry.path,
                get(viewer_handler).with_state(entry.session.clone()),
            );
        }
        if config.directory.enabled {
            router = router.route("/", get(directory_handler).with_state(Arc::new(entries)));
        }
        router.layer(TraceLayer::new_for_http())
    }

    /// The configured router, for serving through other front ends.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn sessions(&self) -> &[SessionHandle] {
        &self.sessions
    }

    /// Run the server on a plain TCP listener until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, streams = self.sessions.len(), "HTTP server starting");

        let sessions = self.sessions;
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                close_sessions(&sessions);
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run the server over TLS until `shutdown` fires.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, streams = self.sessions.len(), "HTTPS server starting");

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        let sessions = self.sessions;
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            close_sessions(&sessions);
            shutdown_handle.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
        });

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.router.into_make_service())
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

fn close_sessions(sessions: &[SessionHandle]) {
    tracing::info!("Shutdown signal received, closing viewers");
    for session in sessions {
        session.shutdown();
    }
}

/// Accept a viewer on the stream bound to this route.
async fn viewer_handler(State(session): State<SessionHandle>) -> Response {
    tracing::debug!(stream = %session.name(), "New viewer request received");
    match session.handle_viewer().await {
        Ok(stream) => {
            tracing::debug!(stream = %session.name(), viewer = %stream.id(), "Sending stream to viewer");
            response::viewer_response(stream)
        }
        Err(e) => {
            tracing::debug!(stream = %session.name(), error = %e, "Viewer not admitted");
            response::admission_failed(&e)
        }
    }
}
