//! HTTP surface: the push endpoint, the pull endpoint, and their lifecycle.
//!
//! # Endpoints
//!
//! - `GET /live/{runID}` - WebSocket upgrade; producers and viewers of a run
//! - `GET /runs/logs` - Server-Sent Events tail of a run's log (`X-RUN-ID` header)
//! - `GET /health` - Liveness check
//!
//! # Example
//!
//! ```ignore
//! let server = LiveServer::bind(Config::load(None)?).await?;
//! server.serve(cancel_token).await?;
//! ```

pub mod live;
pub mod logs;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

use crate::config::Config;
use crate::constants;
use crate::hub::{Hub, HubConfig, HubHandle};
use crate::log_store::LogStore;
use crate::tail::TailOptions;

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Hub for the push path.
    pub hub: HubHandle,
    /// Per-run log files.
    pub store: Arc<LogStore>,
    /// Effective configuration.
    pub config: Arc<Config>,
    /// Fires when the server is shutting down.
    pub cancel: CancellationToken,
    /// Upgraded WebSocket connections, awaited on shutdown.
    pub connections: TaskTracker,
}

impl AppState {
    /// Tail settings derived from the configuration.
    #[must_use]
    pub fn tail_options(&self) -> TailOptions {
        TailOptions {
            poll_interval: self.config.poll_interval(),
            pacing: self.config.pacing(),
            fs_events: self.config.fs_events,
        }
    }
}

/// Build the router over `state`.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    Router::new()
        .route("/live/{run_id}", get(live::upgrade))
        .route(constants::LOGS_PATH, get(logs::stream))
        .route("/runs/logs/", get(logs::stream))
        .route("/health", get(health_check))
        .fallback(not_found)
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origin = HeaderValue::from_str(&config.allowed_origin).unwrap_or_else(|_| {
        log::warn!(
            "[Server] Invalid allowed origin {:?}, using {}",
            config.allowed_origin,
            constants::DEFAULT_ALLOWED_ORIGIN
        );
        HeaderValue::from_static(constants::DEFAULT_ALLOWED_ORIGIN)
    });

    CorsLayer::new()
        .allow_origin(AllowOrigin::exact(origin))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

async fn health_check() -> &'static str {
    "ok"
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found. Use /live/:run-id")
}

/// Bound, not yet serving, HTTP server.
///
/// The hub starts at bind time so callers can observe membership before
/// and while the server runs.
#[derive(Debug)]
pub struct LiveServer {
    listener: TcpListener,
    config: Arc<Config>,
    hub: HubHandle,
    hub_join: JoinHandle<()>,
    hub_cancel: CancellationToken,
}

impl LiveServer {
    /// Bind the configured address.
    pub async fn bind(config: Config) -> Result<Self> {
        let addr = config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;

        let hub_cancel = CancellationToken::new();
        let (hub, hub_join) = Hub::start(HubConfig::from(&config), hub_cancel.clone());
        Ok(Self {
            listener,
            config: Arc::new(config),
            hub,
            hub_join,
            hub_cancel,
        })
    }

    /// Handle to this server's hub.
    #[must_use]
    pub fn hub(&self) -> HubHandle {
        self.hub.clone()
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `cancel` fires, then drain.
    ///
    /// Shutdown order: stop accepting, let open connections see the
    /// cancellation and unregister, then stop the hub and wait for its
    /// deliveries.
    pub async fn serve(self, cancel: CancellationToken) -> Result<()> {
        let Self {
            listener,
            config,
            hub,
            hub_join,
            hub_cancel,
        } = self;
        let cancel = cancel.child_token();
        let addr = listener.local_addr()?;

        let store = Arc::new(LogStore::new(
            config.log_dir.clone(),
            config.log_extension.clone(),
            config.sentinel.clone(),
        ));
        let connections = TaskTracker::new();

        let state = AppState {
            hub,
            store,
            config: Arc::clone(&config),
            cancel: cancel.clone(),
            connections: connections.clone(),
        };

        log::info!(
            "[Server] Listening on {addr} (logs in {})",
            config.log_dir.display()
        );
        let result = axum::serve(listener, build_router(state))
            .with_graceful_shutdown(cancel.clone().cancelled_owned())
            .await;

        // Also covers the server exiting on its own
        cancel.cancel();
        log::info!("[Server] Stopped accepting, draining connections");

        connections.close();
        let grace = config.shutdown_grace();
        if tokio::time::timeout(grace, connections.wait()).await.is_err() {
            log::warn!(
                "[Server] {} connections still open after {:?}",
                connections.len(),
                grace
            );
        }

        hub_cancel.cancel();
        if let Err(e) = hub_join.await {
            log::error!("[Server] Hub task failed: {e}");
        }
        log::info!("[Server] Shutdown complete");

        result.context("HTTP server error")
    }
}
