//! `serve` command: run the server until a termination signal arrives.

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::server::LiveServer;

/// Bind, serve, and shut down cleanly on SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    let server = LiveServer::bind(config).await?;
    let cancel = CancellationToken::new();

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        log::info!("[Server] Shutdown signal received");
        signal_cancel.cancel();
    });

    server.serve(cancel).await
}

/// Resolves on the first SIGINT (Ctrl+C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("[Server] Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log::error!("[Server] Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
