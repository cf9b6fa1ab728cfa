//! Push endpoint: `GET /live/{runID}`.
//!
//! Every upgraded connection is both a producer and a viewer of its run.
//! Text frames it sends are appended to the run's log file and fanned out
//! through the hub to the run's other connections; frames from those
//! connections arrive on its write half via [`WsPeerSink`].
//!
//! One task per connection drives the read loop. Whatever ends it (a close
//! frame, a read error, the stream ending, or server shutdown) the task
//! unregisters from the hub and closes the socket before returning.

// Rust guideline compliant 2026-02

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;

use super::AppState;
use crate::hub::{self, ConnectionId, DeliveryError, HubError, HubHandle, Peer, PeerSink, Unregistered};
use crate::run_id::RunId;

/// Write half of an upgraded connection, as seen by the hub.
pub struct WsPeerSink {
    tx: Mutex<SplitSink<WebSocket, Message>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for WsPeerSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsPeerSink")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl WsPeerSink {
    fn new(tx: SplitSink<WebSocket, Message>) -> Self {
        Self {
            tx: Mutex::new(tx),
            closed: AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl PeerSink for WsPeerSink {
    async fn send_text(&self, payload: &str) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        let mut tx = self.tx.lock().await;
        match tx.send(Message::Text(payload.into())).await {
            Ok(()) => Ok(()),
            Err(_) if self.is_closed() => Err(DeliveryError::Closed),
            Err(e) => Err(DeliveryError::Io(e.to_string())),
        }
    }

    async fn close(&self, code: u16, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut tx = self.tx.lock().await;
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        if let Err(e) = tx.send(Message::Close(Some(frame))).await {
            log::trace!("[Live] Close frame not sent: {e}");
        }
        let _ = tx.close().await;
    }
}

/// Why a read loop ended.
#[derive(Debug)]
enum Exit {
    /// Peer sent a close frame.
    Closed(Option<u16>),
    /// Stream ended without a close frame.
    Ended,
    /// Server is shutting down.
    Cancelled,
    /// Transport error.
    Error(axum::Error),
}

impl Exit {
    fn log(&self, id: ConnectionId, run: &RunId) {
        match self {
            Self::Closed(None | Some(close_code::NORMAL | close_code::AWAY)) => {
                log::info!("[Live] {id} disconnected from run {run}");
            }
            Self::Closed(Some(code)) => {
                log::info!("[Live] {id} closed run {run} with status {code}");
            }
            Self::Ended => log::info!("[Live] {id} connection ended for run {run}"),
            Self::Cancelled => {
                log::info!("[Live] {id} read cancelled for run {run}, server shutting down");
            }
            Self::Error(e) => log::error!("[Live] {id} read error for run {run}: {e}"),
        }
    }

    fn close_frame(&self) -> (u16, &'static str) {
        match self {
            Self::Cancelled => (close_code::AWAY, "Server shutting down"),
            _ => (close_code::NORMAL, "Read loop finished"),
        }
    }
}

/// Validate the run id, then upgrade.
pub(crate) async fn upgrade(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let run = match RunId::parse(&raw) {
        Ok(run) => run,
        Err(e) => {
            log::warn!("[Live] Rejected run id {raw:?}: {e}");
            return (StatusCode::BAD_REQUEST, format!("Invalid run id: {e}")).into_response();
        }
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    log::info!("[Live] Incoming connection for run {run}");
    let tracker = state.connections.clone();
    ws.on_upgrade(move |socket| tracker.track_future(serve_connection(state, run, socket)))
}

async fn serve_connection(state: AppState, run: RunId, socket: WebSocket) {
    let (tx, mut rx) = socket.split();
    let sink = Arc::new(WsPeerSink::new(tx));
    let peer = Peer::new(Arc::clone(&sink) as Arc<dyn PeerSink>);
    let id = peer.id();

    match state.hub.register(run.clone(), peer).await {
        Ok(count) => log::info!("[Live] {id} registered on run {run} ({count} connected)"),
        Err(HubError::ShuttingDown) => {
            log::warn!("[Live] Server shutting down, closing new connection for run {run}");
            sink.close(close_code::AWAY, "Server shutting down").await;
            return;
        }
        Err(e @ HubError::Timeout(_)) => {
            log::error!("[Live] Could not register {id} on run {run}: {e}");
            // The register may still be queued; undo it once it lands
            unregister_later(state.hub.clone(), run, id);
            sink.close(close_code::ERROR, "Server busy").await;
            return;
        }
    }

    let exit = read_loop(&state, &run, id, &mut rx).await;
    exit.log(id, &run);

    match state.hub.unregister(run.clone(), id).await {
        Ok(_) | Err(HubError::ShuttingDown) => {}
        Err(e @ HubError::Timeout(_)) => {
            log::warn!("[Live] Unregister of {id} from run {run} failed: {e}, retrying in background");
            unregister_later(state.hub.clone(), run, id);
        }
    }
    let (code, reason) = exit.close_frame();
    sink.close(code, reason).await;
}

/// Remove `id` from `run` without a deadline, off the connection task.
fn unregister_later(hub: HubHandle, run: RunId, id: ConnectionId) {
    tokio::spawn(async move {
        match hub.unregister_unbounded(run.clone(), id).await {
            Ok(Unregistered::NotMember) => log::debug!("[Live] {id} already gone from run {run}"),
            Ok(_) => log::info!("[Live] Removed {id} from run {run} after hub delay"),
            Err(e) => log::debug!("[Live] Deferred unregister of {id} from run {run}: {e}"),
        }
    });
}

async fn read_loop(
    state: &AppState,
    run: &RunId,
    id: ConnectionId,
    rx: &mut SplitStream<WebSocket>,
) -> Exit {
    loop {
        let frame = tokio::select! {
            () = state.cancel.cancelled() => return Exit::Cancelled,
            frame = rx.next() => frame,
        };

        match frame {
            None => return Exit::Ended,
            Some(Err(e)) => return Exit::Error(e),
            Some(Ok(Message::Close(frame))) => return Exit::Closed(frame.map(|f| f.code)),
            Some(Ok(Message::Text(text))) => {
                if !forward(state, run, id, text.as_str()).await {
                    return Exit::Cancelled;
                }
            }
            Some(Ok(Message::Binary(bytes))) => {
                log::warn!(
                    "[Live] {id} sent a non-text frame ({} bytes) on run {run}, ignoring",
                    bytes.len()
                );
            }
            // Pings are answered by the transport
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
        }
    }
}

/// Persist one line, then hand it to the hub. Returns `false` once the hub
/// has shut down.
async fn forward(state: &AppState, run: &RunId, id: ConnectionId, line: &str) -> bool {
    if let Err(e) = state.store.append_line(run, line).await {
        log::error!("[LogStore] Append for run {run} failed: {e}");
    }

    match state
        .hub
        .broadcast(hub::Message::new(run.clone(), line, Some(id)))
        .await
    {
        Ok(()) => true,
        Err(HubError::Timeout(_)) => {
            log::warn!("[Live] Timeout broadcasting from {id} on run {run}, hub may be slow");
            true
        }
        Err(HubError::ShuttingDown) => {
            log::warn!("[Live] Hub shutting down, dropping line from {id} on run {run}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use tokio_util::task::TaskTracker;

    use crate::config::Config;
    use crate::hub::{HubCommand, HubConfig, Registry};
    use crate::log_store::LogStore;
    use crate::ws::{self, WsMessage};

    const WAIT: Duration = Duration::from_secs(5);

    fn quick_limits() -> HubConfig {
        HubConfig {
            register_timeout: Duration::from_millis(50),
            unregister_timeout: Duration::from_millis(50),
            broadcast_timeout: Duration::from_millis(50),
            ..HubConfig::default()
        }
    }

    /// Serve the router over `hub` on an ephemeral port, returning the base URL.
    async fn spawn_server(hub: HubHandle, tmp: &tempfile::TempDir) -> String {
        let config = Config {
            log_dir: tmp.path().to_path_buf(),
            ..Config::default()
        };
        let state = AppState {
            hub,
            store: Arc::new(LogStore::new(tmp.path(), "str", "__END__")),
            config: Arc::new(config),
            cancel: CancellationToken::new(),
            connections: TaskTracker::new(),
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = super::super::build_router(state);
        tokio::spawn(async move { axum::serve(listener, router).await });
        format!("http://{addr}")
    }

    async fn close_frame(reader: &mut ws::WsReader) -> (u16, String) {
        loop {
            match tokio::time::timeout(WAIT, reader.recv()).await.unwrap() {
                Some(Ok(WsMessage::Close { code, reason })) => return (code, reason),
                Some(Ok(_)) => {}
                other => panic!("expected a close frame, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_register_timeout_closes_busy_and_undoes_late_register() {
        let tmp = tempfile::TempDir::new().unwrap();
        // Queue accepts commands but nothing answers them
        let (tx, mut commands) = mpsc::channel(8);
        let base = spawn_server(HubHandle::new(tx, &quick_limits()), &tmp).await;
        let run = RunId::parse("r1").unwrap();

        let (_writer, mut reader) = ws::connect(&ws::live_url(&base, &run)).await.unwrap();
        assert_eq!(
            close_frame(&mut reader).await,
            (close_code::ERROR, "Server busy".to_string())
        );

        // Apply what reached the queue, in order, the way the hub would
        let mut registry = Registry::new();
        loop {
            match tokio::time::timeout(WAIT, commands.recv()).await.unwrap() {
                Some(HubCommand::Register { run, peer, .. }) => {
                    registry.register(run, peer);
                }
                Some(HubCommand::Unregister { run, id, .. }) => {
                    assert_eq!(registry.unregister(&run, id), Unregistered::RunClosed);
                    break;
                }
                other => panic!("unexpected command {other:?}"),
            }
        }
        assert_eq!(registry.run_count(), 0);
    }

    #[tokio::test]
    async fn test_unregister_timeout_still_closes_and_retries() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (tx, mut commands) = mpsc::channel(8);
        let base = spawn_server(HubHandle::new(tx, &quick_limits()), &tmp).await;
        let run = RunId::parse("r1").unwrap();

        // Answers registrations; loses the first unregister
        let hub = tokio::spawn(async move {
            let mut registry = Registry::new();
            let mut unregisters = 0;
            while let Some(cmd) = commands.recv().await {
                match cmd {
                    HubCommand::Register { run, peer, response_tx } => {
                        let _ = response_tx.send(registry.register(run, peer));
                    }
                    HubCommand::Unregister { run, id, response_tx } => {
                        unregisters += 1;
                        if unregisters > 1 {
                            let _ = response_tx.send(registry.unregister(&run, id));
                            return registry.run_count();
                        }
                        // Reply dropped only after the caller gave up
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        drop(response_tx);
                    }
                    _ => {}
                }
            }
            registry.run_count()
        });

        let (mut writer, mut reader) = ws::connect(&ws::live_url(&base, &run)).await.unwrap();
        writer.send_close("bye").await.unwrap();
        assert_eq!(close_frame(&mut reader).await.0, close_code::NORMAL);

        let remaining = tokio::time::timeout(WAIT, hub)
            .await
            .expect("retried unregister never arrived")
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_close_frame_for_exit() {
        assert_eq!(Exit::Cancelled.close_frame().0, close_code::AWAY);
        assert_eq!(Exit::Ended.close_frame().0, close_code::NORMAL);
        assert_eq!(Exit::Closed(Some(4000)).close_frame().0, close_code::NORMAL);
    }
}
