//! Cloneable handle for talking to the hub actor.
//!
//! `HubHandle` wraps the hub's command queue and gives connection handlers
//! a typed async API. Every call is bounded: if the hub does not accept the
//! command (and, where there is one, answer it) within the configured
//! limit, the call fails with [`HubError::Timeout`] instead of hanging the
//! caller.
//!
//! # Example
//!
//! ```ignore
//! let (hub, _join) = Hub::start(HubConfig::default(), cancel.clone());
//! let peers = hub.register(run.clone(), peer).await?;
//! hub.broadcast(Message::new(run, line, Some(id))).await?;
//! ```

// Rust guideline compliant 2026-02

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;

use super::commands::{HubCommand, Message};
use super::peer::{ConnectionId, Peer};
use super::registry::Unregistered;
use super::HubConfig;
use crate::run_id::RunId;

/// Why a hub call did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The hub did not take or answer the command in time.
    #[error("hub {0} timed out")]
    Timeout(&'static str),
    /// The hub has stopped and is no longer accepting commands.
    #[error("hub is shutting down")]
    ShuttingDown,
}

/// Handle for hub communication.
///
/// `Clone + Send + Sync`; every connection handler holds its own clone.
#[derive(Debug, Clone)]
pub struct HubHandle {
    command_tx: mpsc::Sender<HubCommand>,
    register_timeout: Duration,
    unregister_timeout: Duration,
    broadcast_timeout: Duration,
}

impl HubHandle {
    /// Create a handle over `command_tx` with the limits from `config`.
    #[must_use]
    pub fn new(command_tx: mpsc::Sender<HubCommand>, config: &HubConfig) -> Self {
        Self {
            command_tx,
            register_timeout: config.register_timeout,
            unregister_timeout: config.unregister_timeout,
            broadcast_timeout: config.broadcast_timeout,
        }
    }

    /// Handle whose hub is already gone. Every call fails with
    /// [`HubError::ShuttingDown`].
    #[must_use]
    pub fn mock() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self::new(tx, &HubConfig::default())
    }

    /// Add `peer` to `run`. Returns the run's member count afterwards.
    pub async fn register(&self, run: RunId, peer: Peer) -> Result<usize, HubError> {
        let (cmd, rx) = HubCommand::register(run, peer);
        self.request("register", self.register_timeout, cmd, rx).await
    }

    /// Remove connection `id` from `run`.
    pub async fn unregister(&self, run: RunId, id: ConnectionId) -> Result<Unregistered, HubError> {
        let (cmd, rx) = HubCommand::unregister(run, id);
        self.request("unregister", self.unregister_timeout, cmd, rx).await
    }

    /// Remove connection `id` from `run`, waiting as long as it takes.
    ///
    /// Cleanup after a bounded call timed out. The queue is FIFO, so this
    /// is handled after any registration of `id` still waiting in it.
    pub async fn unregister_unbounded(
        &self,
        run: RunId,
        id: ConnectionId,
    ) -> Result<Unregistered, HubError> {
        let (cmd, rx) = HubCommand::unregister(run, id);
        self.exchange(cmd, rx).await
    }

    /// Queue `message` for fan-out.
    ///
    /// Returns once the hub has accepted the message, not once it has been
    /// delivered. The limit covers only the enqueue.
    pub async fn broadcast(&self, message: Message) -> Result<(), HubError> {
        let send = self.command_tx.send(HubCommand::broadcast(message));
        bounded("broadcast", self.broadcast_timeout, async {
            send.await.map_err(|_| HubError::ShuttingDown)
        })
        .await
    }

    /// Connection ids currently registered for `run`, sorted.
    pub async fn members(&self, run: RunId) -> Result<Vec<ConnectionId>, HubError> {
        let (cmd, rx) = HubCommand::members(run);
        self.request("members", self.register_timeout, cmd, rx).await
    }

    /// Number of runs with at least one connection.
    pub async fn run_count(&self) -> Result<usize, HubError> {
        let (cmd, rx) = HubCommand::run_count();
        self.request("run_count", self.register_timeout, cmd, rx).await
    }

    /// Whether the hub has stopped accepting commands.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    async fn request<T>(
        &self,
        op: &'static str,
        limit: Duration,
        cmd: HubCommand,
        rx: tokio::sync::oneshot::Receiver<T>,
    ) -> Result<T, HubError> {
        bounded(op, limit, self.exchange(cmd, rx)).await
    }

    async fn exchange<T>(
        &self,
        cmd: HubCommand,
        rx: tokio::sync::oneshot::Receiver<T>,
    ) -> Result<T, HubError> {
        self.command_tx
            .send(cmd)
            .await
            .map_err(|_| HubError::ShuttingDown)?;
        rx.await.map_err(|_| HubError::ShuttingDown)
    }
}

async fn bounded<T>(
    op: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T, HubError>>,
) -> Result<T, HubError> {
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(HubError::Timeout(op)))
}
