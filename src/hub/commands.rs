//! Commands sent to the hub actor.
//!
//! Callers never touch the registry. They send a [`HubCommand`] into the
//! hub's bounded queue and, where a reply is needed, wait on a oneshot
//! channel carried inside the command. The hub processes commands one at a
//! time, so membership changes are serialized without locks.
//!
//! ```ignore
//! let (cmd, rx) = HubCommand::register(run, peer);
//! hub_tx.send(cmd).await?;
//! let members = rx.await?;
//! ```

// Rust guideline compliant 2026-02

use std::sync::Arc;

use tokio::sync::oneshot;

use super::peer::{ConnectionId, Peer};
use super::registry::Unregistered;
use crate::run_id::RunId;

/// One line to fan out to a run's connections.
///
/// Exists only while it is being dispatched.
#[derive(Debug, Clone)]
pub struct Message {
    /// Target run.
    pub run: RunId,
    /// Line contents, shared by every delivery task.
    pub payload: Arc<str>,
    /// Originating connection, which does not get its own message back.
    pub sender: Option<ConnectionId>,
}

impl Message {
    /// Build a message from `sender` for `run`.
    pub fn new(run: RunId, payload: impl Into<Arc<str>>, sender: Option<ConnectionId>) -> Self {
        Self {
            run,
            payload: payload.into(),
            sender,
        }
    }
}

/// Commands processed by the hub actor.
#[derive(Debug)]
pub enum HubCommand {
    /// Add a connection to a run's set.
    Register {
        /// Run to join.
        run: RunId,
        /// Connection joining.
        peer: Peer,
        /// Receives the run's member count after the join.
        response_tx: oneshot::Sender<usize>,
    },

    /// Remove a connection from a run's set.
    Unregister {
        /// Run to leave.
        run: RunId,
        /// Connection leaving.
        id: ConnectionId,
        /// Receives what happened.
        response_tx: oneshot::Sender<Unregistered>,
    },

    /// Fan a message out to every other member of its run. Fire-and-forget.
    Broadcast(Message),

    /// List connection ids registered for a run.
    Members {
        /// Run to inspect.
        run: RunId,
        /// Receives the sorted ids.
        response_tx: oneshot::Sender<Vec<ConnectionId>>,
    },

    /// Count runs that currently have connections.
    RunCount {
        /// Receives the count.
        response_tx: oneshot::Sender<usize>,
    },
}

impl HubCommand {
    /// Create a register command and the receiver for its reply.
    #[must_use]
    pub fn register(run: RunId, peer: Peer) -> (Self, oneshot::Receiver<usize>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Register {
                run,
                peer,
                response_tx: tx,
            },
            rx,
        )
    }

    /// Create an unregister command and the receiver for its reply.
    #[must_use]
    pub fn unregister(run: RunId, id: ConnectionId) -> (Self, oneshot::Receiver<Unregistered>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Unregister {
                run,
                id,
                response_tx: tx,
            },
            rx,
        )
    }

    /// Create a broadcast command.
    #[must_use]
    pub fn broadcast(message: Message) -> Self {
        Self::Broadcast(message)
    }

    /// Create a members query and the receiver for its reply.
    #[must_use]
    pub fn members(run: RunId) -> (Self, oneshot::Receiver<Vec<ConnectionId>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Members { run, response_tx: tx }, rx)
    }

    /// Create a run-count query and the receiver for its reply.
    #[must_use]
    pub fn run_count() -> (Self, oneshot::Receiver<usize>) {
        let (tx, rx) = oneshot::channel();
        (Self::RunCount { response_tx: tx }, rx)
    }

    /// Short name for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Unregister { .. } => "unregister",
            Self::Broadcast(_) => "broadcast",
            Self::Members { .. } => "members",
            Self::RunCount { .. } => "run_count",
        }
    }
}
