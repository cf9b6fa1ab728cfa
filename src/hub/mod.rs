//! Run hub: who is connected to which run, and fan-out between them.
//!
//! The hub is a single actor task that owns the [`Registry`]. Connection
//! handlers talk to it through a cloneable [`HubHandle`]; every request goes
//! through one bounded queue and is handled to completion before the next,
//! so there is no lock around membership.
//!
//! # Architecture
//!
//! ```text
//! live handler ──┐                       ┌── delivery task ── peer A
//! live handler ──┼─ HubCommand queue ─ Hub ── delivery task ── peer B
//! live handler ──┘                       └── delivery task ── peer C
//! ```
//!
//! Broadcasts snapshot the run's members (minus the sender) and hand each
//! one to the [`dispatch`] layer, which runs every write in its own task
//! under its own deadline. The actor never awaits a network write.
//!
//! # Shutdown
//!
//! When the cancellation token fires the hub stops reading commands, drops
//! anything still queued (callers see [`HubError::ShuttingDown`]), forgets
//! all membership, then gives in-flight deliveries a grace period before
//! cancelling them. The `JoinHandle` from [`Hub::start`] resolves after
//! that drain.

// Rust guideline compliant 2026-02

pub mod commands;
pub mod dispatch;
pub mod hub_handle;
pub mod peer;
pub mod registry;

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use commands::{HubCommand, Message};
pub use dispatch::Delivery;
pub use hub_handle::{HubError, HubHandle};
pub use peer::{ConnectionId, DeliveryError, Peer, PeerSink};
pub use registry::{Registry, Unregistered};

use crate::config::Config;
use crate::constants;
use dispatch::Dispatcher;

/// Limits the hub runs under.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the command queue.
    pub queue_capacity: usize,
    /// Bounded wait for registration.
    pub register_timeout: Duration,
    /// Bounded wait for unregistration.
    pub unregister_timeout: Duration,
    /// Bounded wait for enqueuing a broadcast.
    pub broadcast_timeout: Duration,
    /// Per-recipient write deadline.
    pub write_timeout: Duration,
    /// How long in-flight deliveries get once shutdown starts.
    pub shutdown_grace: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: constants::HUB_QUEUE_CAPACITY,
            register_timeout: constants::REGISTER_TIMEOUT,
            unregister_timeout: constants::UNREGISTER_TIMEOUT,
            broadcast_timeout: constants::BROADCAST_TIMEOUT,
            write_timeout: constants::WRITE_TIMEOUT,
            shutdown_grace: constants::SHUTDOWN_GRACE,
        }
    }
}

impl From<&Config> for HubConfig {
    fn from(config: &Config) -> Self {
        Self {
            queue_capacity: config.hub_queue_capacity.max(1),
            register_timeout: config.register_timeout(),
            unregister_timeout: config.unregister_timeout(),
            broadcast_timeout: config.broadcast_timeout(),
            write_timeout: config.write_timeout(),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

/// The hub actor.
#[derive(Debug)]
pub struct Hub {
    registry: Registry,
    dispatcher: Dispatcher,
    command_rx: mpsc::Receiver<HubCommand>,
    shutdown_grace: Duration,
}

impl Hub {
    /// Spawn the hub on the current runtime.
    ///
    /// The hub runs until `cancel` fires or every handle is dropped.
    #[must_use]
    pub fn start(config: HubConfig, cancel: CancellationToken) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let handle = HubHandle::new(tx, &config);
        let hub = Self {
            registry: Registry::new(),
            dispatcher: Dispatcher::new(config.write_timeout),
            command_rx: rx,
            shutdown_grace: config.shutdown_grace,
        };
        let join = tokio::spawn(hub.run(cancel));
        (handle, join)
    }

    async fn run(mut self, cancel: CancellationToken) {
        log::info!("[Hub] Started");
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    log::info!("[Hub] Cancellation received");
                    break;
                }
                cmd = self.command_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        log::debug!("[Hub] All handles dropped");
                        break;
                    }
                },
            }
        }
        self.shutdown().await;
    }

    fn handle_command(&mut self, cmd: HubCommand) {
        log::trace!("[Hub] Handling {}", cmd.name());
        match cmd {
            HubCommand::Register {
                run,
                peer,
                response_tx,
            } => {
                let id = peer.id();
                let count = self.registry.register(run.clone(), peer);
                log::info!("[Hub] {id} joined run {run} ({count} connected)");
                let _ = response_tx.send(count);
            }

            HubCommand::Unregister {
                run,
                id,
                response_tx,
            } => {
                let outcome = self.registry.unregister(&run, id);
                match outcome {
                    Unregistered::NotMember => {
                        log::debug!("[Hub] {id} was not registered on run {run}");
                    }
                    Unregistered::Removed { remaining } => {
                        log::info!("[Hub] {id} left run {run} ({remaining} connected)");
                    }
                    Unregistered::RunClosed => {
                        log::info!("[Hub] {id} left run {run}, no connections remain");
                    }
                }
                let _ = response_tx.send(outcome);
            }

            HubCommand::Broadcast(message) => {
                let recipients = self.registry.recipients(&message.run, message.sender);
                if recipients.is_empty() {
                    log::trace!("[Hub] No recipients on run {}", message.run);
                    return;
                }
                self.dispatcher.dispatch(&message, recipients);
            }

            HubCommand::Members { run, response_tx } => {
                let _ = response_tx.send(self.registry.members(&run));
            }

            HubCommand::RunCount { response_tx } => {
                let _ = response_tx.send(self.registry.run_count());
            }
        }
    }

    async fn shutdown(mut self) {
        self.command_rx.close();
        let mut dropped = 0usize;
        while self.command_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            log::debug!("[Hub] Dropped {dropped} queued commands");
        }

        let connections = self.registry.connection_count();
        self.registry.clear();
        log::info!(
            "[Hub] Shutting down: released {connections} connections, {} deliveries in flight",
            self.dispatcher.in_flight()
        );

        self.dispatcher.drain(self.shutdown_grace).await;
        log::info!("[Hub] Stopped");
    }
}
