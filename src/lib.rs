//! Runstream - live output fan-out for long-running runs.
//!
//! A run's producer streams lines over a WebSocket; every line is appended
//! to the run's log file and relayed to the run's other live connections.
//! Observers that arrive late, or prefer plain HTTP, tail the log file as a
//! Server-Sent Events stream that replays history and then follows.
//!
//! # Architecture
//!
//! - **Hub** - Actor owning run membership; fans each line out per recipient
//! - **Server** - axum router: push endpoint, pull endpoint, health
//! - **Log store** - Append-only `<runID>.<ext>` files, one line per append
//! - **Tail** - Follows a log file through creation, truncation and rotation
//!
//! # Modules
//!
//! - [`hub`] - Registry, commands, handle, and delivery
//! - [`server`] - HTTP surface and lifecycle
//! - [`log_store`] - Per-run log files
//! - [`tail`] - Log follower state machine
//! - [`commands`] - CLI subcommands (`serve`, `push`, `tail`)
//! - [`config`] - Configuration loading

// Library modules
pub mod commands;
pub mod hub;
pub mod server;
pub mod tail;
pub mod ws;

pub mod config;
pub mod constants;
pub mod file_watcher;
pub mod log_store;
pub mod run_id;

// Re-export commonly used types
pub use config::Config;
pub use log_store::LogStore;
pub use run_id::{RunId, RunIdError};
pub use server::LiveServer;
pub use tail::{TailEvent, TailOptions, TailReader};

// Re-export Hub
pub use hub::{Hub, HubConfig, HubHandle};
