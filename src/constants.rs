//! Application-wide constants for runstream.
//!
//! Centralizes the defaults that [`Config`](crate::config::Config) falls back
//! to, grouped by concern.
//!
//! # Categories
//!
//! - **Hub timeouts**: bounded waits on the coordinator
//! - **Delivery**: per-recipient write deadlines
//! - **Tail**: polling and pacing for the pull path
//! - **Wire**: endpoint paths, header names, SSE framing

use std::time::Duration;

// ============================================================================
// Hub timeouts
// ============================================================================

/// How long a new connection waits for the hub to accept its registration.
///
/// Exceeding this is treated as server overload: the connection is closed
/// with a "server busy" close frame.
pub const REGISTER_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a closing connection waits for the hub to drop it.
///
/// On timeout the connection still releases its own resources.
pub const UNREGISTER_TIMEOUT: Duration = Duration::from_secs(1);

/// How long a read loop waits to hand one line to the hub.
///
/// On timeout the line is not broadcast (it is still in the log file) and
/// the read loop keeps going.
pub const BROADCAST_TIMEOUT: Duration = Duration::from_secs(1);

/// Capacity of the hub's inbound command queue.
pub const HUB_QUEUE_CAPACITY: usize = 1024;

/// Grace period for in-flight deliveries once shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// ============================================================================
// Delivery
// ============================================================================

/// Write deadline for one message to one recipient.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Tail
// ============================================================================

/// Poll cadence for log growth when no filesystem event arrives.
pub const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Pause after each line sent on the pull path. Zero disables pacing.
pub const TAIL_PACING: Duration = Duration::ZERO;

// ============================================================================
// Wire
// ============================================================================

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 5002;

/// Default bind host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Origin allowed by CORS when none is configured.
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Directory holding `<run>.<ext>` log files.
pub const DEFAULT_LOG_DIR: &str = "live";

/// Extension of run log files.
pub const DEFAULT_LOG_EXTENSION: &str = "str";

/// Line value marking logical end of a run.
pub const DEFAULT_SENTINEL: &str = "__END__";

/// Header carrying the run id on the pull endpoint.
pub const DEFAULT_RUN_ID_HEADER: &str = "X-RUN-ID";

/// Push endpoint route prefix.
pub const LIVE_PATH: &str = "/live";

/// Pull endpoint route.
pub const LOGS_PATH: &str = "/runs/logs";

/// Reconnect hint sent once at the start of each event stream.
pub const SSE_RETRY: Duration = Duration::from_secs(3);

/// Interval between SSE keep-alive comments.
pub const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Name of the terminal SSE event.
pub const SSE_DONE_EVENT: &str = "done";

/// Body of the terminal SSE event.
pub const SSE_DONE_BODY: &str = r#"{"message":"Stream ended."}"#;

/// User agent for outbound client requests.
#[must_use]
pub fn user_agent() -> String {
    format!("runstream/{}", env!("CARGO_PKG_VERSION"))
}
