//! Configuration loading.
//!
//! Reads an optional JSON configuration file and applies environment
//! variable overrides on top. Every field has a default, so a missing file
//! is not an error; a present but malformed one is.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use crate::constants;

/// Configuration for the runstream server.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    /// Address to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Origin allowed by CORS (the front end that opens the streams).
    pub allowed_origin: String,
    /// Directory holding per-run log files.
    pub log_dir: PathBuf,
    /// Extension of per-run log files, without the dot.
    pub log_extension: String,
    /// Line value marking logical end of a run.
    pub sentinel: String,
    /// Header carrying the run id on the pull endpoint.
    pub run_id_header: String,
    /// Bounded wait for hub registration, in milliseconds.
    pub register_timeout_ms: u64,
    /// Bounded wait for hub unregistration, in milliseconds.
    pub unregister_timeout_ms: u64,
    /// Bounded wait for handing a line to the hub, in milliseconds.
    pub broadcast_timeout_ms: u64,
    /// Per-recipient write deadline, in milliseconds.
    pub write_timeout_ms: u64,
    /// Tail poll cadence, in milliseconds.
    pub poll_interval_ms: u64,
    /// Pause after each line on the pull path, in milliseconds.
    pub pacing_ms: u64,
    /// Reconnect hint sent to event-stream clients, in milliseconds.
    pub sse_retry_ms: u64,
    /// Interval between event-stream keep-alive comments, in seconds.
    pub keep_alive_secs: u64,
    /// Grace period for in-flight deliveries at shutdown, in seconds.
    pub shutdown_grace_secs: u64,
    /// Capacity of the hub command queue.
    pub hub_queue_capacity: usize,
    /// Use filesystem notifications to wake tail readers early.
    pub fs_events: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: constants::DEFAULT_HOST.to_string(),
            port: constants::DEFAULT_PORT,
            allowed_origin: constants::DEFAULT_ALLOWED_ORIGIN.to_string(),
            log_dir: PathBuf::from(constants::DEFAULT_LOG_DIR),
            log_extension: constants::DEFAULT_LOG_EXTENSION.to_string(),
            sentinel: constants::DEFAULT_SENTINEL.to_string(),
            run_id_header: constants::DEFAULT_RUN_ID_HEADER.to_string(),
            register_timeout_ms: millis(constants::REGISTER_TIMEOUT),
            unregister_timeout_ms: millis(constants::UNREGISTER_TIMEOUT),
            broadcast_timeout_ms: millis(constants::BROADCAST_TIMEOUT),
            write_timeout_ms: millis(constants::WRITE_TIMEOUT),
            poll_interval_ms: millis(constants::TAIL_POLL_INTERVAL),
            pacing_ms: millis(constants::TAIL_PACING),
            sse_retry_ms: millis(constants::SSE_RETRY),
            keep_alive_secs: constants::SSE_KEEP_ALIVE.as_secs(),
            shutdown_grace_secs: constants::SHUTDOWN_GRACE.as_secs(),
            hub_queue_capacity: constants::HUB_QUEUE_CAPACITY,
            fs_events: true,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Config {
    /// Default config file location: `<platform config dir>/runstream/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("runstream").join("config.json"))
    }

    /// Loads configuration, then applies environment overrides.
    ///
    /// Resolution order for the file: `explicit`, then `RUNSTREAM_CONFIG`,
    /// then [`default_path`](Self::default_path) if it exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| env::var_os("RUNSTREAM_CONFIG").map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::load_from_file(&path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a JSON config file. Missing fields take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config: {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = env::var("RUNSTREAM_HOST") {
            self.host = host;
        }

        for key in ["HTTP_PORT", "RUNSTREAM_PORT"] {
            if let Ok(port) = env::var(key) {
                match port.parse::<u16>() {
                    Ok(port) => self.port = port,
                    Err(_) => log::warn!("Ignoring {key}={port}: not a port number"),
                }
            }
        }

        if let Ok(origin) = env::var("FRONTEND_URL") {
            if !origin.is_empty() {
                self.allowed_origin = origin;
            }
        }

        if let Ok(dir) = env::var("RUNSTREAM_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }

        if let Ok(interval) = env::var("RUNSTREAM_POLL_INTERVAL_MS") {
            if let Ok(ms) = interval.parse::<u64>() {
                self.poll_interval_ms = ms.max(1);
            }
        }

        if let Ok(pacing) = env::var("RUNSTREAM_PACING_MS") {
            if let Ok(ms) = pacing.parse::<u64>() {
                self.pacing_ms = ms;
            }
        }
    }

    /// `host:port` string for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Bounded wait for registration.
    pub fn register_timeout(&self) -> Duration {
        Duration::from_millis(self.register_timeout_ms)
    }

    /// Bounded wait for unregistration.
    pub fn unregister_timeout(&self) -> Duration {
        Duration::from_millis(self.unregister_timeout_ms)
    }

    /// Bounded wait for submitting a broadcast.
    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }

    /// Per-recipient write deadline.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Tail poll cadence (never zero).
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Pause after each line on the pull path.
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    /// Reconnect hint for event-stream clients.
    pub fn sse_retry(&self) -> Duration {
        Duration::from_millis(self.sse_retry_ms)
    }

    /// Keep-alive comment interval.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }

    /// Shutdown grace period for deliveries.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = Config::default();
        assert_eq!(config.port, 5002);
        assert_eq!(config.log_dir, PathBuf::from("live"));
        assert_eq!(config.log_extension, "str");
        assert_eq!(config.sentinel, "__END__");
        assert_eq!(config.run_id_header, "X-RUN-ID");
        assert_eq!(config.register_timeout(), Duration::from_secs(2));
        assert_eq!(config.write_timeout(), Duration::from_secs(5));
        assert_eq!(config.pacing(), Duration::ZERO);
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{"port": 9100, "sentinel": "<<done>>"}"#).unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.sentinel, "<<done>>");
        assert_eq!(config.log_extension, "str");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = Config::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid config"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = Config::load(Some(Path::new("/nonexistent/runstream.json")));
        assert!(result.is_err());
    }

    #[test]
    fn test_poll_interval_never_zero() {
        let config = Config {
            poll_interval_ms: 0,
            ..Config::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_bind_address() {
        let config = Config {
            host: "127.0.0.1".into(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
    }
}
