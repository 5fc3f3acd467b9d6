//! Runtime settings for the presence daemon.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{DaemonError, Result};

pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_WS_ADDR: &str = "127.0.0.1:8081";
/// How often the reaper scans for stale entries.
pub const DEFAULT_REAP_INTERVAL_SECS: u64 = 30;
/// No heartbeat for this long means the client's tab or process is gone.
pub const DEFAULT_STALE_AFTER_SECS: u64 = 90;
pub const DEFAULT_WS_MAX_CONNECTIONS: usize = 256;
/// Capacity of the presence change broadcast channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_addr: SocketAddr,
    pub ws_addr: SocketAddr,
    pub reap_interval: Duration,
    pub stale_after: Duration,
    pub ws_max_connections: usize,
    /// Extra `Origin` prefixes accepted on WebSocket upgrade, on top of
    /// localhost and non-browser clients.
    pub ws_allowed_origins: Vec<String>,
    /// Treat an authenticated WebSocket `ping` as a heartbeat.
    pub ws_ping_heartbeat: bool,
    pub event_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            ws_addr: SocketAddr::from(([127, 0, 0, 1], 8081)),
            reap_interval: Duration::from_secs(DEFAULT_REAP_INTERVAL_SECS),
            stale_after: Duration::from_secs(DEFAULT_STALE_AFTER_SECS),
            ws_max_connections: DEFAULT_WS_MAX_CONNECTIONS,
            ws_allowed_origins: Vec::new(),
            ws_ping_heartbeat: false,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.reap_interval.is_zero() {
            return Err(DaemonError::Config("reap interval must be positive".into()));
        }
        if self.stale_after.is_zero() {
            return Err(DaemonError::Config("staleness threshold must be positive".into()));
        }
        if self.stale_after < self.reap_interval {
            return Err(DaemonError::Config(format!(
                "staleness threshold ({}s) is shorter than the reap interval ({}s)",
                self.stale_after.as_secs(),
                self.reap_interval.as_secs()
            )));
        }
        if self.ws_max_connections == 0 {
            return Err(DaemonError::Config("ws connection limit must be positive".into()));
        }
        if self.event_buffer == 0 {
            return Err(DaemonError::Config("event buffer must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.http_addr.to_string(), DEFAULT_HTTP_ADDR);
        assert_eq!(config.ws_addr.to_string(), DEFAULT_WS_ADDR);
    }

    #[test]
    fn zero_interval_rejected() {
        let config = Config {
            reap_interval: Duration::ZERO,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(DaemonError::Config(_))));
    }

    #[test]
    fn stale_shorter_than_interval_rejected() {
        let config = Config {
            reap_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(30),
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("shorter than the reap interval"));
    }

    #[test]
    fn zero_limits_rejected() {
        let no_conns = Config {
            ws_max_connections: 0,
            ..Config::default()
        };
        assert!(no_conns.validate().is_err());

        let no_buffer = Config {
            event_buffer: 0,
            ..Config::default()
        };
        assert!(no_buffer.validate().is_err());
    }
}
