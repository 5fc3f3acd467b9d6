//! CLI definition using clap derive.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use presence_daemon::config::{
    Config, DEFAULT_EVENT_BUFFER, DEFAULT_HTTP_ADDR, DEFAULT_REAP_INTERVAL_SECS,
    DEFAULT_STALE_AFTER_SECS, DEFAULT_WS_ADDR, DEFAULT_WS_MAX_CONNECTIONS,
};

#[derive(Parser)]
#[command(name = "presenced", about = "Heartbeat-driven presence service", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP API, WebSocket notifier and reaper (default)
    Serve(ServeOpts),
    /// Print a freshly generated anonymous identity as JSON
    Identity(IdentityOpts),
}

#[derive(clap::Args, Clone)]
pub struct ServeOpts {
    /// HTTP listen address
    #[arg(long, env = "PRESENCE_HTTP_ADDR", default_value = DEFAULT_HTTP_ADDR)]
    pub http_addr: SocketAddr,

    /// WebSocket listen address
    #[arg(long, env = "PRESENCE_WS_ADDR", default_value = DEFAULT_WS_ADDR)]
    pub ws_addr: SocketAddr,

    /// Seconds between reaper scans
    #[arg(long, env = "PRESENCE_REAP_INTERVAL_SECS", default_value_t = DEFAULT_REAP_INTERVAL_SECS)]
    pub reap_interval_secs: u64,

    /// Seconds without a heartbeat before a user is evicted
    #[arg(long, env = "PRESENCE_STALE_AFTER_SECS", default_value_t = DEFAULT_STALE_AFTER_SECS)]
    pub stale_after_secs: u64,

    /// Maximum concurrent WebSocket connections
    #[arg(long, env = "PRESENCE_WS_MAX_CONNECTIONS", default_value_t = DEFAULT_WS_MAX_CONNECTIONS)]
    pub ws_max_connections: usize,

    /// Additional allowed WebSocket Origin, matched exactly (repeatable)
    #[arg(long = "ws-allowed-origin", env = "PRESENCE_WS_ALLOWED_ORIGINS", value_delimiter = ',')]
    pub ws_allowed_origins: Vec<String>,

    /// Treat WebSocket `ping` from an authenticated connection as a heartbeat
    #[arg(long, env = "PRESENCE_WS_PING_HEARTBEAT")]
    pub ws_ping_heartbeat: bool,

    /// Capacity of the presence change channel
    #[arg(long, env = "PRESENCE_EVENT_BUFFER", default_value_t = DEFAULT_EVENT_BUFFER)]
    pub event_buffer: usize,
}

impl Default for ServeOpts {
    fn default() -> Self {
        Config::default().into()
    }
}

impl From<Config> for ServeOpts {
    fn from(config: Config) -> Self {
        Self {
            http_addr: config.http_addr,
            ws_addr: config.ws_addr,
            reap_interval_secs: config.reap_interval.as_secs(),
            stale_after_secs: config.stale_after.as_secs(),
            ws_max_connections: config.ws_max_connections,
            ws_allowed_origins: config.ws_allowed_origins,
            ws_ping_heartbeat: config.ws_ping_heartbeat,
            event_buffer: config.event_buffer,
        }
    }
}

impl From<ServeOpts> for Config {
    fn from(opts: ServeOpts) -> Self {
        Self {
            http_addr: opts.http_addr,
            ws_addr: opts.ws_addr,
            reap_interval: Duration::from_secs(opts.reap_interval_secs),
            stale_after: Duration::from_secs(opts.stale_after_secs),
            ws_max_connections: opts.ws_max_connections,
            ws_allowed_origins: opts.ws_allowed_origins,
            ws_ping_heartbeat: opts.ws_ping_heartbeat,
            event_buffer: opts.event_buffer,
        }
    }
}

#[derive(clap::Args)]
pub struct IdentityOpts {
    /// Number of alternative usernames to include
    #[arg(long, default_value_t = 5)]
    pub suggestions: usize,

    /// Derive suggestions from this text instead of random words
    #[arg(long)]
    pub base: Option<String>,
}
