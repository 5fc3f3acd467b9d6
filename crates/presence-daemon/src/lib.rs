//! presence-daemon: network surfaces over the presence registry.
//!
//! - `service`   -- heartbeat / logout / snapshot operations and the reaper
//! - `http`      -- JSON API (axum)
//! - `ws_server` -- WebSocket push channel mirroring presence changes
//! - `config`    -- runtime settings shared by the binary and tests

pub mod config;
pub mod error;
pub mod http;
pub mod service;
pub mod ws_server;
