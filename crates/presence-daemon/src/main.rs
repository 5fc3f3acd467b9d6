//! presenced: presence service binary.
//! Runs the HTTP API, WebSocket notifier and reaper in one process.

use std::sync::Arc;

use clap::Parser;
use presence_core::{IdentityGenerator, SessionStore};
use presence_daemon::config::Config;
use presence_daemon::http;
use presence_daemon::service::{PresenceService, run_reaper};
use presence_daemon::ws_server::WsServer;
use tokio_util::sync::CancellationToken;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let command = args
        .command
        .unwrap_or_else(|| cli::Command::Serve(cli::ServeOpts::default()));

    match command {
        cli::Command::Serve(opts) => {
            let filter = std::env::var("PRESENCE_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            run_server(opts.into()).await?;
        }
        cli::Command::Identity(opts) => {
            let mut generator = IdentityGenerator::new();
            let identity = generator.generate();
            let suggestions = match opts.base.as_deref() {
                Some(base) => generator.suggest_usernames_for(base, opts.suggestions),
                None => generator.suggest_usernames(opts.suggestions),
            };
            let out = serde_json::json!({
                "identity": identity,
                "suggestions": suggestions,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    Ok(())
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    config.validate()?;
    tracing::info!(
        http_addr = %config.http_addr,
        ws_addr = %config.ws_addr,
        reap_interval_secs = config.reap_interval.as_secs(),
        stale_after_secs = config.stale_after.as_secs(),
        "presence daemon starting"
    );

    let store = Arc::new(SessionStore::new());
    let service = Arc::new(PresenceService::new(
        store,
        config.stale_after,
        config.event_buffer,
    ));
    let cancel = CancellationToken::new();

    let http_listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    let mut http_handle = tokio::spawn(http::serve(
        http_listener,
        http::router(Arc::clone(&service)),
        cancel.clone(),
    ));

    let ws = WsServer::new(config.ws_addr, Arc::clone(&service), cancel.clone())
        .with_max_connections(config.ws_max_connections)
        .with_allowed_origins(config.ws_allowed_origins.clone())
        .with_ping_heartbeat(config.ws_ping_heartbeat);
    let (ws_listener, _) = ws.bind().await?;
    let mut ws_handle = tokio::spawn(async move { ws.serve(ws_listener).await });

    let reaper_handle = tokio::spawn(run_reaper(
        Arc::clone(&service),
        config.reap_interval,
        cancel.clone(),
    ));

    // Wait for shutdown signal (ctrl-c or SIGTERM)
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to register SIGTERM handler");
                    ctrl_c.await.ok();
                    tracing::info!("received ctrl-c, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    tokio::select! {
        () = shutdown => {}
        result = &mut http_handle => {
            tracing::warn!(result = ?result, "http server exited unexpectedly");
        }
        result = &mut ws_handle => {
            tracing::warn!(result = ?result, "ws server exited unexpectedly");
        }
    }

    cancel.cancel();
    if !http_handle.is_finished() {
        let _ = http_handle.await;
    }
    if !ws_handle.is_finished() {
        let _ = ws_handle.await;
    }
    let _ = reaper_handle.await;
    tracing::info!("presence daemon stopped");
    Ok(())
}
