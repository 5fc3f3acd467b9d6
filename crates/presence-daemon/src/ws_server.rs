//! WebSocket push channel: auth, ping and user-list frames over tokio-tungstenite.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use presence_core::PresenceUser;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, broadcast};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_WS_MAX_CONNECTIONS;
use crate::error::DaemonError;
use crate::service::{HeartbeatRequest, PresenceChange, PresenceService};

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Inbound control frames. Anything else is ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    Auth {
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        display_name: Option<String>,
        #[serde(default)]
        is_anonymous: Option<bool>,
    },
    Ping,
    UserListRequest,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    AuthOk {
        username: String,
    },
    Pong,
    #[serde(rename_all = "camelCase")]
    UserList {
        total_online: usize,
        online_users: Vec<PresenceUser>,
        #[serde(skip_serializing_if = "Option::is_none")]
        change: Option<PresenceChange>,
    },
    Error {
        message: String,
    },
}

impl ServerFrame {
    fn user_list(service: &PresenceService, change: Option<PresenceChange>) -> Self {
        let snapshot = service.get_presence();
        Self::UserList {
            total_online: snapshot.total,
            online_users: snapshot.users,
            change,
        }
    }

    fn to_message(&self) -> Result<Message, DaemonError> {
        Ok(Message::Text(serde_json::to_string(self)?))
    }
}

/// Identity a connection claimed via `auth`.
#[derive(Debug, Clone)]
struct AuthedUser {
    username: String,
    display_name: Option<String>,
    is_anonymous: bool,
}

// ---------------------------------------------------------------------------
// Origin validation
// ---------------------------------------------------------------------------

/// `(scheme, host, port)` of a serialized origin, lower-cased. `None` for
/// anything carrying a path, query, or no host.
fn origin_key(origin: &str) -> Option<(String, String, Option<u16>)> {
    let uri: http::Uri = origin.parse().ok()?;
    if !matches!(uri.path(), "" | "/") || uri.query().is_some() {
        return None;
    }
    Some((
        uri.scheme_str()?.to_ascii_lowercase(),
        uri.host()?.to_ascii_lowercase(),
        uri.port_u16(),
    ))
}

/// Accept the upgrade if `Origin` is absent (non-browser client), `null`,
/// `http://localhost` or `http://127.0.0.1` on any port, or exactly one of
/// `allowed`. Otherwise HTTP 403.
fn check_origin(req: &Request, allowed: &[String]) -> Result<(), ErrorResponse> {
    let Some(origin) = req.headers().get("origin") else {
        return Ok(());
    };
    let origin = origin.to_str().unwrap_or("");
    let permitted = origin == "null"
        || origin_key(origin).is_some_and(|(scheme, host, port)| {
            (scheme == "http" && matches!(host.as_str(), "localhost" | "127.0.0.1"))
                || allowed
                    .iter()
                    .filter_map(|entry| origin_key(entry))
                    .any(|(s, h, p)| s == scheme && h == host && p == port)
        });
    if permitted {
        return Ok(());
    }

    tracing::warn!(origin = %origin, "ws: rejected connection from disallowed origin");
    let mut resp = ErrorResponse::new(Some("Origin not allowed".into()));
    *resp.status_mut() = http::StatusCode::FORBIDDEN;
    Err(resp)
}

// ---------------------------------------------------------------------------
// WsServer
// ---------------------------------------------------------------------------

/// WebSocket push channel for presence changes.
///
/// Connections that sent `auth` receive a full `user_list` frame after every
/// presence change. Anyone may ask for a one-off snapshot with
/// `user_list_request`.
pub struct WsServer {
    addr: SocketAddr,
    service: Arc<PresenceService>,
    cancel: CancellationToken,
    max_connections: usize,
    allowed_origins: Arc<Vec<String>>,
    ping_heartbeat: bool,
}

impl WsServer {
    pub fn new(addr: SocketAddr, service: Arc<PresenceService>, cancel: CancellationToken) -> Self {
        Self {
            addr,
            service,
            cancel,
            max_connections: DEFAULT_WS_MAX_CONNECTIONS,
            allowed_origins: Arc::new(Vec::new()),
            ping_heartbeat: false,
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = Arc::new(origins);
        self
    }

    /// When set, `ping` from an authenticated connection refreshes presence.
    pub fn with_ping_heartbeat(mut self, enabled: bool) -> Self {
        self.ping_heartbeat = enabled;
        self
    }

    pub async fn run(&self) -> std::io::Result<()> {
        let (listener, _) = self.bind().await?;
        self.serve(listener).await
    }

    /// Bind to the configured address and return the actual local address.
    /// Useful when binding to port 0 to get an OS-assigned ephemeral port.
    pub async fn bind(&self) -> std::io::Result<(TcpListener, SocketAddr)> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, max_connections = self.max_connections, "ws server listening");
        Ok((listener, local_addr))
    }

    /// Run the accept loop on a pre-bound listener until cancelled.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_connections));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let permit = match semaphore.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    tracing::warn!(
                                        peer = %peer,
                                        max = self.max_connections,
                                        "ws: connection limit reached, rejecting"
                                    );
                                    drop(stream);
                                    continue;
                                }
                            };
                            tracing::debug!(peer = %peer, "ws: TCP connection accepted");
                            let conn = Connection {
                                service: Arc::clone(&self.service),
                                changes: self.service.subscribe(),
                                cancel: self.cancel.clone(),
                                ping_heartbeat: self.ping_heartbeat,
                                user: None,
                            };
                            let allowed = Arc::clone(&self.allowed_origins);
                            tokio::spawn(async move {
                                let _permit = permit;
                                let callback = |req: &Request, resp: Response| {
                                    check_origin(req, &allowed).map(|()| resp)
                                };
                                match tokio_tungstenite::accept_hdr_async(stream, callback).await {
                                    Ok(ws_stream) => {
                                        if let Err(e) = conn.run(ws_stream).await {
                                            tracing::debug!(peer = %peer, error = %e, "ws client handler finished with error");
                                        }
                                    }
                                    Err(e) => {
                                        tracing::debug!(peer = %peer, error = %e, "ws handshake failed");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "ws: TCP accept failed");
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("ws server: cancellation requested, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

struct Connection {
    service: Arc<PresenceService>,
    changes: broadcast::Receiver<PresenceChange>,
    cancel: CancellationToken,
    ping_heartbeat: bool,
    user: Option<AuthedUser>,
}

impl Connection {
    /// Drive one client until it disconnects, a send fails, or the server
    /// shuts down. Errors stay with this connection.
    async fn run(mut self, ws_stream: WebSocketStream<TcpStream>) -> Result<(), DaemonError> {
        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        tracing::debug!("ws client connected");

        loop {
            tokio::select! {
                msg = ws_rx.next() => {
                    let msg = match msg {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            tracing::debug!(error = %e, "ws read error, dropping client");
                            return Err(e.into());
                        }
                        None => {
                            tracing::debug!("ws client disconnected (stream ended)");
                            return Ok(());
                        }
                    };

                    let text = match msg {
                        Message::Text(t) => t,
                        Message::Close(_) => {
                            tracing::debug!("ws client sent close frame");
                            return Ok(());
                        }
                        Message::Ping(data) => {
                            ws_tx.send(Message::Pong(data)).await?;
                            continue;
                        }
                        _ => continue,
                    };

                    if let Some(reply) = self.handle_frame(&text) {
                        ws_tx.send(reply.to_message()?).await?;
                    }
                }

                change = self.changes.recv() => {
                    let change = match change {
                        Ok(c) => Some(c),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // Every push is a full snapshot, so one fresh
                            // frame catches the client up.
                            tracing::warn!(skipped, "ws client lagged, dropped presence changes");
                            None
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::debug!("ws change channel closed, dropping client");
                            return Ok(());
                        }
                    };
                    if self.user.is_some() {
                        let frame = ServerFrame::user_list(&self.service, change);
                        ws_tx.send(frame.to_message()?).await?;
                    }
                }

                _ = self.cancel.cancelled() => {
                    tracing::debug!("ws client handler: cancellation requested");
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }

    /// Apply one inbound text frame; returns the direct reply, if any.
    fn handle_frame(&mut self, text: &str) -> Option<ServerFrame> {
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(e) => {
                tracing::debug!(error = %e, "ws: ignoring unrecognized frame");
                return None;
            }
        };

        match frame {
            ClientFrame::Auth {
                username,
                display_name,
                is_anonymous,
            } => {
                let username = username.as_deref().unwrap_or("");
                if !presence_core::validate_format(username) {
                    return Some(ServerFrame::Error {
                        message: format!("invalid username '{username}'"),
                    });
                }
                tracing::debug!(username = %username, "ws client authenticated");
                self.user = Some(AuthedUser {
                    username: username.to_string(),
                    display_name,
                    is_anonymous: is_anonymous.unwrap_or(false),
                });
                Some(ServerFrame::AuthOk {
                    username: username.to_string(),
                })
            }

            ClientFrame::Ping => {
                if let (true, Some(user)) = (self.ping_heartbeat, &self.user) {
                    let req = HeartbeatRequest {
                        username: Some(user.username.clone()),
                        display_name: user.display_name.clone(),
                        is_anonymous: Some(user.is_anonymous),
                        session_id: None,
                    };
                    if let Err(e) = self.service.heartbeat(req) {
                        tracing::debug!(error = %e, "ws: ping heartbeat rejected");
                    }
                }
                Some(ServerFrame::Pong)
            }

            ClientFrame::UserListRequest => Some(ServerFrame::user_list(&self.service, None)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
