//! WebSocket connection manager
//!
//! Accepts connections on the configured path, runs the trust gate
//! before upgrading, and gives each admitted connection its own
//! `Session`. Inbound messages are handled sequentially per connection;
//! replies (including late print replies) go out through one writer
//! task that drains the connection's `Outbox`.

use crate::error::{HatchError, Result};
use crate::print::bridge::PrintBridge;
use crate::protocol::{Outbox, Session};
use crate::trust::{Handshake, TrustGate};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Shared state handed to every connection
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<TrustGate>,
    pub profile_dir: Arc<PathBuf>,
    pub printer: PrintBridge,
}

impl AppState {
    pub fn new(gate: TrustGate, profile_dir: impl Into<PathBuf>, printer: PrintBridge) -> Self {
        Self {
            gate: Arc::new(gate),
            profile_dir: Arc::new(profile_dir.into()),
            printer,
        }
    }
}

/// Build the router serving WebSocket upgrades on `path`
pub fn router(state: AppState, path: &str) -> Router {
    Router::new()
        .route(path, get(ws_upgrade))
        .with_state(state)
}

/// Bind the listening socket
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| HatchError::Server(format!("Failed to bind to {addr}: {e}")))
}

/// Serve `app` on `listener` until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Hatch listening");
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|e| HatchError::Server(format!("Server error: {e}")))?;

    tracing::info!("Hatch stopped accepting connections");
    Ok(())
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let handshake = Handshake {
        remote,
        origin: headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };

    let (outbox, rx) = Outbox::channel(Uuid::new_v4());
    let session = match Session::open(
        &state.gate,
        &handshake,
        &state.profile_dir,
        state.printer.clone(),
        outbox,
    ) {
        Ok(session) => session,
        Err(e) => return (StatusCode::FORBIDDEN, e.to_string()).into_response(),
    };

    ws.on_upgrade(move |socket| run_connection(socket, session, rx))
}

async fn run_connection(
    socket: WebSocket,
    mut session: Session,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    let id = session.id();
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(Message::Binary(bytes)) => {
                    tracing::debug!(
                        connection = %id,
                        bytes = bytes.len(),
                        "Ignoring binary message"
                    );
                    continue;
                }
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(connection = %id, error = %e, "WebSocket error");
                    break;
                }
            };

            if let Some(reply) = session.handle_message(&text).await {
                session.outbox().send(&reply);
            }
        }
        session.close();
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::debug!(connection = %id, "Connection finished");
}
