//! Axum WebSocket listener for downstream clients.
//!
//! [`start_server`] binds the configured address, mounts the WebSocket
//! endpoint at `/` and a `/health` endpoint, and serves in a background
//! Tokio task. Clients are receive-only: each accepted connection gets a
//! send loop draining its per-client channel; inbound frames are read only
//! to observe close.
//!
//! # Health endpoint
//!
//! `GET /health` returns `200 OK` with a JSON body:
//! ```json
//! { "status": "ok", "clients": 3, "uptime_secs": 120 }
//! ```

use std::{net::SocketAddr, time::Instant};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tower_http::cors::CorsLayer;

use crate::{
    clients::{ClientId, ClientManager},
    error::{BridgeError, BridgeResult},
};

// ════════════════════════════════════════════════════════════════════
// Shared server state
// ════════════════════════════════════════════════════════════════════

#[derive(Clone)]
struct ServerState {
    clients: ClientManager,
    channel_capacity: usize,
    started_at: Instant,
}

// ════════════════════════════════════════════════════════════════════
// Server start
// ════════════════════════════════════════════════════════════════════

/// Bind the WebSocket listener and serve it in a background Tokio task.
///
/// Binding happens before this function returns so the caller gets the
/// actual local address (useful with port 0) and a bind failure surfaces
/// as an error instead of a log line from a detached task.
pub async fn start_server(
    bind_addr: SocketAddr,
    clients: ClientManager,
    channel_capacity: usize,
) -> BridgeResult<(SocketAddr, JoinHandle<()>)> {
    let state = ServerState {
        clients,
        channel_capacity,
        started_at: Instant::now(),
    };

    let app = Router::new()
        .route("/", get(ws_upgrade_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| BridgeError::transport(bind_addr.to_string(), e))?;
    let local_addr = listener.local_addr()?;

    tracing::info!("WebSocket listener on {}", local_addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        {
            tracing::error!("WebSocket server error: {}", e);
        }
    });

    Ok((local_addr, handle))
}

// ════════════════════════════════════════════════════════════════════
// Handlers
// ════════════════════════════════════════════════════════════════════

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    tracing::debug!("upgrading WebSocket connection from {}", remote_addr);
    ws.on_upgrade(move |socket: WebSocket| run_session(socket, state))
}

/// Health check endpoint.
async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "clients": state.clients.client_count(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

// ════════════════════════════════════════════════════════════════════
// Session
// ════════════════════════════════════════════════════════════════════

/// Drive a single WebSocket connection to completion.
///
/// New clients receive only future messages — there is no backlog or replay.
async fn run_session(socket: WebSocket, state: ServerState) {
    let (id, rx) = state.clients.register(state.channel_capacity);
    tracing::info!("{}: connected ({} total)", id, state.clients.client_count());

    let (ws_sender, ws_receiver) = socket.split();

    // Send loop drains the per-client channel into the socket.
    let send_handle = tokio::spawn(send_loop(ws_sender, rx, id));

    // Clients are receive-only; the read side exists to notice the close.
    recv_loop(ws_receiver, id).await;

    send_handle.abort();
    state.clients.unregister(id);
    tracing::info!(
        "{}: disconnected ({} total)",
        id,
        state.clients.client_count()
    );
}

async fn send_loop(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
    id: ClientId,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            tracing::debug!("{}: send failed, closing", id);
            break;
        }
    }
}

async fn recv_loop(
    mut ws_receiver: futures_util::stream::SplitStream<WebSocket>,
    id: ClientId,
) {
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                tracing::debug!("{}: received close frame", id);
                break;
            }
            // No client → server protocol is defined; drop anything else.
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("{}: recv error: {}", id, e);
                break;
            }
        }
    }
}
