use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::api::{Caller, SharedState};
use super::fanout::{ConnectionId, FanoutHub};
use super::models::Principal;
use crate::config::ShopConfig;

/// Transport keepalive settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    /// How often to send WebSocket Ping frames.
    pub ping_interval: Duration,
    /// How long to wait for a Pong after a Ping before dropping the connection.
    pub pong_timeout: Duration,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(25),
            pong_timeout: Duration::from_secs(35),
        }
    }
}

impl Keepalive {
    pub fn from_config(config: &ShopConfig) -> Self {
        Self {
            ping_interval: config.ping_interval(),
            pong_timeout: config.pong_timeout(),
        }
    }
}

// ── WebSocket handler ────────────────────────────────────────────────

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Caller(principal): Caller,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    let hub = Arc::clone(&state.hub);
    let keepalive = state.keepalive;
    ws.on_upgrade(move |socket| handle_socket(socket, hub, principal, keepalive))
}

async fn handle_socket(
    socket: WebSocket,
    hub: Arc<FanoutHub>,
    principal: Principal,
    keepalive: Keepalive,
) {
    let (id, outbound) = hub.connect(principal).await;
    tracing::info!(connection = %id, "websocket connected");
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, outbound, &hub, id, keepalive).await;
    hub.disconnect(id).await;
    tracing::info!(connection = %id, "websocket disconnected");
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards frames queued by the hub, hands inbound text to the hub, and
/// pings on an interval. If no Pong (or any other client traffic) arrives
/// within `pong_timeout` of a Ping, the connection is considered dead.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut outbound: mpsc::Receiver<String>,
    hub: &FanoutHub,
    id: ConnectionId,
    keepalive: Keepalive,
) {
    let mut ping_interval = tokio::time::interval(keepalive.ping_interval);
    // The first tick completes immediately; consume it so the first real
    // ping fires after ping_interval has elapsed.
    ping_interval.tick().await;

    let pong_deadline = tokio::time::sleep(keepalive.pong_timeout);
    tokio::pin!(pong_deadline);
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            // ── Periodic ping ───────────────────────────────────────
            _ = ping_interval.tick() => {
                if awaiting_pong {
                    continue;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
                pong_deadline.as_mut().reset(Instant::now() + keepalive.pong_timeout);
            }

            _ = &mut pong_deadline, if awaiting_pong => {
                tracing::info!(connection = %id, "no pong before timeout, closing");
                break;
            }

            // ── Hub frames ──────────────────────────────────────────
            frame = outbound.recv() => {
                match frame {
                    Some(text) => {
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    // The hub dropped this connection.
                    None => break,
                }
            }

            // ── Client messages ─────────────────────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Text(text))) => {
                        awaiting_pong = false;
                        hub.handle_inbound(id, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Binary and Ping frames carry nothing for us;
                        // axum answers Pings itself.
                    }
                    Some(Err(e)) => {
                        tracing::debug!(connection = %id, error = %e, "websocket read failed");
                        break;
                    }
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}
