// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Reconciliation channel C: WebSocket relay.
//!
//! Sockets join a group keyed by conversation ID; the callback handler
//! (or any internal caller) posts to `/notify` to broadcast a payload
//! to the whole group. Heartbeat pings keep idle connections alive;
//! disconnects remove the socket and drop empty groups.

use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(upgrade))
        .route("/notify", post(notify))
        .route("/status", get(status))
}

#[derive(Debug, Deserialize)]
struct WsParams {
    #[serde(rename = "conversationId", alias = "conversation_id")]
    conversation_id: String,
}

/// Upgrade the connection and attach it to its conversation group.
async fn upgrade(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let conversation_id = params.conversation_id;
    if conversation_id.is_empty() {
        return (StatusCode::BAD_REQUEST, "conversation_id is required").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(state, socket, conversation_id))
}

async fn handle_socket(state: Arc<AppState>, socket: WebSocket, conversation_id: String) {
    let (conn_id, mut frames) = state.ws_relay.join(&conversation_id);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let connected = json!({
        "type": "connected",
        "conversationId": conversation_id,
    })
    .to_string();
    if ws_tx.send(Message::Text(connected.into())).await.is_err() {
        state.ws_relay.leave(&conversation_id, conn_id);
        return;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // Consume the immediate first tick so the first ping comes after a
    // full interval.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            frame = frames.recv() => {
                match frame {
                    Some(frame) => {
                        if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                if ws_tx.send(Message::Ping(axum::body::Bytes::new())).await.is_err() {
                    break;
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Client frames (pongs included) are ignored; this
                    // channel only pushes.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.ws_relay.leave(&conversation_id, conn_id);
    tracing::debug!(
        conversation_id = %conversation_id,
        conn_id,
        "WebSocket disconnected"
    );
}

/// Internal notify request, posted by the callback handler.
#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    pub delivered: bool,
    pub connections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Broadcast a payload to every socket in a conversation group.
async fn notify(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NotifyRequest>,
) -> Json<NotifyResponse> {
    let frame = request.data.to_string();
    let connections = state.ws_relay.broadcast(&request.conversation_id, &frame);

    if connections == 0 {
        tracing::debug!(
            conversation_id = %request.conversation_id,
            "Notify with no active connection"
        );
        return Json(NotifyResponse {
            delivered: false,
            connections: 0,
            message: Some("no active connection".to_string()),
        });
    }

    Json(NotifyResponse {
        delivered: true,
        connections,
        message: None,
    })
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub groups: usize,
    pub connections: usize,
    pub sse_streams: usize,
    pub pending_correlations: usize,
}

/// Relay liveness snapshot.
async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let (groups, connections) = state.ws_relay.status();
    Json(StatusResponse {
        groups,
        connections,
        sse_streams: state.sse_registry.active_streams(),
        pending_correlations: state.correlations.len(),
    })
}
