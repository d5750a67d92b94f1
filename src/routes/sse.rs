// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Reconciliation channel A: poll-based SSE delivery.
//!
//! The client connects with the `(conversation_id, message_id)` pair it
//! got from the dispatch acknowledgment. The stream re-reads the
//! conversation every two seconds and closes once the reply has landed;
//! the callback handler can also push through the SSE registry so a
//! reply is delivered without waiting for the next poll tick.

use crate::models::ConversationStatus;
use crate::services::registry::{DeliveryNotice, SseRegistry};
use crate::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/ai/sse", get(subscribe))
}

#[derive(Debug, Deserialize)]
struct SubscribeParams {
    #[serde(rename = "conversationId", alias = "conversation_id")]
    conversation_id: String,
    #[serde(rename = "messageId", alias = "message_id")]
    message_id: String,
}

/// Unregisters the stream handle when the client goes away.
struct StreamGuard {
    registry: Arc<SseRegistry>,
    conversation_id: String,
    message_id: String,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.registry
            .unregister(&self.conversation_id, &self.message_id);
    }
}

fn event(kind: &str, payload: serde_json::Value) -> Event {
    Event::default().event(kind).data(payload.to_string())
}

/// Open the one-way push stream for an outstanding request.
async fn subscribe(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SubscribeParams>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let SubscribeParams {
        conversation_id,
        message_id,
    } = params;

    tracing::debug!(
        conversation_id = %conversation_id,
        message_id = %message_id,
        "SSE subscriber connected"
    );

    let mut notifications = state
        .sse_registry
        .register(&conversation_id, &message_id);
    let guard = StreamGuard {
        registry: Arc::clone(&state.sse_registry),
        conversation_id: conversation_id.clone(),
        message_id: message_id.clone(),
    };

    let stream = async_stream::stream! {
        // Owned by the generator so client disconnect runs the cleanup.
        let _guard = guard;

        yield Ok(event("connected", json!({ "type": "connected" })));

        let mut poll = tokio::time::interval(POLL_INTERVAL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                notice = notifications.recv() => {
                    match notice {
                        Some(DeliveryNotice { content, is_final: true }) => {
                            yield Ok(event("complete", json!({
                                "type": "complete",
                                "content": content,
                                "isThinking": false,
                            })));
                            break;
                        }
                        Some(DeliveryNotice { content, is_final: false }) => {
                            yield Ok(event("message", json!({
                                "type": "message",
                                "content": content,
                                "isThinking": true,
                            })));
                        }
                        None => break,
                    }
                }
                _ = poll.tick() => {
                    match state.db.get_conversation(&conversation_id).await {
                        Ok(Some(conversation)) => {
                            let reply = conversation.last_assistant_message();
                            if conversation.status == ConversationStatus::Completed {
                                if let Some(reply) = reply {
                                    yield Ok(event("complete", json!({
                                        "type": "complete",
                                        "content": reply.content,
                                        "isThinking": false,
                                    })));
                                    break;
                                }
                            }
                            // Reply still pending: let the client know we
                            // are alive and thinking.
                            yield Ok(event("message", json!({
                                "type": "message",
                                "isThinking": true,
                            })));
                        }
                        Ok(None) => {
                            yield Ok(event("error", json!({
                                "type": "error",
                                "message": "conversation not found",
                            })));
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(
                                conversation_id = %conversation_id,
                                error = %e,
                                "SSE poll read failed"
                            );
                            yield Ok(event("error", json!({
                                "type": "error",
                                "message": "read failed",
                            })));
                            break;
                        }
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keepalive"),
    )
}
