// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Inbound callback from the AI workflow.
//!
//! The workflow posts the finished (or partial) reply here. The handler
//! resolves which conversation it belongs to, appends the assistant
//! message, materializes an objective when one is attached, and then
//! wakes whichever reconciliation channels have listeners.
//!
//! The endpoint always answers 200 to well-formed deliveries it cannot
//! route; the workflow retries on non-2xx and a retry cannot succeed
//! where the original failed.

use crate::models::ObjectiveDraft;
use crate::services::registry::DeliveryNotice;
use crate::AppState;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/ai/webhook", post(handle_callback))
}

/// Callback payload (camelCase on the wire, matching the dispatch).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub content: String,
    #[serde(default = "default_is_final")]
    pub is_final: bool,
    #[serde(default)]
    pub objective: Option<ObjectiveDraft>,
}

fn default_is_final() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objective_id: Option<String>,
}

/// Handle the workflow's reply.
async fn handle_callback(
    State(state): State<Arc<AppState>>,
    Json(raw): Json<serde_json::Value>,
) -> (StatusCode, Json<CallbackResponse>) {
    let payload: CallbackPayload = match serde_json::from_value(raw) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "Failed to parse AI workflow callback");
            // Still 200: a malformed delivery will not improve on retry.
            return (
                StatusCode::OK,
                Json(CallbackResponse {
                    received: false,
                    objective_id: None,
                }),
            );
        }
    };

    // Resolve the target conversation: explicit field, then the
    // correlation side-table, then the persisted last_message_id.
    let correlation = payload
        .message_id
        .as_deref()
        .and_then(|id| state.correlations.take(id));

    let conversation_id = match (&payload.conversation_id, &correlation) {
        (Some(id), _) => Some(id.clone()),
        (None, Some(pending)) => Some(pending.conversation_id.clone()),
        (None, None) => match &payload.message_id {
            Some(message_id) => state
                .db
                .find_conversation_by_message_id(message_id)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Correlation fallback lookup failed");
                    None
                })
                .map(|c| c.id),
            None => None,
        },
    };

    let Some(conversation_id) = conversation_id else {
        tracing::warn!(
            message_id = ?payload.message_id,
            "Unroutable AI callback: no conversation context"
        );
        return (
            StatusCode::OK,
            Json(CallbackResponse {
                received: false,
                objective_id: None,
            }),
        );
    };

    let conversation = match state
        .conversations
        .append_assistant_message(&conversation_id, &payload.content, payload.is_final)
        .await
    {
        Ok(conversation) => conversation,
        Err(e) => {
            tracing::error!(
                conversation_id = %conversation_id,
                error = %e,
                "Failed to append assistant message from callback"
            );
            return (
                StatusCode::OK,
                Json(CallbackResponse {
                    received: false,
                    objective_id: None,
                }),
            );
        }
    };

    // Materialize an attached skill tree into an objective.
    let mut objective_id = None;
    if let Some(draft) = payload.objective {
        match state
            .skill_trees
            .materialize_objective(&conversation.user_id, &conversation_id, draft)
            .await
        {
            Ok(objective) => {
                if let Err(e) = state
                    .conversations
                    .link_objective(&conversation_id, &objective.id)
                    .await
                {
                    tracing::warn!(
                        conversation_id = %conversation_id,
                        objective_id = %objective.id,
                        error = %e,
                        "Failed to back-link objective onto conversation"
                    );
                }
                objective_id = Some(objective.id);
            }
            Err(e) => {
                tracing::error!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "Failed to materialize objective from callback"
                );
            }
        }
    }

    // Wake the delivery channels. The message ID for the SSE registry
    // falls back to the stored correlation when the payload omits it.
    let message_id = payload
        .message_id
        .clone()
        .or_else(|| conversation.last_message_id.clone());

    if let Some(message_id) = &message_id {
        let pushed = state.sse_registry.notify(
            &conversation_id,
            message_id,
            DeliveryNotice {
                content: payload.content.clone(),
                is_final: payload.is_final,
            },
        );
        if pushed {
            tracing::debug!(
                conversation_id = %conversation_id,
                message_id = %message_id,
                "Callback pushed to SSE stream"
            );
        }
    }

    let frame = json!({
        "type": if payload.is_final { "complete" } else { "message" },
        "content": payload.content,
        "isFinal": payload.is_final,
        "messageId": message_id,
        "objectiveId": objective_id,
    })
    .to_string();
    let delivered = state.ws_relay.broadcast(&conversation_id, &frame);

    tracing::info!(
        conversation_id = %conversation_id,
        is_final = payload.is_final,
        ws_delivered = delivered,
        objective = objective_id.is_some(),
        "AI callback processed"
    );

    (
        StatusCode::OK,
        Json(CallbackResponse {
            received: true,
            objective_id,
        }),
    )
}
