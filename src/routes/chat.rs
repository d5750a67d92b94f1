// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Chat dispatch entry point.
//!
//! Accepts a user message, persists it, fires the AI workflow webhook
//! and returns immediately; the reply is delivered later through one of
//! the reconciliation channels (SSE, raw stream, WebSocket).

use crate::error::{AppError, Result};
use crate::middleware::rate_limit::Identity;
use crate::AppState;
use axum::{extract::State, routing::post, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/ai/chat", post(send_message))
}

/// Chat request. `conversation_id` is optional: the first message of a
/// fresh conversation omits it.
#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[serde(default, alias = "conversationId")]
    pub conversation_id: Option<String>,
    #[validate(length(min = 1, max = 4000, message = "message must be 1-4000 characters"))]
    pub message: String,
    /// Hint for the workflow ("fitness", "career", ...)
    #[serde(default, alias = "objectiveType")]
    pub objective_type: Option<String>,
}

/// Immediate acknowledgment; the actual reply arrives asynchronously.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub conversation_id: String,
    pub message_id: String,
    pub status: String,
}

/// Persist the message and dispatch it to the AI workflow.
async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    request
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let conversation = match &request.conversation_id {
        Some(id) => state
            .conversations
            .get_conversation(id, &identity.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Conversation {} not found", id)))?,
        None => state.conversations.create_conversation(&identity.id).await?,
    };

    let (conversation, message_id) = state
        .conversations
        .append_user_message(&conversation.id, &identity.id, &request.message)
        .await?;

    // Context enrichment only exists for authenticated users; anonymous
    // identities have no user document.
    let user = if identity.is_authenticated() {
        state.db.get_user(&identity.id).await.unwrap_or_else(|e| {
            tracing::warn!(user_id = %identity.id, error = %e, "User lookup failed for dispatch context");
            None
        })
    } else {
        None
    };

    let payload = state.dispatcher.build_payload(
        &conversation,
        user.as_ref(),
        &message_id,
        &request.message,
        request.objective_type.clone(),
    );
    state.dispatcher.dispatch(&state.correlations, payload);

    tracing::info!(
        conversation_id = %conversation.id,
        message_id = %message_id,
        identity = %identity.id,
        "Message dispatched to AI workflow"
    );

    Ok(Json(ChatResponse {
        conversation_id: conversation.id,
        message_id,
        status: "processing".to_string(),
    }))
}
