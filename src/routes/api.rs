// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for authenticated users.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{Conversation, Objective, UserStats};
use crate::services::conversation::DEFAULT_LIST_LIMIT;
use crate::services::{ConversationSummary, StepCompletion};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

const MAX_LIST_LIMIT: u32 = 100;

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/me", get(get_me))
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route("/api/conversations/{id}", get(get_conversation))
        .route("/api/objectives", get(list_objectives))
        .route("/api/objectives/{id}", get(get_objective).delete(delete_objective))
        .route(
            "/api/objectives/{id}/steps/{step_id}/complete",
            post(complete_step),
        )
        .route(
            "/api/objectives/{id}/steps/{step_id}/unlock",
            post(toggle_step_lock),
        )
        .route("/api/account", delete(delete_account))
}

// ─── User Profile ────────────────────────────────────────────

/// Current user response.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub plan: String,
    #[cfg_attr(feature = "binding-generation", ts(type = "object"))]
    pub stats: UserStats,
}

/// Get current user profile with gamification stats.
async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<UserResponse>> {
    let profile = state.db.get_user(&user.user_id).await?.ok_or_else(|| {
        AppError::NotFound(format!("User {} not found", user.user_id))
    })?;

    Ok(Json(UserResponse {
        id: profile.id,
        name: profile.name,
        email: profile.email,
        plan: profile.subscription.plan,
        stats: profile.stats,
    }))
}

// ─── Conversations ───────────────────────────────────────────

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<u32>,
}

#[derive(Serialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationSummary>,
}

/// List the caller's conversations, most recently updated first.
async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<ListQuery>,
) -> Result<Json<ConversationListResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    if limit == 0 {
        return Err(AppError::BadRequest(
            "limit must be greater than 0".to_string(),
        ));
    }

    let conversations = state
        .conversations
        .list_conversations(&user.user_id, limit)
        .await?;

    Ok(Json(ConversationListResponse { conversations }))
}

/// Start (or reuse) an empty draft conversation.
async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Conversation>> {
    let conversation = state.conversations.create_conversation(&user.user_id).await?;
    Ok(Json(conversation))
}

/// Fetch a single conversation with its full message log.
async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>> {
    let conversation = state
        .conversations
        .get_conversation(&id, &user.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Conversation {} not found", id)))?;

    Ok(Json(conversation))
}

// ─── Objectives ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct ObjectiveListResponse {
    pub objectives: Vec<Objective>,
}

/// List the caller's objectives, newest first.
async fn list_objectives(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<ListQuery>,
) -> Result<Json<ObjectiveListResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    let objectives = state
        .db
        .get_objectives_for_user(&user.user_id, limit)
        .await?;

    Ok(Json(ObjectiveListResponse { objectives }))
}

/// Fetch a single objective with its skill tree.
async fn get_objective(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Objective>> {
    let objective = state
        .db
        .get_objective(&id)
        .await?
        .filter(|o| o.user_id == user.user_id)
        .ok_or_else(|| AppError::NotFound(format!("Objective {} not found", id)))?;

    Ok(Json(objective))
}

/// Delete an objective (owner only).
async fn delete_objective(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    // Ownership check before the delete; foreign objectives 404.
    state
        .db
        .get_objective(&id)
        .await?
        .filter(|o| o.user_id == user.user_id)
        .ok_or_else(|| AppError::NotFound(format!("Objective {} not found", id)))?;

    state.db.delete_objective(&id).await?;
    tracing::info!(user_id = %user.user_id, objective_id = %id, "Objective deleted");

    Ok(Json(serde_json::json!({ "success": true })))
}

// ─── Steps ───────────────────────────────────────────────────

/// Complete a step in an objective's skill tree.
async fn complete_step(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((id, step_id)): Path<(String, String)>,
) -> Result<Json<StepCompletion>> {
    let outcome = state
        .skill_trees
        .complete_step(&id, &step_id, &user.user_id)
        .await?;

    Ok(Json(outcome))
}

#[derive(Serialize)]
pub struct ToggleLockResponse {
    pub step_id: String,
    pub unlocked: bool,
}

/// Manually toggle a step's lock state.
async fn toggle_step_lock(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((id, step_id)): Path<(String, String)>,
) -> Result<Json<ToggleLockResponse>> {
    let unlocked = state
        .skill_trees
        .toggle_step_lock(&id, &step_id, &user.user_id)
        .await?;

    Ok(Json(ToggleLockResponse { step_id, unlocked }))
}

// ─── Account Deletion ────────────────────────────────────────

/// Response for account deletion.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct DeleteAccountResponse {
    pub success: bool,
    pub deleted_documents: usize,
}

/// Delete the caller's account and all associated data.
///
/// Cascades over conversations and objectives before removing the user
/// document itself.
async fn delete_account(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<DeleteAccountResponse>> {
    tracing::info!(user_id = %user.user_id, "User-initiated account deletion");

    let deleted_documents = state.db.delete_user_data(&user.user_id).await?;

    Ok(Json(DeleteAccountResponse {
        success: true,
        deleted_documents,
    }))
}
