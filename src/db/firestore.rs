// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Users (profile + gamification stats)
//! - Conversations (append-only chat logs with AI-reply bookkeeping)
//! - Objectives (skill-tree documents)
//!
//! The underlying client is created lazily on first use and retried with
//! backoff; a periodic health check drops a dead client so the next call
//! reconnects.

use crate::db::collections;
use crate::error::AppError;
use crate::models::{Conversation, Objective, User};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

// Firestore limits batch/transaction writes to 500 operations.
// We use a safe limit of 400 to allow headroom.
const BATCH_SIZE: usize = 400;
const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_BACKOFF_MS: u64 = 200;

enum Mode {
    Live,
    /// Offline mode for tests: every operation returns a database error.
    Mock,
}

struct DbInner {
    project_id: String,
    mode: Mode,
    client: RwLock<Option<firestore::FirestoreDb>>,
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    inner: Arc<DbInner>,
}

impl FirestoreDb {
    /// Create a new lazy Firestore handle. No connection is made until
    /// the first operation runs.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub fn new(project_id: &str) -> Self {
        Self {
            inner: Arc::new(DbInner {
                project_id: project_id.to_string(),
                mode: Mode::Live,
                client: RwLock::new(None),
            }),
        }
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self {
            inner: Arc::new(DbInner {
                project_id: "mock".to_string(),
                mode: Mode::Mock,
                client: RwLock::new(None),
            }),
        }
    }

    /// Get the shared client, connecting with retries on first use.
    async fn client(&self) -> Result<firestore::FirestoreDb, AppError> {
        if matches!(self.inner.mode, Mode::Mock) {
            return Err(AppError::Database(
                "Database not connected (offline mode)".to_string(),
            ));
        }

        if let Some(client) = self.inner.client.read().await.as_ref() {
            return Ok(client.clone());
        }

        let mut guard = self.inner.client.write().await;
        // Another task may have connected while we waited for the lock.
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }

        let mut delay = Duration::from_millis(CONNECT_BACKOFF_MS);
        let mut last_err =
            AppError::Database("Failed to connect to Firestore".to_string());

        for attempt in 1..=CONNECT_ATTEMPTS {
            match Self::connect(&self.inner.project_id).await {
                Ok(client) => {
                    *guard = Some(client.clone());
                    return Ok(client);
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        error = %e,
                        "Firestore connection attempt failed"
                    );
                    last_err = e;
                    if attempt < CONNECT_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(last_err)
    }

    async fn connect(project_id: &str) -> Result<firestore::FirestoreDb, AppError> {
        // If the emulator environment variable is set, use unauthenticated
        // connection to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");
        Ok(client)
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(
        project_id: &str,
    ) -> Result<firestore::FirestoreDb, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(client)
    }

    /// Spawn a background task that periodically verifies the connection
    /// and drops it on failure so the next operation reconnects.
    pub fn spawn_health_check(&self, interval: Duration) {
        if matches!(self.inner.mode, Mode::Mock) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;

                let client = inner.client.read().await.clone();
                let Some(client) = client else { continue };

                let probe: Result<Option<User>, _> = client
                    .fluent()
                    .select()
                    .by_id_in(collections::USERS)
                    .obj()
                    .one("__health__")
                    .await;

                if let Err(e) = probe {
                    tracing::warn!(error = %e, "Firestore health check failed, dropping client");
                    *inner.client.write().await = None;
                }
            }
        });
    }

    // ─── User Operations ─────────────────────────────────────────

    /// Get a user by ID.
    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, AppError> {
        self.client()
            .await?
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(user_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create or update a user.
    pub async fn upsert_user(&self, user: &User) -> Result<(), AppError> {
        let _: () = self
            .client()
            .await?
            .fluent()
            .update()
            .in_col(collections::USERS)
            .document_id(&user.id)
            .object(user)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    // ─── Conversation Operations ─────────────────────────────────

    /// Get a conversation by ID.
    pub async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, AppError> {
        self.client()
            .await?
            .fluent()
            .select()
            .by_id_in(collections::CONVERSATIONS)
            .obj()
            .one(conversation_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create or update a conversation document.
    pub async fn upsert_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<(), AppError> {
        let _: () = self
            .client()
            .await?
            .fluent()
            .update()
            .in_col(collections::CONVERSATIONS)
            .document_id(&conversation.id)
            .object(conversation)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Get conversations for a user, most recently updated first.
    pub async fn get_conversations_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<Conversation>, AppError> {
        let user_id = user_id.to_string();
        self.client()
            .await?
            .fluent()
            .select()
            .from(collections::CONVERSATIONS)
            .filter(move |q| q.for_all([q.field("user_id").eq(user_id.clone())]))
            .order_by([(
                "updated_at",
                firestore::FirestoreQueryDirection::Descending,
            )])
            .limit(limit)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find an empty draft conversation for a user (no messages, no
    /// objective), used for idempotent conversation creation.
    pub async fn find_empty_draft(
        &self,
        user_id: &str,
    ) -> Result<Option<Conversation>, AppError> {
        // The message log is an embedded array, so emptiness is checked
        // client-side over the user's most recent conversations.
        let recent = self.get_conversations_for_user(user_id, 10).await?;
        Ok(recent.into_iter().find(Conversation::is_empty_draft))
    }

    /// Look up the conversation holding an outstanding correlation ID.
    ///
    /// Used by the callback path when the workflow reply omits the
    /// conversation ID and the in-memory side-table has expired.
    pub async fn find_conversation_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<Conversation>, AppError> {
        let message_id = message_id.to_string();
        let mut results: Vec<Conversation> = self
            .client()
            .await?
            .fluent()
            .select()
            .from(collections::CONVERSATIONS)
            .filter(move |q| q.for_all([q.field("last_message_id").eq(message_id.clone())]))
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(results.pop())
    }

    // ─── Objective Operations ────────────────────────────────────

    /// Get an objective by ID.
    pub async fn get_objective(
        &self,
        objective_id: &str,
    ) -> Result<Option<Objective>, AppError> {
        self.client()
            .await?
            .fluent()
            .select()
            .by_id_in(collections::OBJECTIVES)
            .obj()
            .one(objective_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create or update an objective document.
    ///
    /// Node state and the progress/XP aggregates live in this single
    /// document, so a step completion is atomic within it.
    pub async fn upsert_objective(&self, objective: &Objective) -> Result<(), AppError> {
        let _: () = self
            .client()
            .await?
            .fluent()
            .update()
            .in_col(collections::OBJECTIVES)
            .document_id(&objective.id)
            .object(objective)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Get objectives for a user, newest first.
    pub async fn get_objectives_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<Objective>, AppError> {
        let user_id = user_id.to_string();
        self.client()
            .await?
            .fluent()
            .select()
            .from(collections::OBJECTIVES)
            .filter(move |q| q.for_all([q.field("user_id").eq(user_id.clone())]))
            .order_by([(
                "created_at",
                firestore::FirestoreQueryDirection::Descending,
            )])
            .limit(limit)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete an objective document.
    pub async fn delete_objective(&self, objective_id: &str) -> Result<(), AppError> {
        self.client()
            .await?
            .fluent()
            .delete()
            .from(collections::OBJECTIVES)
            .document_id(objective_id)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    // ─── Helper Methods ────────────────────────────────────────────

    /// Helper to batch delete documents using transactions.
    async fn batch_delete<T, F>(
        &self,
        items: &[T],
        collection: &str,
        id_extractor: F,
    ) -> Result<(), AppError>
    where
        F: Fn(&T) -> String,
    {
        let client = self.client().await?;

        for chunk in items.chunks(BATCH_SIZE) {
            let mut transaction = client
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

            for item in chunk {
                let doc_id = id_extractor(item);
                client
                    .fluent()
                    .delete()
                    .from(collection)
                    .document_id(&doc_id)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to add deletion to transaction for {}: {}",
                            collection, e
                        ))
                    })?;
            }

            transaction.commit().await.map_err(|e| {
                AppError::Database(format!("Failed to commit batch deletion: {}", e))
            })?;
        }

        Ok(())
    }

    // ─── User Data Deletion (GDPR) ─────────────────────────────────

    /// Delete ALL data for a user (account deletion cascade).
    ///
    /// Deletes from all collections:
    /// - `conversations` (query by user_id)
    /// - `objectives` (query by user_id)
    /// - `users/{user_id}`
    ///
    /// Returns the number of documents deleted.
    pub async fn delete_user_data(&self, user_id: &str) -> Result<usize, AppError> {
        let mut deleted_count = 0;

        // 1. Delete all conversations
        let conversations = self
            .get_conversations_for_user(user_id, u32::MAX)
            .await?;
        let count = conversations.len();
        self.batch_delete(&conversations, collections::CONVERSATIONS, |c: &Conversation| {
            c.id.clone()
        })
        .await?;
        deleted_count += count;
        tracing::debug!(user_id, count, "Deleted conversations");

        // 2. Delete all objectives
        let objectives = self.get_objectives_for_user(user_id, u32::MAX).await?;
        let count = objectives.len();
        self.batch_delete(&objectives, collections::OBJECTIVES, |o: &Objective| {
            o.id.clone()
        })
        .await?;
        deleted_count += count;
        tracing::debug!(user_id, count, "Deleted objectives");

        // 3. Delete user profile
        self.client()
            .await?
            .fluent()
            .delete()
            .from(collections::USERS)
            .document_id(user_id)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        deleted_count += 1;
        tracing::debug!(user_id, "Deleted user profile");

        tracing::info!(user_id, deleted_count, "User data deletion complete");

        Ok(deleted_count)
    }
}
