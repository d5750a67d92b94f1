// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Conversation store: CRUD plus the append-only message log and the
//! pending-AI-reply bookkeeping (`status`, `last_message_id`).

use crate::db::FirestoreDb;
use crate::error::{AppError, Result};
use crate::models::{ChatMessage, Conversation, ConversationStatus, MessageRole};
use crate::time_utils::now_rfc3339;
use serde::Serialize;

/// Last-message preview length in the conversation list.
const PREVIEW_CHARS: usize = 100;
/// Default page size for conversation listings.
pub const DEFAULT_LIST_LIMIT: u32 = 50;

/// One row in the conversation list, enriched with a preview and a
/// lightweight objective lookup.
#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub status: ConversationStatus,
    pub message_count: usize,
    pub last_message_preview: Option<String>,
    pub objective_id: Option<String>,
    pub objective_title: Option<String>,
    pub objective_step_count: Option<usize>,
    pub updated_at: String,
}

/// Conversation CRUD over the document store.
#[derive(Clone)]
pub struct ConversationStore {
    db: FirestoreDb,
}

impl ConversationStore {
    pub fn new(db: FirestoreDb) -> Self {
        Self { db }
    }

    /// Get-or-create an empty draft conversation for a user.
    ///
    /// Calling this twice without sending a message returns the same
    /// conversation, so "new conversation" clicks never pile up drafts.
    pub async fn create_conversation(&self, user_id: &str) -> Result<Conversation> {
        if let Some(draft) = self.db.find_empty_draft(user_id).await? {
            tracing::debug!(
                user_id,
                conversation_id = %draft.id,
                "Reusing empty draft conversation"
            );
            return Ok(draft);
        }

        let now = now_rfc3339();
        let conversation = Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            messages: Vec::new(),
            status: ConversationStatus::New,
            last_message_id: None,
            objective_id: None,
            created_at: now.clone(),
            updated_at: now,
        };

        self.db.upsert_conversation(&conversation).await?;
        tracing::info!(
            user_id,
            conversation_id = %conversation.id,
            "Created conversation"
        );
        Ok(conversation)
    }

    /// Ownership-scoped read. Another user's conversation is reported
    /// as missing rather than forbidden.
    pub async fn get_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<Conversation>> {
        let conversation = self.db.get_conversation(conversation_id).await?;
        Ok(conversation.filter(|c| c.user_id == user_id))
    }

    /// Append a user message and mark the conversation as waiting for
    /// the AI reply. Returns the updated document and the fresh
    /// correlation `message_id`.
    pub async fn append_user_message(
        &self,
        conversation_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<(Conversation, String)> {
        let mut conversation = self
            .get_conversation(conversation_id, user_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Conversation {} not found", conversation_id))
            })?;

        let now = now_rfc3339();
        let message_id = uuid::Uuid::new_v4().to_string();

        conversation.messages.push(ChatMessage {
            role: MessageRole::User,
            content: content.to_string(),
            timestamp: now.clone(),
        });
        conversation.status = ConversationStatus::WaitingForAi;
        conversation.last_message_id = Some(message_id.clone());
        conversation.updated_at = now;

        self.db.upsert_conversation(&conversation).await?;
        Ok((conversation, message_id))
    }

    /// Append an assistant message; a final reply completes the
    /// conversation.
    pub async fn append_assistant_message(
        &self,
        conversation_id: &str,
        content: &str,
        is_final: bool,
    ) -> Result<Conversation> {
        let mut conversation = self
            .db
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Conversation {} not found", conversation_id))
            })?;

        let now = now_rfc3339();
        conversation.messages.push(ChatMessage {
            role: MessageRole::Assistant,
            content: content.to_string(),
            timestamp: now.clone(),
        });
        if is_final {
            conversation.status = ConversationStatus::Completed;
        }
        conversation.updated_at = now;

        self.db.upsert_conversation(&conversation).await?;
        Ok(conversation)
    }

    /// Set the objective back-reference once a skill tree materializes.
    pub async fn link_objective(
        &self,
        conversation_id: &str,
        objective_id: &str,
    ) -> Result<()> {
        let Some(mut conversation) = self.db.get_conversation(conversation_id).await? else {
            tracing::warn!(
                conversation_id,
                objective_id,
                "Cannot link objective: conversation missing"
            );
            return Ok(());
        };

        conversation.objective_id = Some(objective_id.to_string());
        conversation.updated_at = now_rfc3339();
        self.db.upsert_conversation(&conversation).await
    }

    /// List a user's conversations, most recently updated first.
    ///
    /// Objective enrichment is best-effort: a failed lookup logs and
    /// leaves the fields empty rather than failing the whole list.
    pub async fn list_conversations(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<ConversationSummary>> {
        let conversations = self.db.get_conversations_for_user(user_id, limit).await?;

        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let mut objective_title = None;
            let mut objective_step_count = None;

            if let Some(objective_id) = &conversation.objective_id {
                match self.db.get_objective(objective_id).await {
                    Ok(Some(objective)) => {
                        objective_title = Some(objective.title);
                        objective_step_count = Some(objective.skill_tree.nodes.len());
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(
                            conversation_id = %conversation.id,
                            objective_id = %objective_id,
                            error = %e,
                            "Objective lookup failed for conversation list"
                        );
                    }
                }
            }

            summaries.push(ConversationSummary {
                id: conversation.id,
                status: conversation.status,
                message_count: conversation.messages.len(),
                last_message_preview: conversation
                    .messages
                    .last()
                    .map(|m| truncate_preview(&m.content)),
                objective_id: conversation.objective_id,
                objective_title,
                objective_step_count,
                updated_at: conversation.updated_at,
            });
        }

        Ok(summaries)
    }
}

/// Truncate a message to the preview length on a char boundary.
fn truncate_preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        content.to_string()
    } else {
        let truncated: String = content.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", truncated)
    }
}
