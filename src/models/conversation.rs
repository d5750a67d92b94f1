// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Conversation model: an append-only message log plus the bookkeeping
//! for the one outstanding AI reply.

use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    /// RFC3339 timestamp
    pub timestamp: String,
}

/// Conversation lifecycle state.
///
/// `WaitingForAi` means a user message has been dispatched and its reply
/// has not arrived yet; `last_message_id` correlates the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    New,
    WaitingForAi,
    Completed,
}

/// Conversation document stored in Firestore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Document ID (UUID string)
    pub id: String,
    /// Owner: authenticated user ID or `anon-<fingerprint>`
    pub user_id: String,
    /// Append-only message log
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub status: ConversationStatus,
    /// Correlates an outstanding dispatch with its eventual reply
    #[serde(default)]
    pub last_message_id: Option<String>,
    /// Back-reference set once an objective is generated
    #[serde(default)]
    pub objective_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Conversation {
    /// A draft is reusable by `create_conversation`: no messages yet and
    /// no objective attached.
    pub fn is_empty_draft(&self) -> bool {
        self.messages.is_empty() && self.objective_id.is_none()
    }

    /// The most recent assistant message, if any.
    pub fn last_assistant_message(&self) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
    }
}
