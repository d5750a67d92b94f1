// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Outbound dispatch to the AI workflow webhook.
//!
//! The dispatch is fire-and-forget: the HTTP call runs in a spawned
//! task and its failure is logged, never surfaced, because the client
//! has already been told "processing". The reply arrives later through
//! the inbound callback endpoint, or not at all; clients apply their
//! own timeout.

use crate::config::Config;
use crate::models::{Conversation, MessageRole, User};
use crate::services::registry::CorrelationTable;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// How much recent history travels with a dispatch.
const CONTEXT_MESSAGES: usize = 10;
/// Outbound call timeout. Generous: the workflow acknowledges quickly
/// and does the heavy reasoning after.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Webhook payload, camelCase on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub message_id: String,
    pub user_id: String,
    pub message: String,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objective_type: Option<String>,
    pub message_count: usize,
    pub callback_url: String,
    pub context: WebhookContext,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookContext {
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub previous_messages: Vec<ContextMessage>,
    pub is_first_message: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextMessage {
    pub role: String,
    pub content: String,
}

/// Fire-and-forget webhook dispatcher.
#[derive(Clone)]
pub struct AiDispatcher {
    http: reqwest::Client,
    webhook_url: String,
    callback_url: String,
}

impl AiDispatcher {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            webhook_url: config.ai_webhook_url.clone(),
            callback_url: format!("{}/api/ai/webhook", config.callback_base_url),
        }
    }

    /// Build the payload for a just-appended user message.
    ///
    /// The message itself is already in the conversation log, so the
    /// context window excludes it.
    pub fn build_payload(
        &self,
        conversation: &Conversation,
        user: Option<&User>,
        message_id: &str,
        content: &str,
        objective_type: Option<String>,
    ) -> WebhookPayload {
        let history = &conversation.messages[..conversation.messages.len().saturating_sub(1)];
        let previous_messages: Vec<ContextMessage> = history
            .iter()
            .rev()
            .take(CONTEXT_MESSAGES)
            .rev()
            .map(|m| ContextMessage {
                role: match m.role {
                    MessageRole::User => "user".to_string(),
                    MessageRole::Assistant => "assistant".to_string(),
                    MessageRole::System => "system".to_string(),
                },
                content: m.content.clone(),
            })
            .collect();

        WebhookPayload {
            message_id: message_id.to_string(),
            user_id: conversation.user_id.clone(),
            message: content.to_string(),
            conversation_id: conversation.id.clone(),
            objective_type,
            message_count: conversation.messages.len(),
            callback_url: self.callback_url.clone(),
            context: WebhookContext {
                user_name: user.map(|u| u.name.clone()),
                user_email: user.and_then(|u| u.email.clone()),
                is_first_message: previous_messages.is_empty(),
                previous_messages,
            },
        }
    }

    /// Register the correlation entry and fire the webhook call without
    /// awaiting its outcome.
    pub fn dispatch(&self, correlations: &Arc<CorrelationTable>, payload: WebhookPayload) {
        correlations.insert(
            &payload.message_id,
            &payload.conversation_id,
            &payload.user_id,
        );

        let http = self.http.clone();
        let url = self.webhook_url.clone();
        let message_id = payload.message_id.clone();
        let conversation_id = payload.conversation_id.clone();

        tokio::spawn(async move {
            let result = http
                .post(&url)
                .timeout(DISPATCH_TIMEOUT)
                .json(&payload)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(
                        message_id = %message_id,
                        conversation_id = %conversation_id,
                        "AI workflow dispatch accepted"
                    );
                }
                Ok(response) => {
                    tracing::warn!(
                        message_id = %message_id,
                        conversation_id = %conversation_id,
                        status = %response.status(),
                        "AI workflow dispatch rejected"
                    );
                }
                Err(e) => {
                    // Non-fatal: the reply arrives whenever the workflow
                    // eventually calls back, or never.
                    tracing::warn!(
                        message_id = %message_id,
                        conversation_id = %conversation_id,
                        error = %e,
                        "AI workflow dispatch failed"
                    );
                }
            }
        });
    }

    /// Open a streaming request to the workflow for the raw proxy
    /// channel. Unlike `dispatch`, the caller owns the response and
    /// relays its bytes.
    pub async fn open_stream(
        &self,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, reqwest::Error> {
        self.http.post(&self.webhook_url).json(&body).send().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMessage, ConversationStatus};

    fn conversation(message_count: usize) -> Conversation {
        let messages = (0..message_count)
            .map(|i| ChatMessage {
                role: if i % 2 == 0 {
                    MessageRole::User
                } else {
                    MessageRole::Assistant
                },
                content: format!("message {}", i),
                timestamp: "2026-01-01T00:00:00Z".to_string(),
            })
            .collect();

        Conversation {
            id: "c1".to_string(),
            user_id: "u1".to_string(),
            messages,
            status: ConversationStatus::WaitingForAi,
            last_message_id: Some("m1".to_string()),
            objective_id: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn dispatcher() -> AiDispatcher {
        AiDispatcher::new(&Config::test_default())
    }

    #[test]
    fn payload_serializes_camel_case() {
        let conv = conversation(1);
        let payload = dispatcher().build_payload(&conv, None, "m1", "Lose 10kg", None);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["messageId"], "m1");
        assert_eq!(json["conversationId"], "c1");
        assert_eq!(json["messageCount"], 1);
        assert!(json["callbackUrl"]
            .as_str()
            .unwrap()
            .ends_with("/api/ai/webhook"));
        assert_eq!(json["context"]["isFirstMessage"], true);
        assert!(json.get("objectiveType").is_none());
    }

    #[test]
    fn context_excludes_current_message_and_caps_history() {
        let conv = conversation(15);
        let payload = dispatcher().build_payload(&conv, None, "m1", "latest", None);

        assert_eq!(payload.context.previous_messages.len(), CONTEXT_MESSAGES);
        assert!(!payload.context.is_first_message);
        // Most recent history retained, oldest dropped.
        assert_eq!(
            payload.context.previous_messages.last().unwrap().content,
            "message 13"
        );
    }

    #[test]
    fn first_message_flag_set_for_fresh_conversation() {
        let conv = conversation(1);
        let payload = dispatcher().build_payload(&conv, None, "m1", "hello", None);

        assert!(payload.context.previous_messages.is_empty());
        assert!(payload.context.is_first_message);
    }
}
