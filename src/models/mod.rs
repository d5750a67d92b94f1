// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod conversation;
pub mod objective;
pub mod user;

pub use conversation::{ChatMessage, Conversation, ConversationStatus, MessageRole};
pub use objective::{Objective, ObjectiveDraft, SkillEdge, SkillNode, SkillTree};
pub use user::{Subscription, User, UserStats};
