// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod conversation;
pub mod dispatch;
pub mod registry;
pub mod skill_tree;

pub use conversation::{ConversationStore, ConversationSummary};
pub use dispatch::{AiDispatcher, WebhookPayload};
pub use registry::{CorrelationTable, DeliveryNotice, PendingRequest, SseRegistry, WsRelay};
pub use skill_tree::{SkillTreeEngine, StepCompletion};
