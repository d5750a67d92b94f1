// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore integration tests.
//!
//! These tests require the Firestore emulator to be running
//! (FIRESTORE_EMULATOR_HOST set). The emulator provides a clean state
//! for each test run.

use questline::models::objective::{ObjectiveDraft, SkillNodeDraft, SkillTreeDraft};
use questline::models::{SkillEdge, Subscription, User, UserStats};
use questline::services::{ConversationStore, SkillTreeEngine};
use questline::time_utils::now_rfc3339;
use std::collections::HashMap;

mod common;
use common::test_db;

/// Generate a unique user ID for test isolation.
fn unique_user_id() -> String {
    format!("user-{}", uuid::Uuid::new_v4())
}

fn test_user(user_id: &str) -> User {
    User {
        id: user_id.to_string(),
        email: Some("test@example.com".to_string()),
        name: "Test User".to_string(),
        subscription: Subscription::default(),
        stats: UserStats::default(),
        preferences: HashMap::new(),
        created_at: now_rfc3339(),
        last_active: now_rfc3339(),
    }
}

/// Draft with the canonical dependency shape: A (root), B needs A,
/// C needs both A and B.
fn diamond_draft() -> ObjectiveDraft {
    ObjectiveDraft {
        title: "Lose 10kg".to_string(),
        description: "Sustainable weight loss".to_string(),
        category: "fitness".to_string(),
        difficulty: "medium".to_string(),
        skill_tree: SkillTreeDraft {
            nodes: vec![
                SkillNodeDraft {
                    id: "a".to_string(),
                    title: "Walk daily".to_string(),
                    xp_reward: 50,
                    dependencies: vec![],
                },
                SkillNodeDraft {
                    id: "b".to_string(),
                    title: "Join a gym".to_string(),
                    xp_reward: 100,
                    dependencies: vec!["a".to_string()],
                },
                SkillNodeDraft {
                    id: "c".to_string(),
                    title: "Run a 5k".to_string(),
                    xp_reward: 200,
                    dependencies: vec!["a".to_string(), "b".to_string()],
                },
            ],
            edges: vec![
                SkillEdge {
                    from: "a".to_string(),
                    to: "b".to_string(),
                },
                SkillEdge {
                    from: "b".to_string(),
                    to: "c".to_string(),
                },
            ],
        },
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CONVERSATION STORE
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn conversation_draft_creation_is_idempotent() {
    require_emulator!();

    let store = ConversationStore::new(test_db());
    let user_id = unique_user_id();

    let first = store.create_conversation(&user_id).await.unwrap();
    let second = store.create_conversation(&user_id).await.unwrap();

    assert_eq!(
        first.id, second.id,
        "empty draft must be reused, not duplicated"
    );
}

#[tokio::test]
async fn append_user_message_marks_waiting_and_correlates() {
    require_emulator!();

    let store = ConversationStore::new(test_db());
    let user_id = unique_user_id();

    let conversation = store.create_conversation(&user_id).await.unwrap();
    let (updated, message_id) = store
        .append_user_message(&conversation.id, &user_id, "Lose 10kg")
        .await
        .unwrap();

    assert_eq!(updated.messages.len(), 1);
    assert_eq!(
        updated.status,
        questline::models::ConversationStatus::WaitingForAi
    );
    assert_eq!(updated.last_message_id.as_deref(), Some(message_id.as_str()));

    // A new draft request now creates a different conversation.
    let next = store.create_conversation(&user_id).await.unwrap();
    assert_ne!(next.id, conversation.id);
}

#[tokio::test]
async fn foreign_conversation_reads_as_missing() {
    require_emulator!();

    let store = ConversationStore::new(test_db());
    let owner = unique_user_id();

    let conversation = store.create_conversation(&owner).await.unwrap();

    let other = store
        .get_conversation(&conversation.id, "someone-else")
        .await
        .unwrap();
    assert!(other.is_none());

    let err = store
        .append_user_message(&conversation.id, "someone-else", "hi")
        .await
        .unwrap_err();
    assert!(matches!(err, questline::error::AppError::NotFound(_)));
}

// ═══════════════════════════════════════════════════════════════════════════
// SKILL TREE ENGINE
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn materialized_objective_unlocks_roots_only() {
    require_emulator!();

    let db = test_db();
    let engine = SkillTreeEngine::new(db.clone());
    let user_id = unique_user_id();
    db.upsert_user(&test_user(&user_id)).await.unwrap();

    let objective = engine
        .materialize_objective(&user_id, "conv-1", diamond_draft())
        .await
        .unwrap();

    assert_eq!(objective.progress, 0);
    assert!(objective.skill_tree.node("a").unwrap().unlocked);
    assert!(!objective.skill_tree.node("b").unwrap().unlocked);
    assert!(!objective.skill_tree.node("c").unwrap().unlocked);

    let user = db.get_user(&user_id).await.unwrap().unwrap();
    assert_eq!(user.stats.goals_created, 1);
    assert_eq!(user.stats.total_steps, 3);
}

#[tokio::test]
async fn step_completion_cascades_and_aggregates() {
    require_emulator!();

    let db = test_db();
    let engine = SkillTreeEngine::new(db.clone());
    let user_id = unique_user_id();
    db.upsert_user(&test_user(&user_id)).await.unwrap();

    let objective = engine
        .materialize_objective(&user_id, "conv-1", diamond_draft())
        .await
        .unwrap();

    // Complete A: unlocks B (sole dependency), not C (two deps).
    let outcome = engine
        .complete_step(&objective.id, "a", &user_id)
        .await
        .unwrap();
    assert_eq!(outcome.progress, 33);
    assert_eq!(outcome.total_xp, 50);
    assert_eq!(outcome.newly_unlocked, vec!["b".to_string()]);

    // Complete B: C stays locked under the singleton-dependency policy.
    let outcome = engine
        .complete_step(&objective.id, "b", &user_id)
        .await
        .unwrap();
    assert_eq!(outcome.progress, 67);
    assert_eq!(outcome.total_xp, 150);
    assert!(outcome.newly_unlocked.is_empty());

    let stored = db.get_objective(&objective.id).await.unwrap().unwrap();
    assert!(!stored.skill_tree.node("c").unwrap().unlocked);
    assert_eq!(stored.completed_steps, 2);

    // User stats followed along.
    let user = db.get_user(&user_id).await.unwrap().unwrap();
    assert_eq!(user.stats.total_xp, 150);
    assert_eq!(user.stats.completed_steps, 2);
    assert!(user.stats.streak_days >= 1);
}

#[tokio::test]
async fn recompleting_a_step_does_not_recredit() {
    require_emulator!();

    let db = test_db();
    let engine = SkillTreeEngine::new(db.clone());
    let user_id = unique_user_id();
    db.upsert_user(&test_user(&user_id)).await.unwrap();

    let objective = engine
        .materialize_objective(&user_id, "conv-1", diamond_draft())
        .await
        .unwrap();

    engine
        .complete_step(&objective.id, "a", &user_id)
        .await
        .unwrap();
    let repeat = engine
        .complete_step(&objective.id, "a", &user_id)
        .await
        .unwrap();

    assert_eq!(repeat.xp_awarded, 0);
    assert_eq!(repeat.total_xp, 50);

    let user = db.get_user(&user_id).await.unwrap().unwrap();
    assert_eq!(user.stats.total_xp, 50, "no double-crediting");
    assert_eq!(user.stats.completed_steps, 1);
}

#[tokio::test]
async fn completion_checks_ownership_and_step_existence() {
    require_emulator!();

    let db = test_db();
    let engine = SkillTreeEngine::new(db.clone());
    let user_id = unique_user_id();
    db.upsert_user(&test_user(&user_id)).await.unwrap();

    let objective = engine
        .materialize_objective(&user_id, "conv-1", diamond_draft())
        .await
        .unwrap();

    let err = engine
        .complete_step(&objective.id, "zz", &user_id)
        .await
        .unwrap_err();
    assert!(matches!(err, questline::error::AppError::NotFound(_)));

    let err = engine
        .complete_step(&objective.id, "a", "someone-else")
        .await
        .unwrap_err();
    assert!(matches!(err, questline::error::AppError::NotFound(_)));

    // Neither failure mutated the document.
    let stored = db.get_objective(&objective.id).await.unwrap().unwrap();
    assert_eq!(stored.completed_steps, 0);
    assert!(!stored.skill_tree.node("a").unwrap().completed);
}

// ═══════════════════════════════════════════════════════════════════════════
// ACCOUNT DELETION CASCADE
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn account_deletion_cascades_over_all_collections() {
    require_emulator!();

    let db = test_db();
    let store = ConversationStore::new(db.clone());
    let engine = SkillTreeEngine::new(db.clone());
    let user_id = unique_user_id();
    db.upsert_user(&test_user(&user_id)).await.unwrap();

    let conversation = store.create_conversation(&user_id).await.unwrap();
    store
        .append_user_message(&conversation.id, &user_id, "Lose 10kg")
        .await
        .unwrap();
    let objective = engine
        .materialize_objective(&user_id, &conversation.id, diamond_draft())
        .await
        .unwrap();

    let deleted = db.delete_user_data(&user_id).await.unwrap();
    assert!(deleted >= 3, "conversation + objective + user document");

    assert!(db.get_user(&user_id).await.unwrap().is_none());
    assert!(db
        .get_conversation(&conversation.id)
        .await
        .unwrap()
        .is_none());
    assert!(db.get_objective(&objective.id).await.unwrap().is_none());
}
