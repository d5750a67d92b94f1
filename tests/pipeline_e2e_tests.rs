// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! End-to-end async delivery pipeline tests (emulator-backed).
//!
//! The outbound webhook target does not exist in the test environment;
//! dispatch failures are logged and swallowed by design, so the flow is
//! driven by posting the callback directly, the way the workflow would.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use tower::ServiceExt;

mod common;

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_post(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, "e2e-test-agent")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn chat_dispatch_then_callback_completes_conversation() {
    require_emulator!();

    let (app, state) = common::create_emulator_app();

    // 1. User sends a message; the API acknowledges immediately.
    let response = app
        .clone()
        .oneshot(json_post(
            "/api/ai/chat",
            serde_json::json!({ "message": "Lose 10kg" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let ack = body_json(response).await;
    assert_eq!(ack["status"], "processing");
    let conversation_id = ack["conversation_id"].as_str().unwrap().to_string();
    let message_id = ack["message_id"].as_str().unwrap().to_string();

    let stored = state
        .db
        .get_conversation(&conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stored.status,
        questline::models::ConversationStatus::WaitingForAi
    );
    assert!(!state.correlations.is_empty(), "dispatch registered correlation");

    // 2. The workflow posts its reply with an attached skill tree.
    let response = app
        .clone()
        .oneshot(json_post(
            "/api/ai/webhook",
            serde_json::json!({
                "messageId": message_id,
                "conversationId": conversation_id,
                "content": "Here is your plan",
                "isFinal": true,
                "objective": {
                    "title": "Lose 10kg",
                    "category": "fitness",
                    "skillTree": {
                        "nodes": [
                            { "id": "a", "title": "Walk daily", "xpReward": 50, "dependencies": [] },
                            { "id": "b", "title": "Join a gym", "xpReward": 100, "dependencies": ["a"] }
                        ],
                        "edges": [{ "from": "a", "to": "b" }]
                    }
                }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let callback_ack = body_json(response).await;
    assert_eq!(callback_ack["received"], true);
    let objective_id = callback_ack["objective_id"].as_str().unwrap().to_string();

    // 3. The conversation is completed and back-linked.
    let stored = state
        .db
        .get_conversation(&conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stored.status,
        questline::models::ConversationStatus::Completed
    );
    assert_eq!(
        stored.messages.last().unwrap().content,
        "Here is your plan"
    );
    assert_eq!(stored.objective_id.as_deref(), Some(objective_id.as_str()));

    // 4. The objective materialized with roots unlocked.
    let objective = state.db.get_objective(&objective_id).await.unwrap().unwrap();
    assert_eq!(objective.progress, 0);
    assert!(objective.skill_tree.node("a").unwrap().unlocked);
    assert!(!objective.skill_tree.node("b").unwrap().unlocked);
}

#[tokio::test]
async fn callback_resolves_conversation_through_correlation_table() {
    require_emulator!();

    let (app, state) = common::create_emulator_app();

    let response = app
        .clone()
        .oneshot(json_post(
            "/api/ai/chat",
            serde_json::json!({ "message": "Learn Rust" }),
        ))
        .await
        .unwrap();
    let ack = body_json(response).await;
    let conversation_id = ack["conversation_id"].as_str().unwrap().to_string();
    let message_id = ack["message_id"].as_str().unwrap().to_string();

    // Callback omits conversationId entirely; the side-table routes it.
    let response = app
        .clone()
        .oneshot(json_post(
            "/api/ai/webhook",
            serde_json::json!({
                "messageId": message_id,
                "content": "Start with ownership",
                "isFinal": true
            }),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["received"], true);

    let stored = state
        .db
        .get_conversation(&conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stored.status,
        questline::models::ConversationStatus::Completed
    );
    assert!(state.correlations.is_empty(), "entry consumed by callback");
}
