// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Rate/identity gate behavior on the dispatch endpoints.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use tower::ServiceExt;

mod common;

fn chat_request(user_agent: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/ai/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, user_agent)
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::from(
            serde_json::json!({ "message": "Lose 10kg" }).to_string(),
        ))
        .unwrap()
}

#[tokio::test]
async fn fourth_anonymous_request_within_minute_is_throttled() {
    let (app, _state) = common::create_test_app();

    // Default anon quota is 3/minute. The first three are admitted
    // (and then fail on the offline mock database, which is fine here).
    for i in 0..3 {
        let response = app.clone().oneshot(chat_request("test-agent")).await.unwrap();
        assert_ne!(
            response.status(),
            StatusCode::TOO_MANY_REQUESTS,
            "request {} should be admitted",
            i + 1
        );
    }

    let response = app.clone().oneshot(chat_request("test-agent")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .expect("429 must carry Retry-After");
    assert!(retry_after > 0);
    assert_eq!(response.headers().get("X-RateLimit-Limit").unwrap(), "3");
    assert_eq!(
        response.headers().get("X-RateLimit-Remaining").unwrap(),
        "0"
    );
}

#[tokio::test]
async fn distinct_fingerprints_have_independent_quotas() {
    let (app, _state) = common::create_test_app();

    for _ in 0..3 {
        app.clone().oneshot(chat_request("agent-one")).await.unwrap();
    }
    let throttled = app.clone().oneshot(chat_request("agent-one")).await.unwrap();
    assert_eq!(throttled.status(), StatusCode::TOO_MANY_REQUESTS);

    // A different user-agent derives a different fingerprint.
    let other = app.clone().oneshot(chat_request("agent-two")).await.unwrap();
    assert_ne!(other.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn stream_endpoint_shares_the_gate() {
    let (app, _state) = common::create_test_app();

    for _ in 0..3 {
        app.clone().oneshot(chat_request("shared-agent")).await.unwrap();
    }

    // The raw-stream entry point counts against the same identity.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/ai/stream")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::USER_AGENT, "shared-agent")
                .header("x-forwarded-for", "203.0.113.7")
                .body(Body::from(
                    serde_json::json!({ "message": "hello" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}
