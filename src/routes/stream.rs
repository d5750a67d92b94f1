// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Reconciliation channel B: raw proxy stream.
//!
//! Used by the "test the AI live" entry point: the request is forwarded
//! to the workflow with `stream: true` and upstream bytes are relayed
//! verbatim as they arrive, terminated by a literal `data: [DONE]`
//! sentinel. An upstream that does not stream falls back to a single
//! buffered frame.

use crate::error::{AppError, Result};
use crate::middleware::rate_limit::Identity;
use crate::AppState;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::header,
    response::Response,
    routing::post,
    Extension, Json, Router,
};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use validator::Validate;

const DONE_SENTINEL: &[u8] = b"data: [DONE]\n\n";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/ai/stream", post(proxy_stream))
}

#[derive(Debug, Deserialize, Validate)]
pub struct StreamRequest {
    #[validate(length(min = 1, max = 4000, message = "message must be 1-4000 characters"))]
    pub message: String,
    #[serde(default, alias = "conversationId")]
    pub conversation_id: Option<String>,
}

fn error_frame(message: &str) -> Bytes {
    Bytes::from(format!(
        "data: {}\n\n",
        json!({ "type": "error", "message": message })
    ))
}

fn event_stream_response(body: Body) -> Result<Response> {
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("response build failed: {}", e)))
}

/// Relay the workflow's streaming output straight to the client.
async fn proxy_stream(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<StreamRequest>,
) -> Result<Response> {
    request
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let body = json!({
        "message": request.message,
        "conversationId": request.conversation_id,
        "userId": identity.id,
        "stream": true,
    });

    let upstream = match state.dispatcher.open_stream(body).await {
        Ok(response) => response,
        Err(e) => {
            // Surfaced inline: the client already holds an event stream.
            tracing::warn!(error = %e, "Proxy stream upstream call failed");
            let frames = futures_util::stream::iter(vec![
                Ok::<Bytes, Infallible>(error_frame("AI workflow unreachable")),
                Ok(Bytes::from_static(DONE_SENTINEL)),
            ]);
            return event_stream_response(Body::from_stream(frames));
        }
    };

    let streaming = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"));

    if streaming {
        let relay = async_stream::stream! {
            let mut chunks = upstream.bytes_stream();
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(bytes) => yield Ok::<Bytes, Infallible>(bytes),
                    Err(e) => {
                        tracing::warn!(error = %e, "Proxy stream interrupted mid-relay");
                        yield Ok(error_frame("stream interrupted"));
                        break;
                    }
                }
            }
            yield Ok(Bytes::from_static(DONE_SENTINEL));
        };
        return event_stream_response(Body::from_stream(relay));
    }

    // Buffered fallback for upstreams without chunked support: one JSON
    // frame followed by the sentinel.
    let buffered = upstream.text().await.unwrap_or_default();
    let frames = futures_util::stream::iter(vec![
        Ok::<Bytes, Infallible>(Bytes::from(format!("data: {}\n\n", buffered))),
        Ok(Bytes::from_static(DONE_SENTINEL)),
    ]);
    event_stream_response(Body::from_stream(frames))
}
