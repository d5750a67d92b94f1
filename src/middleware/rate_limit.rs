// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Rate/identity gate for the AI dispatch endpoints.
//!
//! Every request is mapped to a stable identity: the session user ID
//! when authenticated, otherwise a pseudonymous fingerprint derived
//! from request headers. Two fixed windows (one minute, one day) are
//! then enforced per identity with limits picked by class
//! (anon/free/premium). A denied request does not touch the counters.

use crate::config::{QuotaLimits, RateLimits};
use crate::error::AppError;
use crate::middleware::auth::session_user_id;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Type alias for HMAC-SHA256
type HmacSha256 = Hmac<Sha256>;

const MINUTE_WINDOW: Duration = Duration::from_secs(60);
const DAY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
/// Cadence of the idle-counter sweep task.
pub const RATE_GATE_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);
/// Fingerprints only consume a user-agent prefix; full UA strings are
/// long and churn on minor browser updates.
const UA_PREFIX_LEN: usize = 32;
const FINGERPRINT_HEX_LEN: usize = 16;

/// Identity class, tightest quota first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityClass {
    Anon,
    Free,
    Premium,
}

/// Resolved request identity, inserted as a request extension for the
/// downstream handler.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: String,
    pub class: IdentityClass,
}

impl Identity {
    pub fn is_authenticated(&self) -> bool {
        self.class != IdentityClass::Anon
    }
}

struct Window {
    count: u32,
    started_at: Instant,
}

impl Window {
    fn fresh(now: Instant) -> Self {
        Self {
            count: 0,
            started_at: now,
        }
    }

    /// Roll the window over if its span has elapsed.
    fn roll(&mut self, span: Duration, now: Instant) {
        if now.duration_since(self.started_at) >= span {
            *self = Self::fresh(now);
        }
    }

    fn retry_after(&self, span: Duration, now: Instant) -> u64 {
        span.saturating_sub(now.duration_since(self.started_at))
            .as_secs()
            .max(1)
    }
}

struct QuotaState {
    minute: Window,
    day: Window,
}

/// Per-identity request counters over two fixed windows.
pub struct RateGate {
    counters: DashMap<String, QuotaState>,
    limits: RateLimits,
    minute_span: Duration,
    day_span: Duration,
}

impl RateGate {
    pub fn new(limits: RateLimits) -> Self {
        Self::with_windows(limits, MINUTE_WINDOW, DAY_WINDOW)
    }

    /// Window spans are injectable so tests can exercise rollover.
    pub fn with_windows(limits: RateLimits, minute_span: Duration, day_span: Duration) -> Self {
        Self {
            counters: DashMap::new(),
            limits,
            minute_span,
            day_span,
        }
    }

    fn class_limits(&self, class: IdentityClass) -> QuotaLimits {
        match class {
            IdentityClass::Anon => self.limits.anon,
            IdentityClass::Free => self.limits.free,
            IdentityClass::Premium => self.limits.premium,
        }
    }

    /// Check both windows and, when admitted, count the request.
    ///
    /// Denials never increment, so a throttled client retrying does not
    /// push its own window further out.
    pub fn check_quota(&self, id: &str, class: IdentityClass) -> Result<(), AppError> {
        let limits = self.class_limits(class);
        let now = Instant::now();

        let mut entry = self
            .counters
            .entry(id.to_string())
            .or_insert_with(|| QuotaState {
                minute: Window::fresh(now),
                day: Window::fresh(now),
            });

        entry.minute.roll(self.minute_span, now);
        entry.day.roll(self.day_span, now);

        if entry.minute.count >= limits.per_minute {
            return Err(AppError::RateLimited {
                retry_after: entry.minute.retry_after(self.minute_span, now),
                limit: limits.per_minute,
            });
        }
        if entry.day.count >= limits.per_day {
            return Err(AppError::RateLimited {
                retry_after: entry.day.retry_after(self.day_span, now),
                limit: limits.per_day,
            });
        }

        entry.minute.count += 1;
        entry.day.count += 1;
        Ok(())
    }

    /// Drop identities whose daily window has fully elapsed.
    pub fn sweep(&self) -> usize {
        let before = self.counters.len();
        let now = Instant::now();
        let day_span = self.day_span;
        self.counters
            .retain(|_, state| now.duration_since(state.day.started_at) < day_span);
        before - self.counters.len()
    }

    /// Spawn the periodic counter sweep.
    pub fn spawn_sweeper(gate: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let removed = gate.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "Swept idle rate-limit counters");
                }
            }
        });
    }
}

/// Derive a stable pseudonymous token from request attributes.
///
/// Keyed hashing keeps the fingerprint unforgeable without storing any
/// of the attributes themselves.
pub fn derive_fingerprint(key: &[u8], headers: &HeaderMap) -> String {
    let header = |name: &str| -> String {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };

    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .unwrap_or("unknown")
        .trim()
        .to_string();
    let ua_prefix: String = header("user-agent").chars().take(UA_PREFIX_LEN).collect();
    let material = format!(
        "{}|{}|{}|{}",
        ip,
        ua_prefix,
        header("accept-language"),
        header("accept-encoding")
    );

    let digest = match HmacSha256::new_from_slice(key) {
        Ok(mut mac) => {
            mac.update(material.as_bytes());
            mac.finalize().into_bytes().to_vec()
        }
        Err(_) => Sha256::digest(material.as_bytes()).to_vec(),
    };

    hex::encode(digest)[..FINGERPRINT_HEX_LEN].to_string()
}

/// Resolve the request identity: authenticated user (classed by
/// subscription) or anonymous fingerprint.
pub async fn identify(state: &AppState, jar: &CookieJar, headers: &HeaderMap) -> Identity {
    if let Some(user_id) = session_user_id(state, jar, headers) {
        let class = match state.db.get_user(&user_id).await {
            Ok(Some(user)) if user.is_premium() => IdentityClass::Premium,
            Ok(_) => IdentityClass::Free,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Subscription lookup failed, defaulting to free class");
                IdentityClass::Free
            }
        };
        return Identity { id: user_id, class };
    }

    let fingerprint = derive_fingerprint(&state.config.fingerprint_key, headers);
    Identity {
        id: format!("anon-{}", fingerprint),
        class: IdentityClass::Anon,
    }
}

/// Middleware gating the dispatch endpoints: resolve identity, enforce
/// quota, stash the identity for the handler.
pub async fn gate_dispatch(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let identity = identify(&state, &jar, request.headers()).await;

    if let Err(e) = state.rate_gate.check_quota(&identity.id, identity.class) {
        tracing::info!(
            identity = %identity.id,
            class = ?identity.class,
            "Request rejected by rate gate"
        );
        return e.into_response();
    }

    request.extensions_mut().insert(identity);
    next.run(request).await
}
