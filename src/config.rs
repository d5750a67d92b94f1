// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Everything is read once at startup and cached in memory; request
//! handlers only ever see the resulting `Config` value.

use std::env;

/// Per-class request quotas for the rate gate.
///
/// Two fixed windows apply to every identity: a short one-minute window
/// and a 24-hour window. Both must pass for a request to be admitted.
#[derive(Debug, Clone, Copy)]
pub struct QuotaLimits {
    pub per_minute: u32,
    pub per_day: u32,
}

/// Quotas for the three identity classes.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub anon: QuotaLimits,
    pub free: QuotaLimits,
    pub premium: QuotaLimits,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            anon: QuotaLimits {
                per_minute: 3,
                per_day: 10,
            },
            free: QuotaLimits {
                per_minute: 10,
                per_day: 50,
            },
            premium: QuotaLimits {
                per_minute: 60,
                per_day: 1000,
            },
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,
    /// GCP project ID (Firestore document store)
    pub gcp_project_id: String,
    /// Frontend URL for CORS
    pub frontend_url: String,
    /// AI workflow webhook URL (outbound dispatch target)
    pub ai_webhook_url: String,
    /// Public base URL of this API, used to build the callback URL the
    /// AI workflow posts replies to.
    pub callback_base_url: String,
    /// JWT signing key for session tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
    /// HMAC key for anonymous visitor fingerprints
    pub fingerprint_key: Vec<u8>,
    /// Per-class request quotas
    pub rate_limits: RateLimits,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            ai_webhook_url: env::var("AI_WEBHOOK_URL")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("AI_WEBHOOK_URL"))?,
            callback_base_url: env::var("CALLBACK_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
            fingerprint_key: env::var("FINGERPRINT_KEY")
                .map_err(|_| ConfigError::Missing("FINGERPRINT_KEY"))?
                .into_bytes(),
            rate_limits: rate_limits_from_env(),
        })
    }

    /// Default config for tests only.
    pub fn test_default() -> Self {
        Self {
            port: 8080,
            gcp_project_id: "test-project".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            ai_webhook_url: "http://localhost:9999/ai-workflow".to_string(),
            callback_base_url: "http://localhost:8080".to_string(),
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            fingerprint_key: b"test_fingerprint_key".to_vec(),
            rate_limits: RateLimits::default(),
        }
    }
}

/// Read optional per-class quota overrides from the environment.
fn rate_limits_from_env() -> RateLimits {
    let mut limits = RateLimits::default();

    let read = |name: &str, default: u32| -> u32 {
        env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    };

    limits.anon.per_minute = read("RATE_ANON_PER_MINUTE", limits.anon.per_minute);
    limits.anon.per_day = read("RATE_ANON_PER_DAY", limits.anon.per_day);
    limits.free.per_minute = read("RATE_FREE_PER_MINUTE", limits.free.per_minute);
    limits.free.per_day = read("RATE_FREE_PER_DAY", limits.free.per_day);
    limits.premium.per_minute = read("RATE_PREMIUM_PER_MINUTE", limits.premium.per_minute);
    limits.premium.per_day = read("RATE_PREMIUM_PER_DAY", limits.premium.per_day);

    limits
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}
