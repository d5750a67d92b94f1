// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User model and gamification stats.
//!
//! Stats are embedded in the user document and updated on every
//! XP-earning action, so the dashboard needs a single read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Subscription state, written by the billing collaborator into the
/// same user record. Only `plan` is consulted here (rate gate class).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub plan: String,
    pub status: String,
}

impl Default for Subscription {
    fn default() -> Self {
        Self {
            plan: "free".to_string(),
            status: "active".to_string(),
        }
    }
}

/// User profile stored in Firestore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Document ID
    pub id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub subscription: Subscription,
    #[serde(default)]
    pub stats: UserStats,
    /// Client UI preferences, opaque to the backend
    #[serde(default)]
    pub preferences: HashMap<String, serde_json::Value>,
    /// When user registered
    pub created_at: String,
    /// Last activity timestamp
    pub last_active: String,
}

impl User {
    /// `true` when the subscription grants the premium quota class.
    pub fn is_premium(&self) -> bool {
        self.subscription.plan == "premium" && self.subscription.status == "active"
    }
}

/// Gamification aggregates for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStats {
    #[serde(default)]
    pub goals_created: u32,
    #[serde(default)]
    pub goals_completed: u32,
    #[serde(default)]
    pub total_steps: u32,
    #[serde(default)]
    pub completed_steps: u32,
    #[serde(default)]
    pub total_xp: u64,
    /// Consecutive calendar days (UTC) with at least one completed step
    #[serde(default)]
    pub streak_days: u32,
    #[serde(default)]
    pub longest_streak: u32,
    /// Last XP-earning action (RFC3339)
    #[serde(default)]
    pub last_activity: String,
}

impl Default for UserStats {
    fn default() -> Self {
        Self {
            goals_created: 0,
            goals_completed: 0,
            total_steps: 0,
            completed_steps: 0,
            total_xp: 0,
            streak_days: 0,
            longest_streak: 0,
            last_activity: String::new(),
        }
    }
}

impl UserStats {
    /// Record a completed step: XP, counters and the daily streak.
    pub fn record_step_completion(&mut self, xp: u32, now: DateTime<Utc>) {
        self.total_xp += u64::from(xp);
        self.completed_steps += 1;
        self.update_streak(now);
        self.last_activity = now.to_rfc3339();
    }

    /// Record a newly created objective.
    pub fn record_goal_created(&mut self, total_steps: u32, now: DateTime<Utc>) {
        self.goals_created += 1;
        self.total_steps += total_steps;
        self.last_activity = now.to_rfc3339();
    }

    /// Record an objective reaching 100% progress.
    pub fn record_goal_completed(&mut self) {
        self.goals_completed += 1;
    }

    /// Streak rule on UTC calendar days: same day is a no-op,
    /// the day after extends the streak, anything else resets it to 1.
    fn update_streak(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();

        let previous = DateTime::parse_from_rfc3339(&self.last_activity)
            .ok()
            .map(|dt| dt.with_timezone(&Utc).date_naive());

        self.streak_days = match previous {
            Some(last) if last == today => self.streak_days.max(1),
            Some(last) if today.signed_duration_since(last).num_days() == 1 => {
                self.streak_days + 1
            }
            _ => 1,
        };

        self.longest_streak = self.longest_streak.max(self.streak_days);
    }
}
