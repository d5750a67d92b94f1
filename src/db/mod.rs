// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer (Firestore).

pub mod firestore;

pub use firestore::FirestoreDb;

/// Collection names as constants.
///
/// Required indexes (managed in Terraform, documented here):
/// - `conversations(user_id, updated_at desc)`
/// - `conversations(last_message_id)`
/// - `objectives(user_id, created_at desc)`
/// - `users(email, unique)`
pub mod collections {
    pub const USERS: &str = "users";
    pub const CONVERSATIONS: &str = "conversations";
    pub const OBJECTIVES: &str = "objectives";
}
