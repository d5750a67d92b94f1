// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Request middleware: authentication, rate gating, security headers.

pub mod auth;
pub mod rate_limit;
pub mod security;
