// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Questline: gamified goal tracking with AI-generated skill trees.
//!
//! This crate provides the backend API core: conversation storage, the
//! skill-tree dependency engine, the rate/identity gate and the async
//! pipeline that reconciles out-of-process AI replies back to waiting
//! clients.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::FirestoreDb;
use services::{
    AiDispatcher, ConversationStore, CorrelationTable, SkillTreeEngine, SseRegistry, WsRelay,
};
use std::sync::Arc;

use middleware::rate_limit::RateGate;

/// Shared application state.
///
/// The delivery registries are process-wide mutable state with an
/// explicit lifecycle: built once at startup, injected here, swept by
/// background tasks.
pub struct AppState {
    pub config: Config,
    pub db: FirestoreDb,
    pub conversations: ConversationStore,
    pub skill_trees: SkillTreeEngine,
    pub dispatcher: AiDispatcher,
    pub correlations: Arc<CorrelationTable>,
    pub sse_registry: Arc<SseRegistry>,
    pub ws_relay: Arc<WsRelay>,
    pub rate_gate: Arc<RateGate>,
}

impl AppState {
    /// Assemble state from a config and database handle.
    pub fn new(config: Config, db: FirestoreDb) -> Self {
        let dispatcher = AiDispatcher::new(&config);
        let rate_gate = Arc::new(RateGate::new(config.rate_limits));

        Self {
            conversations: ConversationStore::new(db.clone()),
            skill_trees: SkillTreeEngine::new(db.clone()),
            dispatcher,
            correlations: Arc::new(CorrelationTable::new()),
            sse_registry: Arc::new(SseRegistry::new()),
            ws_relay: Arc::new(WsRelay::new()),
            rate_gate,
            config,
            db,
        }
    }

    /// Start the background sweep tasks for the injected registries.
    pub fn spawn_maintenance(&self) {
        CorrelationTable::spawn_sweeper(
            self.correlations.clone(),
            services::registry::CORRELATION_SWEEP_INTERVAL,
        );
        RateGate::spawn_sweeper(
            self.rate_gate.clone(),
            middleware::rate_limit::RATE_GATE_SWEEP_INTERVAL,
        );
    }
}
