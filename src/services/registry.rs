// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Process-wide delivery registries.
//!
//! Three pieces of shared mutable state back the async delivery
//! pipeline, all created at startup and injected through `AppState`:
//!
//! - `CorrelationTable`: message_id -> conversation/user context, so a
//!   callback that omits fields can still be routed. Entries expire
//!   after a fixed TTL and are garbage-collected by a sweep task.
//! - `SseRegistry`: (conversation_id, message_id) -> open SSE stream
//!   handle, letting the callback wake a poll loop immediately.
//! - `WsRelay`: conversation_id -> connected sockets, for the
//!   broadcast-style delivery channel.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// How long an outstanding-request correlation entry stays resolvable.
pub const CORRELATION_TTL: Duration = Duration::from_secs(300);
/// Sweep cadence for expired correlation entries.
pub const CORRELATION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Context held while an AI reply is outstanding.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub conversation_id: String,
    pub user_id: String,
    pub created_at: Instant,
}

/// Ephemeral side-table resolving a reply's `message_id` back to the
/// conversation and user that originated the request.
pub struct CorrelationTable {
    entries: DashMap<String, PendingRequest>,
    ttl: Duration,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::with_ttl(CORRELATION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Register an outstanding request. Re-dispatching on the same
    /// message ID overwrites (last writer wins).
    pub fn insert(&self, message_id: &str, conversation_id: &str, user_id: &str) {
        self.entries.insert(
            message_id.to_string(),
            PendingRequest {
                conversation_id: conversation_id.to_string(),
                user_id: user_id.to_string(),
                created_at: Instant::now(),
            },
        );
    }

    /// Resolve and consume the entry for a reply, if still fresh.
    pub fn take(&self, message_id: &str) -> Option<PendingRequest> {
        let (_, pending) = self.entries.remove(message_id)?;
        if pending.created_at.elapsed() > self.ttl {
            return None;
        }
        Some(pending)
    }

    /// Drop all expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, pending| pending.created_at.elapsed() <= ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawn the periodic garbage-collection task.
    pub fn spawn_sweeper(table: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let removed = table.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired correlation entries");
                }
            }
        });
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload pushed to a waiting delivery channel when a reply lands.
#[derive(Debug, Clone)]
pub struct DeliveryNotice {
    pub content: String,
    pub is_final: bool,
}

/// Open SSE stream handles keyed by `conversation_id:message_id`.
///
/// Registration returns the receiving half; the stream must call
/// `unregister` when the client goes away (wired via a drop guard in
/// the route handler).
pub struct SseRegistry {
    streams: DashMap<String, mpsc::UnboundedSender<DeliveryNotice>>,
}

fn stream_key(conversation_id: &str, message_id: &str) -> String {
    format!("{}:{}", conversation_id, message_id)
}

impl SseRegistry {
    pub fn new() -> Self {
        Self {
            streams: DashMap::new(),
        }
    }

    pub fn register(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> mpsc::UnboundedReceiver<DeliveryNotice> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams
            .insert(stream_key(conversation_id, message_id), tx);
        tracing::debug!(conversation_id, message_id, "SSE stream registered");
        rx
    }

    pub fn unregister(&self, conversation_id: &str, message_id: &str) {
        self.streams.remove(&stream_key(conversation_id, message_id));
        tracing::debug!(conversation_id, message_id, "SSE stream unregistered");
    }

    /// Push a notice to the waiting stream, if one is connected.
    /// Returns `true` when a listener received it.
    pub fn notify(
        &self,
        conversation_id: &str,
        message_id: &str,
        notice: DeliveryNotice,
    ) -> bool {
        match self.streams.get(&stream_key(conversation_id, message_id)) {
            Some(tx) => tx.send(notice).is_ok(),
            None => false,
        }
    }

    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }
}

impl Default for SseRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// WebSocket relay: sockets grouped by conversation ID.
///
/// Frames are pre-serialized JSON strings; the route layer owns the
/// socket types so this registry stays transport-agnostic.
pub struct WsRelay {
    groups: DashMap<String, HashMap<u64, mpsc::UnboundedSender<String>>>,
    next_conn_id: AtomicU64,
}

impl WsRelay {
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Add a socket to a conversation group.
    pub fn join(&self, conversation_id: &str) -> (u64, mpsc::UnboundedReceiver<String>) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.groups
            .entry(conversation_id.to_string())
            .or_default()
            .insert(conn_id, tx);
        tracing::debug!(conversation_id, conn_id, "WebSocket joined group");
        (conn_id, rx)
    }

    /// Remove a socket from its group, dropping the group when empty.
    pub fn leave(&self, conversation_id: &str, conn_id: u64) {
        if let Some(mut group) = self.groups.get_mut(conversation_id) {
            group.remove(&conn_id);
            if group.is_empty() {
                drop(group);
                self.groups
                    .remove_if(conversation_id, |_, members| members.is_empty());
            }
        }
        tracing::debug!(conversation_id, conn_id, "WebSocket left group");
    }

    /// Broadcast a frame to every socket in the group.
    /// Returns the number of sockets the frame was handed to.
    pub fn broadcast(&self, conversation_id: &str, frame: &str) -> usize {
        let Some(group) = self.groups.get(conversation_id) else {
            return 0;
        };

        let mut delivered = 0;
        for (conn_id, tx) in group.iter() {
            if tx.send(frame.to_string()).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(conversation_id, conn_id, "Dropping closed WebSocket sender");
            }
        }
        delivered
    }

    /// (group count, total connection count) for the status endpoint.
    pub fn status(&self) -> (usize, usize) {
        let groups = self.groups.len();
        let connections = self.groups.iter().map(|g| g.len()).sum();
        (groups, connections)
    }
}

impl Default for WsRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_take_consumes_entry() {
        let table = CorrelationTable::new();
        table.insert("m1", "c1", "u1");

        let pending = table.take("m1").expect("entry should resolve");
        assert_eq!(pending.conversation_id, "c1");
        assert_eq!(pending.user_id, "u1");

        assert!(table.take("m1").is_none(), "second take must miss");
    }

    #[test]
    fn correlation_expired_entry_is_not_resolved() {
        let table = CorrelationTable::with_ttl(Duration::from_millis(0));
        table.insert("m1", "c1", "u1");

        std::thread::sleep(Duration::from_millis(5));
        assert!(table.take("m1").is_none());
    }

    #[test]
    fn correlation_sweep_removes_only_expired() {
        let table = CorrelationTable::with_ttl(Duration::from_secs(60));
        table.insert("fresh", "c1", "u1");
        assert_eq!(table.sweep(), 0);
        assert_eq!(table.len(), 1);

        let expired = CorrelationTable::with_ttl(Duration::from_millis(0));
        expired.insert("old", "c1", "u1");
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(expired.sweep(), 1);
        assert!(expired.is_empty());
    }

    #[test]
    fn correlation_last_writer_wins() {
        let table = CorrelationTable::new();
        table.insert("m1", "c1", "u1");
        table.insert("m1", "c2", "u2");

        let pending = table.take("m1").unwrap();
        assert_eq!(pending.conversation_id, "c2");
    }

    #[tokio::test]
    async fn sse_notify_reaches_registered_stream() {
        let registry = SseRegistry::new();
        let mut rx = registry.register("c1", "m1");

        assert!(registry.notify(
            "c1",
            "m1",
            DeliveryNotice {
                content: "done".to_string(),
                is_final: true,
            }
        ));

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.content, "done");
        assert!(notice.is_final);
    }

    #[tokio::test]
    async fn sse_notify_without_listener_reports_false() {
        let registry = SseRegistry::new();
        assert!(!registry.notify(
            "c1",
            "m1",
            DeliveryNotice {
                content: "done".to_string(),
                is_final: true,
            }
        ));
    }

    #[tokio::test]
    async fn ws_relay_broadcasts_to_group_members_only() {
        let relay = WsRelay::new();
        let (_id_a, mut rx_a) = relay.join("c1");
        let (_id_b, mut rx_b) = relay.join("c1");
        let (_id_c, mut rx_c) = relay.join("other");

        assert_eq!(relay.broadcast("c1", "{\"type\":\"message\"}"), 2);
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
        assert!(rx_c.try_recv().is_err());

        assert_eq!(relay.broadcast("unknown", "{}"), 0);
    }

    #[test]
    fn ws_relay_leave_drops_empty_groups() {
        let relay = WsRelay::new();
        let (conn_id, _rx) = relay.join("c1");
        assert_eq!(relay.status(), (1, 1));

        relay.leave("c1", conn_id);
        assert_eq!(relay.status(), (0, 0));
    }
}
