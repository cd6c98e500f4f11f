//! Shared client registry and fan-out.
//!
//! [`ClientManager`] tracks every connected WebSocket client. Downstream
//! clients are receive-only and all of them see every forwarded message, so
//! there is no subscription bookkeeping: a broadcast serializes the envelope
//! once and pushes the frame onto each client's send channel. Sends are
//! fire-and-forget — a full or closed channel skips that client and never
//! blocks or fails the broadcast for the others.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::protocol::Envelope;

// ════════════════════════════════════════════════════════════════════
// Per-client state
// ════════════════════════════════════════════════════════════════════

/// Opaque identifier for a connected WebSocket client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub(crate) u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

struct ClientState {
    /// Channel drained by the client's send loop.
    sender: mpsc::Sender<Message>,
}

// ════════════════════════════════════════════════════════════════════
// ClientManager
// ════════════════════════════════════════════════════════════════════

/// Registry of live downstream connections.
///
/// Cloning is cheap — all instances share the same underlying map.
#[derive(Clone)]
pub struct ClientManager {
    /// `DashMap` instead of `RwLock<HashMap>` so connect/disconnect never
    /// contends with an in-flight broadcast.
    clients: Arc<DashMap<u64, ClientState>>,
    next_id: Arc<AtomicU64>,
}

impl ClientManager {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a new client and return its id together with the receiver
    /// the session's send loop drains.
    pub fn register(&self, channel_capacity: usize) -> (ClientId, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(channel_capacity);
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.clients.insert(id.0, ClientState { sender: tx });
        (id, rx)
    }

    /// Remove a client from the registry. Idempotent — unregistering an
    /// already-removed client is a no-op.
    pub fn unregister(&self, id: ClientId) {
        self.clients.remove(&id.0);
    }

    /// Number of currently connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    // ────────────────────────────────────────────────────────────────
    // Fan-out
    // ────────────────────────────────────────────────────────────────

    /// Deliver `envelope` to every live client.
    ///
    /// The envelope is serialized once. Each delivery is independent: a
    /// client whose channel is closed or full is skipped, and the frame
    /// still reaches everyone else.
    pub fn broadcast(&self, envelope: &Envelope) {
        let text = match serde_json::to_string(envelope) {
            Ok(t) => t,
            Err(e) => {
                tracing::error!("failed to serialize envelope for '{}': {}", envelope.topic, e);
                return;
            }
        };
        self.broadcast_text(&text);
    }

    /// Deliver an already-serialized frame to every live client.
    pub fn broadcast_text(&self, text: &str) {
        let ws_msg = Message::Text(text.to_string().into());

        // Collect ids first so no shard lock is held across sends.
        let ids: Vec<u64> = self.clients.iter().map(|entry| *entry.key()).collect();

        for raw_id in ids {
            if let Some(entry) = self.clients.get(&raw_id) {
                if let Err(e) = entry.sender.try_send(ws_msg.clone()) {
                    tracing::debug!("client-{}: dropping frame: {}", raw_id, e);
                }
            }
        }
    }
}

impl Default for ClientManager {
    fn default() -> Self {
        Self::new()
    }
}

// ════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn test_envelope() -> Envelope {
        Envelope {
            topic: "Honda".to_string(),
            message: serde_json::json!({"gmac": "G1", "obj": [{"dmac": "B1", "rssi": -61}]}),
        }
    }

    #[tokio::test]
    async fn register_and_unregister() {
        let mgr = ClientManager::new();
        let (id, _rx) = mgr.register(16);
        assert_eq!(mgr.client_count(), 1);
        mgr.unregister(id);
        assert_eq!(mgr.client_count(), 0);
        // Idempotent.
        mgr.unregister(id);
        assert_eq!(mgr.client_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_all_clients_identically() {
        let mgr = ClientManager::new();
        let (_a, mut rx_a) = mgr.register(16);
        let (_b, mut rx_b) = mgr.register(16);
        let (_c, mut rx_c) = mgr.register(16);

        mgr.broadcast(&test_envelope());

        let mut frames = Vec::new();
        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            let msg = rx.recv().await.expect("every client should receive");
            let Message::Text(text) = msg else {
                panic!("expected text frame");
            };
            frames.push(text.to_string());
        }
        assert_eq!(frames[0], frames[1]);
        assert_eq!(frames[1], frames[2]);

        let env: Envelope = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(env.topic, "Honda");
    }

    #[tokio::test]
    async fn dead_client_does_not_block_the_rest() {
        let mgr = ClientManager::new();
        let (_a, rx_a) = mgr.register(16);
        let (_b, mut rx_b) = mgr.register(16);

        // Simulate a mid-broadcast disconnect: the receiver is gone but the
        // client has not been unregistered yet.
        drop(rx_a);

        mgr.broadcast(&test_envelope());

        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn full_channel_drops_frame_instead_of_blocking() {
        let mgr = ClientManager::new();
        let (_a, mut rx_a) = mgr.register(1);
        let (_b, mut rx_b) = mgr.register(16);

        // Two broadcasts against a capacity-1 channel: the second frame for
        // the slow client is dropped, the fast client gets both.
        mgr.broadcast(&test_envelope());
        mgr.broadcast(&test_envelope());

        assert!(rx_a.recv().await.is_some());
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
    }
}
