//! Relay core: one upstream MQTT subscription fanned out to N WebSocket
//! clients.
//!
//! The upstream side is a `rumqttc` [`AsyncClient`] with its polled event
//! loop running in a background task. Each `Publish` on the subscribed topic
//! is validated as JSON, wrapped in an [`Envelope`], and broadcast through
//! the shared [`ClientManager`]. Everything is best-effort:
//!
//! - messages on other topics are discarded,
//! - malformed payloads are logged and dropped,
//! - a poll error logs, sleeps for the reconnect period, and polls again
//!   (`rumqttc` re-establishes the session on the next poll) — connected
//!   downstream clients are unaffected.

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{
    clients::ClientManager,
    config::RelayConfig,
    error::BridgeResult,
    protocol::Envelope,
    server::start_server,
};

// ════════════════════════════════════════════════════════════════════
// Relay
// ════════════════════════════════════════════════════════════════════

/// Entry point for the relay core.
pub struct Relay;

impl Relay {
    /// Start the relay: bind the WebSocket listener, connect upstream, and
    /// subscribe to the configured topic.
    pub async fn start(config: RelayConfig) -> BridgeResult<RelayHandle> {
        Self::start_with_clients(config, ClientManager::new()).await
    }

    /// Start the relay with an externally-owned client registry (used by
    /// tests to observe fan-out directly).
    pub async fn start_with_clients(
        config: RelayConfig,
        clients: ClientManager,
    ) -> BridgeResult<RelayHandle> {
        let (local_addr, server_task) =
            start_server(config.listen_addr, clients.clone(), config.channel_capacity).await?;

        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("beacon-bridge-{}", uuid::Uuid::new_v4()));

        let mut mqtt_opts = MqttOptions::new(
            client_id,
            config.broker_host.clone(),
            config.broker_port,
        );
        mqtt_opts.set_keep_alive(config.keep_alive);
        mqtt_opts.set_clean_session(true);

        let (client, event_loop) = AsyncClient::new(mqtt_opts, 10);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let upstream_task = tokio::spawn(run_upstream(
            event_loop,
            client.clone(),
            config.clone(),
            clients.clone(),
            shutdown_rx,
        ));

        Ok(RelayHandle {
            local_addr,
            client,
            clients,
            shutdown_tx,
            upstream_task,
            server_task,
        })
    }
}

/// Handle to a running relay.
pub struct RelayHandle {
    local_addr: SocketAddr,
    client: AsyncClient,
    clients: ClientManager,
    shutdown_tx: watch::Sender<bool>,
    upstream_task: JoinHandle<()>,
    server_task: JoinHandle<()>,
}

impl RelayHandle {
    /// Local address of the WebSocket listener.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The shared downstream client registry.
    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    /// Close the upstream subscription and stop both background tasks.
    ///
    /// The DISCONNECT request is queued first and the upstream loop keeps
    /// polling until it is flushed, so the broker sees a clean disconnect.
    /// Downstream sockets are dropped when the server task stops.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!("MQTT disconnect during shutdown: {}", e);
        }
        let _ = self.shutdown_tx.send(true);
        if tokio::time::timeout(Duration::from_secs(2), &mut self.upstream_task)
            .await
            .is_err()
        {
            self.upstream_task.abort();
        }
        self.server_task.abort();
        tracing::info!("relay shut down");
    }
}

// ════════════════════════════════════════════════════════════════════
// Upstream loop
// ════════════════════════════════════════════════════════════════════

/// Poll the MQTT event loop until shutdown, re-subscribing on every
/// (re)connect.
async fn run_upstream(
    mut event_loop: EventLoop,
    client: AsyncClient,
    config: RelayConfig,
    clients: ClientManager,
    mut shutdown: watch::Receiver<bool>,
) {
    let endpoint = format!("{}:{}", config.broker_host, config.broker_port);
    tracing::debug!("upstream event loop started for {}", endpoint);

    loop {
        tokio::select! {
            event = event_loop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("connected to MQTT broker {}", endpoint);
                    if let Err(e) = client.subscribe(&config.topic, QoS::AtMostOnce).await {
                        tracing::error!("failed to subscribe to '{}': {}", config.topic, e);
                    } else {
                        tracing::info!("subscribed to topic '{}'", config.topic);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    forward_publish(&config.topic, &publish.topic, &publish.payload, &clients);
                }
                Ok(_) => {
                    // Keep-alives, acks and outgoing packets need no handling.
                }
                Err(e) => {
                    tracing::warn!(
                        "upstream connection to {} lost: {}, retrying in {:?}",
                        endpoint,
                        e,
                        config.reconnect_period
                    );
                    tokio::time::sleep(config.reconnect_period).await;
                }
            },
            _ = shutdown.changed() => {
                let _ = tokio::time::timeout(
                    Duration::from_secs(1),
                    flush_disconnect(&mut event_loop),
                )
                .await;
                break;
            }
        }
    }

    tracing::debug!("upstream event loop stopped");
}

/// Keep polling until the queued DISCONNECT has left the wire, or the
/// connection drops on its own.
async fn flush_disconnect(event_loop: &mut EventLoop) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

/// Forward one upstream publish to every live downstream client.
///
/// Messages on other topics are discarded; payloads that are not valid JSON
/// are logged and dropped, never propagated.
fn forward_publish(subscribed: &str, topic: &str, payload: &[u8], clients: &ClientManager) {
    if topic != subscribed {
        tracing::trace!("discarding message on unsubscribed topic '{}'", topic);
        return;
    }

    let message: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("dropping malformed payload on '{}': {}", topic, e);
            return;
        }
    };

    let envelope = Envelope {
        topic: topic.to_string(),
        message,
    };
    clients.broadcast(&envelope);
}

// ════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;

    fn recv_text(rx: &mut tokio::sync::mpsc::Receiver<Message>) -> Option<String> {
        match rx.try_recv() {
            Ok(Message::Text(t)) => Some(t.to_string()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn matching_topic_reaches_all_clients() {
        let clients = ClientManager::new();
        let (_a, mut rx_a) = clients.register(16);
        let (_b, mut rx_b) = clients.register(16);
        let (_c, mut rx_c) = clients.register(16);

        let payload = br#"{"gmac":"G1","obj":[{"dmac":"B1","rssi":-61}]}"#;
        forward_publish("Honda", "Honda", payload, &clients);

        let frames: Vec<String> = [&mut rx_a, &mut rx_b, &mut rx_c]
            .into_iter()
            .map(|rx| recv_text(rx).expect("all clients receive"))
            .collect();
        assert_eq!(frames[0], frames[1]);
        assert_eq!(frames[1], frames[2]);

        let env: Envelope = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(env.topic, "Honda");
        assert_eq!(env.message["gmac"], "G1");
    }

    #[tokio::test]
    async fn other_topic_produces_zero_deliveries() {
        let clients = ClientManager::new();
        let (_a, mut rx) = clients.register(16);

        forward_publish("Honda", "Toyota", br#"{"gmac":"G1","obj":[]}"#, &clients);

        assert!(recv_text(&mut rx).is_none());
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped() {
        let clients = ClientManager::new();
        let (_a, mut rx) = clients.register(16);

        forward_publish("Honda", "Honda", b"not json at all", &clients);

        assert!(recv_text(&mut rx).is_none());
    }

    #[tokio::test]
    async fn shutdown_completes_promptly_without_a_broker() {
        let config = RelayConfig::new("127.0.0.1", 1, "Honda")
            .with_listen_addr("127.0.0.1:0".parse().unwrap())
            .with_reconnect_period(Duration::from_millis(50));
        let handle = Relay::start(config).await.expect("relay should start");

        // The upstream loop drains the queued DISCONNECT and exits on its
        // own; shutdown must not hang waiting for it.
        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("shutdown should finish promptly");
    }

    #[tokio::test]
    async fn dead_client_mid_broadcast_does_not_stop_delivery() {
        let clients = ClientManager::new();
        let (_a, rx_a) = clients.register(16);
        let (_b, mut rx_b) = clients.register(16);
        let (_c, mut rx_c) = clients.register(16);

        drop(rx_a); // simulated send failure for one connection

        forward_publish("Honda", "Honda", br#"{"gmac":"G1","obj":[]}"#, &clients);

        assert!(recv_text(&mut rx_b).is_some());
        assert!(recv_text(&mut rx_c).is_some());
    }
}
