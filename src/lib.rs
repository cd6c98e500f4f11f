//! # beacon-bridge
//!
//! Relays BLE beacon telemetry from an MQTT broker to browser clients over a
//! local WebSocket fan-out, and turns the noisy per-beacon RSSI stream into
//! smoothed position/distance estimates for a floor-plan view.
//!
//! Two halves, connected only by serialized JSON over sockets:
//!
//! - **Relay** ([`relay`], [`server`], [`clients`]) — one upstream MQTT
//!   subscription whose messages are re-enveloped and pushed to every live
//!   WebSocket client. Delivery is fire-and-forget per client; a slow or dead
//!   client never blocks the broker subscription or the other clients.
//! - **Tracker** ([`window`], [`signal`], [`tracker`], [`reaper`],
//!   [`export`], [`monitor`]) — a downstream consumer that maintains
//!   bounded sliding windows of RSSI samples per beacon, maps the smoothed
//!   value to an estimated distance via a log-distance path-loss model, and
//!   evicts beacons that have gone silent.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use beacon_bridge::{config::RelayConfig, relay::Relay};
//!
//! let cfg = RelayConfig::new("broker.example.com", 1883, "Honda");
//! let handle = Relay::start(cfg).await?;
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown().await;
//! ```
//!
//! # Wire format
//!
//! Upstream payloads decode as `{"gmac": "...", "obj": [{"dmac": "...",
//! "rssi": -61, "temp": 23.5}, ...]}`. Each forwarded message reaches
//! downstream clients as `{"topic": "...", "message": <upstream payload>}` —
//! see [`protocol`].

pub mod clients;
pub mod config;
pub mod error;
pub mod export;
pub mod monitor;
pub mod protocol;
pub mod reaper;
pub mod relay;
pub mod server;
pub mod signal;
pub mod tracker;
pub mod window;

pub use clients::{ClientId, ClientManager};
pub use config::{FloorPlan, RelayConfig, TrackerConfig};
pub use error::{BridgeError, BridgeResult};
pub use protocol::{BeaconReading, Envelope, TelemetryBatch};
pub use relay::{Relay, RelayHandle};
pub use signal::{estimate_distance, Calibration, SignalBand};
pub use tracker::{BeaconTracker, MarkerUpdate, PresentationSink};
pub use window::{RssiAverager, SlidingWindow};
