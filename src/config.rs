//! Startup configuration.
//!
//! All tunables live in explicit structs constructed once at startup and
//! handed to the components that need them — there is no process-wide
//! mutable state. [`FloorPlan`] replaces the hardcoded MAC → grid-position
//! tables of earlier deployments with a table built from the configured MAC
//! list.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{BridgeError, BridgeResult};
use crate::signal::Calibration;

// ════════════════════════════════════════════════════════════════════
// Relay configuration
// ════════════════════════════════════════════════════════════════════

/// Configuration for the MQTT → WebSocket relay core.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// MQTT broker host.
    pub broker_host: String,
    /// MQTT broker port.
    pub broker_port: u16,
    /// The single topic the relay subscribes to and forwards.
    pub topic: String,
    /// MQTT client id; a `uuid`-suffixed id is generated when `None`.
    pub client_id: Option<String>,
    /// TCP address the WebSocket listener binds to.
    pub listen_addr: SocketAddr,
    /// Delay between upstream reconnect attempts.
    pub reconnect_period: Duration,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Per-client send-buffer capacity in messages. When a slow client's
    /// buffer fills up, frames addressed to it are dropped, not queued.
    pub channel_capacity: usize,
}

impl RelayConfig {
    /// Create a relay configuration with the defaults used in deployment:
    /// listener on port 9002, 1 s reconnect period, 30 s keep-alive.
    pub fn new(broker_host: impl Into<String>, broker_port: u16, topic: impl Into<String>) -> Self {
        Self {
            broker_host: broker_host.into(),
            broker_port,
            topic: topic.into(),
            client_id: None,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9002)),
            reconnect_period: Duration::from_secs(1),
            keep_alive: Duration::from_secs(30),
            channel_capacity: 256,
        }
    }

    /// Set the WebSocket listener address.
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Set a fixed MQTT client id.
    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Set the delay between upstream reconnect attempts (default: 1 s).
    pub fn with_reconnect_period(mut self, period: Duration) -> Self {
        self.reconnect_period = period;
        self
    }

    /// Set the per-client send-buffer capacity (default: 256 messages).
    pub fn with_channel_capacity(mut self, cap: usize) -> Self {
        self.channel_capacity = cap;
        self
    }
}

// ════════════════════════════════════════════════════════════════════
// Floor plan
// ════════════════════════════════════════════════════════════════════

/// A beacon's slot on the floor plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedBeacon {
    /// Human-facing beacon number (1-based).
    pub number: u32,
    /// Map coordinates in floor-plan units.
    pub position: (f64, f64),
}

/// Static mapping from beacon MAC addresses to floor-plan positions.
///
/// Readings from MACs not present in the plan are silently skipped by the
/// tracker — an unknown beacon is not an error.
#[derive(Debug, Clone, Default)]
pub struct FloorPlan {
    positions: HashMap<String, PlannedBeacon>,
}

impl FloorPlan {
    /// Lay the given MACs out on an evenly-spaced grid over `extent`
    /// (width, height), row-major, numbering them 1..=n in list order.
    ///
    /// Fails with [`BridgeError::Config`] when either grid dimension is zero
    /// or the MAC list does not fit the grid.
    pub fn grid(
        macs: &[&str],
        rows: usize,
        cols: usize,
        extent: (f64, f64),
    ) -> BridgeResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(BridgeError::Config {
                reason: format!("floor-plan grid needs at least one row and column, got {rows}x{cols}"),
            });
        }
        if macs.len() > rows * cols {
            return Err(BridgeError::Config {
                reason: format!(
                    "{} beacons do not fit a {rows}x{cols} floor-plan grid",
                    macs.len()
                ),
            });
        }

        let x_spacing = extent.0 / (cols as f64 + 1.0);
        let y_spacing = extent.1 / (rows as f64 + 1.0);

        let positions = macs
            .iter()
            .enumerate()
            .map(|(index, mac)| {
                let row = index / cols;
                let col = index % cols;
                let planned = PlannedBeacon {
                    number: index as u32 + 1,
                    position: ((col as f64 + 1.0) * x_spacing, (row as f64 + 1.0) * y_spacing),
                };
                (mac.to_string(), planned)
            })
            .collect();

        Ok(Self { positions })
    }

    /// Look up a beacon's slot by MAC address.
    pub fn lookup(&self, mac: &str) -> Option<&PlannedBeacon> {
        self.positions.get(mac)
    }

    /// Number of beacons in the plan.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns `true` when the plan contains no beacons.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

// ════════════════════════════════════════════════════════════════════
// Tracker configuration
// ════════════════════════════════════════════════════════════════════

/// Configuration for the downstream aggregation/detection pipeline.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Readings at or below this RSSI are invisible to the detection set.
    pub rssi_threshold: f64,
    /// Maximum silence before a detected beacon is evicted.
    pub freshness_window: Duration,
    /// Cadence of the eviction sweep.
    pub sweep_interval: Duration,
    /// Sliding-window capacity per beacon.
    pub window_size: usize,
    /// When the visible count first reaches this value, the one-shot
    /// scan-complete signal fires. `None` disables the signal.
    pub expected_beacons: Option<usize>,
    /// Path-loss calibration for distance estimation.
    pub calibration: Calibration,
    /// Beacon positions on the floor plan.
    pub floor_plan: FloorPlan,
    /// Gateways whose per-batch beacon counts are reported. Counters for
    /// gateways not in this list are still tracked when they produce batches.
    pub gateways: Vec<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            rssi_threshold: -75.0,
            freshness_window: Duration::from_secs(20),
            sweep_interval: Duration::from_secs(10),
            window_size: 10,
            expected_beacons: None,
            calibration: Calibration::default(),
            floor_plan: FloorPlan::default(),
            gateways: Vec::new(),
        }
    }
}

impl TrackerConfig {
    /// Set the floor plan.
    pub fn with_floor_plan(mut self, plan: FloorPlan) -> Self {
        self.floor_plan = plan;
        self
    }

    /// Set the gateways to report counters for.
    pub fn with_gateways(mut self, gateways: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.gateways = gateways.into_iter().map(Into::into).collect();
        self
    }

    /// Enable the one-shot scan-complete signal at `count` visible beacons.
    pub fn with_expected_beacons(mut self, count: usize) -> Self {
        self.expected_beacons = Some(count);
        self
    }
}

// ════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════
