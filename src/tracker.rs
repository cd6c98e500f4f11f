//! Detection set, per-beacon smoothing, and gateway counters.
//!
//! [`BeaconTracker`] consumes decoded [`TelemetryBatch`]es and keeps the set
//! of currently visible beacons. A reading makes a beacon visible only when
//! its RSSI is strictly above the configured threshold *and* the beacon has
//! a slot on the floor plan — sub-threshold readings and unknown MACs are
//! skipped without feeding the per-beacon windows (the sample recorder in
//! [`crate::export`] is the path that records everything).
//!
//! Marker upserts, removals and counter updates flow to a
//! [`PresentationSink`] — the seam to the out-of-scope map/table layer.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::{
    config::TrackerConfig,
    protocol::TelemetryBatch,
    signal::{estimate_distance, SignalBand},
    window::RssiAverager,
};

// ════════════════════════════════════════════════════════════════════
// Presentation contract
// ════════════════════════════════════════════════════════════════════

/// Everything the presentation layer needs to draw one beacon marker.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerUpdate {
    /// Beacon MAC address.
    pub beacon_id: String,
    /// Human-facing beacon number from the floor plan.
    pub number: u32,
    /// Floor-plan coordinates.
    pub position: (f64, f64),
    /// Colour band for the smoothed signal.
    pub band: SignalBand,
    /// Windowed average RSSI, rounded half away from zero.
    pub average_rssi: i32,
    /// Estimated distance in metres from the unrounded windowed average.
    pub distance_m: f64,
    /// Gateway that attributed this reading.
    pub gateway: String,
}

/// Consumer of tracker output — the external map/table layer.
pub trait PresentationSink: Send {
    /// A beacon became visible or its smoothed values changed.
    fn upsert_marker(&mut self, update: &MarkerUpdate);

    /// A beacon went silent for longer than the freshness window.
    fn remove_marker(&mut self, beacon_id: &str);

    /// Visible total and per-gateway counts for the most recent batch.
    fn update_counters(&mut self, total_visible: usize, per_gateway: &HashMap<String, usize>);

    /// One-shot completion notice: every expected beacon has been seen.
    fn scan_complete(&mut self, elapsed: Duration) {
        let _ = elapsed;
    }
}

// ════════════════════════════════════════════════════════════════════
// BeaconTracker
// ════════════════════════════════════════════════════════════════════

/// Aggregation and detection state for one downstream consumer.
pub struct BeaconTracker {
    config: TrackerConfig,
    sink: Box<dyn PresentationSink>,
    windows: RssiAverager,
    /// Detection set: beacon MAC → last instant a detected reading arrived.
    last_seen: HashMap<String, Instant>,
    /// Per-gateway counts from the most recent batch pass.
    latest_counters: HashMap<String, usize>,
    /// Gateway and beacons counted in the most recent batch pass, kept so a
    /// sweep can reconcile the counts with the surviving detection set.
    latest_gateway: Option<String>,
    latest_counted: Vec<String>,
    scan_started: Option<Instant>,
    scan_complete_fired: bool,
}

impl BeaconTracker {
    /// Create a tracker that reports to `sink`.
    pub fn new(config: TrackerConfig, sink: Box<dyn PresentationSink>) -> Self {
        let windows = RssiAverager::new(config.window_size);
        Self {
            config,
            sink,
            windows,
            last_seen: HashMap::new(),
            latest_counters: HashMap::new(),
            latest_gateway: None,
            latest_counted: Vec::new(),
            scan_started: None,
            scan_complete_fired: false,
        }
    }

    /// Number of currently visible beacons.
    pub fn visible_count(&self) -> usize {
        self.last_seen.len()
    }

    /// Returns `true` while `beacon_id` is in the detection set.
    pub fn is_detected(&self, beacon_id: &str) -> bool {
        self.last_seen.contains_key(beacon_id)
    }

    /// The sweep cadence this tracker was configured with.
    pub fn sweep_interval(&self) -> Duration {
        self.config.sweep_interval
    }

    // ────────────────────────────────────────────────────────────────
    // Batch processing
    // ────────────────────────────────────────────────────────────────

    /// Process one gateway batch received at `now`.
    ///
    /// Gateway counters are reset at the start of every pass and incremented
    /// once per detected beacon attributed to the batch's gateway.
    pub fn process_batch(&mut self, batch: &TelemetryBatch, now: Instant) {
        let mut counters: HashMap<String, usize> = self
            .config
            .gateways
            .iter()
            .map(|g| (g.clone(), 0))
            .collect();
        counters.entry(batch.gmac.clone()).or_insert(0);
        let mut counted: Vec<String> = Vec::new();

        for reading in &batch.obj {
            // Non-finite values must never reach the distance model.
            if !reading.rssi.is_finite() {
                continue;
            }
            // Visibility requires a strictly above-threshold reading.
            if reading.rssi <= self.config.rssi_threshold {
                continue;
            }
            // Unknown beacon: skip the reading, not the batch.
            let Some(planned) = self.config.floor_plan.lookup(&reading.dmac).copied() else {
                continue;
            };

            self.last_seen.insert(reading.dmac.clone(), now);
            self.windows.add_sample(&reading.dmac, reading.rssi);

            let mean = self
                .windows
                .current_mean(&reading.dmac)
                .unwrap_or(reading.rssi);

            let update = MarkerUpdate {
                beacon_id: reading.dmac.clone(),
                number: planned.number,
                position: planned.position,
                band: SignalBand::from_average(mean),
                average_rssi: self
                    .windows
                    .current_average(&reading.dmac)
                    .unwrap_or(reading.rssi.round() as i32),
                distance_m: estimate_distance(mean, &self.config.calibration),
                gateway: batch.gmac.clone(),
            };
            self.sink.upsert_marker(&update);

            if let Some(count) = counters.get_mut(&batch.gmac) {
                *count += 1;
                counted.push(reading.dmac.clone());
            }
        }

        let total = self.last_seen.len();
        self.sink.update_counters(total, &counters);
        self.latest_counters = counters;
        self.latest_gateway = Some(batch.gmac.clone());
        self.latest_counted = counted;

        if self.scan_started.is_none() && total >= 1 {
            self.scan_started = Some(now);
            tracing::info!("scan started: first beacon visible");
        }
        self.maybe_fire_scan_complete(now, total);
    }

    /// Fire the one-shot completion signal when the visible count first
    /// reaches the expected total.
    fn maybe_fire_scan_complete(&mut self, now: Instant, total: usize) {
        let (Some(expected), Some(started)) = (self.config.expected_beacons, self.scan_started)
        else {
            return;
        };
        if self.scan_complete_fired || total < expected {
            return;
        }
        self.scan_complete_fired = true;
        let elapsed = now.duration_since(started);
        tracing::info!("all {} beacons scanned in {:?}", expected, elapsed);
        self.sink.scan_complete(elapsed);
    }

    // ────────────────────────────────────────────────────────────────
    // Eviction
    // ────────────────────────────────────────────────────────────────

    /// Evict every beacon whose last detected reading is older than the
    /// freshness window, removing its marker and its smoothing window.
    pub fn sweep(&mut self, now: Instant) {
        let freshness = self.config.freshness_window;
        let stale: Vec<String> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) > freshness)
            .map(|(mac, _)| mac.clone())
            .collect();

        if stale.is_empty() {
            return;
        }

        for mac in &stale {
            self.last_seen.remove(mac);
            self.windows.evict(mac);
            self.sink.remove_marker(mac);
            tracing::debug!("evicted stale beacon {}", mac);
        }

        // Drop evicted beacons from the latest batch's counts so the total
        // and the per-gateway numbers describe the same detection set.
        let mut counters: HashMap<String, usize> = self
            .config
            .gateways
            .iter()
            .map(|g| (g.clone(), 0))
            .collect();
        if let Some(gateway) = &self.latest_gateway {
            let live = self
                .latest_counted
                .iter()
                .filter(|mac| self.last_seen.contains_key(*mac))
                .count();
            counters.insert(gateway.clone(), live);
        }
        self.latest_counters = counters;

        self.sink
            .update_counters(self.last_seen.len(), &self.latest_counters);
    }
}

// ════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════
