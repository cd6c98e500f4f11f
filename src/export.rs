//! Quota-bounded sample recording for offline analysis.
//!
//! [`SampleRecorder`] appends one row per valid reading — the visibility
//! threshold deliberately does not apply here, so weak readings are captured
//! too. Each row carries the per-*gateway* windowed RSSI average at the time
//! of recording. When the log reaches the configured quota it is handed to
//! the [`ExportSink`] (the tabular-file writer, an external collaborator)
//! and both the log and the gateway windows reset.

use crate::{protocol::TelemetryBatch, window::RssiAverager};

/// Default number of rows collected before an export is triggered.
pub const DEFAULT_SAMPLE_QUOTA: usize = 10_000;

// ════════════════════════════════════════════════════════════════════
// Rows and sink
// ════════════════════════════════════════════════════════════════════

/// One recorded observation.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRow {
    /// Gateway MAC that produced the reading.
    pub gateway: String,
    /// Beacon MAC observed.
    pub beacon: String,
    /// Wall-clock capture time, milliseconds since the Unix epoch.
    pub recorded_at_ms: u64,
    /// Raw RSSI of this reading.
    pub rssi: f64,
    /// Windowed average RSSI for the gateway at capture time.
    pub average_rssi: Option<i32>,
}

/// Receives a full batch of rows once the quota is reached.
pub trait ExportSink: Send {
    fn export(&mut self, rows: Vec<SampleRow>);
}

// ════════════════════════════════════════════════════════════════════
// SampleRecorder
// ════════════════════════════════════════════════════════════════════

/// Accumulates rows up to a fixed quota, then exports and resets.
pub struct SampleRecorder {
    quota: usize,
    rows: Vec<SampleRow>,
    gateway_windows: RssiAverager,
    sink: Box<dyn ExportSink>,
}

impl SampleRecorder {
    /// Create a recorder with the given quota and per-gateway window size.
    pub fn new(quota: usize, window_size: usize, sink: Box<dyn ExportSink>) -> Self {
        Self {
            quota: quota.max(1),
            rows: Vec::new(),
            gateway_windows: RssiAverager::new(window_size),
            sink,
        }
    }

    /// Rows currently buffered.
    pub fn pending(&self) -> usize {
        self.rows.len()
    }

    /// Record every reading of `batch` at `recorded_at_ms`.
    ///
    /// Triggers an export (and a full reset of rows and gateway windows) the
    /// moment the quota is reached — which can happen mid-batch.
    pub fn record_batch(&mut self, batch: &TelemetryBatch, recorded_at_ms: u64) {
        for reading in &batch.obj {
            if !reading.rssi.is_finite() {
                continue;
            }

            self.gateway_windows.add_sample(&batch.gmac, reading.rssi);

            self.rows.push(SampleRow {
                gateway: batch.gmac.clone(),
                beacon: reading.dmac.clone(),
                recorded_at_ms,
                rssi: reading.rssi,
                average_rssi: self.gateway_windows.current_average(&batch.gmac),
            });

            if self.rows.len() >= self.quota {
                self.flush();
            }
        }
    }

    fn flush(&mut self) {
        let rows = std::mem::take(&mut self.rows);
        tracing::info!("exporting {} recorded samples", rows.len());
        self.sink.export(rows);
        self.gateway_windows.clear();
    }
}

// ════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::BeaconReading;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingExport(Arc<Mutex<Vec<Vec<SampleRow>>>>);

    impl ExportSink for RecordingExport {
        fn export(&mut self, rows: Vec<SampleRow>) {
            self.0.lock().unwrap().push(rows);
        }
    }

    fn batch(gmac: &str, rssis: &[f64]) -> TelemetryBatch {
        TelemetryBatch {
            gmac: gmac.to_string(),
            obj: rssis
                .iter()
                .enumerate()
                .map(|(i, rssi)| BeaconReading {
                    dmac: format!("B{i}"),
                    rssi: *rssi,
                    temp: None,
                })
                .collect(),
        }
    }

    #[test]
    fn rows_carry_the_gateway_windowed_average() {
        let sink = RecordingExport::default();
        let mut rec = SampleRecorder::new(100, 10, Box::new(sink));

        rec.record_batch(&batch("G1", &[-40.0, -42.0, -41.0]), 1_000);

        assert_eq!(rec.pending(), 3);
        assert_eq!(rec.rows[0].average_rssi, Some(-40));
        // Second row: mean(-40, -42) = -41.
        assert_eq!(rec.rows[1].average_rssi, Some(-41));
        // Third row: mean(-40, -42, -41) = -41.
        assert_eq!(rec.rows[2].average_rssi, Some(-41));
        assert_eq!(rec.rows[2].recorded_at_ms, 1_000);
    }

    #[test]
    fn quota_triggers_export_and_resets_everything() {
        let sink = RecordingExport::default();
        let exports = sink.0.clone();
        let mut rec = SampleRecorder::new(3, 10, Box::new(sink));

        rec.record_batch(&batch("G1", &[-40.0, -42.0]), 1_000);
        assert_eq!(rec.pending(), 2);
        assert!(exports.lock().unwrap().is_empty());

        rec.record_batch(&batch("G1", &[-41.0]), 2_000);
        assert_eq!(rec.pending(), 0);

        let exports = exports.lock().unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].len(), 3);
        assert_eq!(exports[0][2].average_rssi, Some(-41));
    }

    #[test]
    fn gateway_windows_reset_after_export() {
        let sink = RecordingExport::default();
        let exports = sink.0.clone();
        let mut rec = SampleRecorder::new(2, 10, Box::new(sink));

        rec.record_batch(&batch("G1", &[-90.0, -90.0]), 1_000); // export + reset
        rec.record_batch(&batch("G1", &[-40.0]), 2_000);

        // A fresh window: the -90s from before the export are gone.
        let exports = exports.lock().unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(rec.rows[0].average_rssi, Some(-40));
    }

    #[test]
    fn sub_threshold_readings_are_still_recorded() {
        // The visibility threshold is a tracker concern; the recorder takes
        // every valid reading.
        let sink = RecordingExport::default();
        let mut rec = SampleRecorder::new(100, 10, Box::new(sink));

        rec.record_batch(&batch("G1", &[-95.0]), 1_000);
        assert_eq!(rec.pending(), 1);
        assert_eq!(rec.rows[0].rssi, -95.0);
    }

    #[test]
    fn separate_gateways_average_independently() {
        let sink = RecordingExport::default();
        let mut rec = SampleRecorder::new(100, 10, Box::new(sink));

        rec.record_batch(&batch("G1", &[-40.0]), 1_000);
        rec.record_batch(&batch("G2", &[-80.0]), 1_000);

        assert_eq!(rec.rows[0].average_rssi, Some(-40));
        assert_eq!(rec.rows[1].average_rssi, Some(-80));
    }
}
