//! Downstream WebSocket client driving the aggregation pipeline.
//!
//! Connects to a running relay, decodes each [`Envelope`] frame, and feeds
//! the shared [`BeaconTracker`] (and optionally a [`SampleRecorder`]).
//! Connection loss triggers reconnection with stepped backoff; frames that
//! fail to decode are logged and skipped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::Message;

use crate::{
    export::SampleRecorder,
    protocol::{now_ms, Envelope, TelemetryBatch},
    tracker::BeaconTracker,
};

/// Backoff steps between reconnect attempts, in milliseconds.
const RECONNECT_BACKOFF_MS: [u64; 5] = [500, 1_000, 2_000, 4_000, 8_000];

/// Connect to `url` and pump frames into the tracker until shutdown.
///
/// `topic` filters envelopes the same way the relay filters upstream
/// messages; in practice they always match, but a relay bridging several
/// deployments may multiplex.
pub async fn run_monitor(
    url: String,
    topic: String,
    tracker: Arc<Mutex<BeaconTracker>>,
    recorder: Option<Arc<Mutex<SampleRecorder>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt = 0usize;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let ws_stream = match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _response)) => {
                tracing::info!("connected to relay at {}", url);
                attempt = 0;
                stream
            }
            Err(e) => {
                let delay = RECONNECT_BACKOFF_MS[attempt.min(RECONNECT_BACKOFF_MS.len() - 1)];
                attempt += 1;
                tracing::warn!(
                    "relay connection failed: {} — retrying in {}ms",
                    e,
                    delay
                );
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(delay)) => continue,
                    _ = shutdown.changed() => break,
                }
            }
        };

        let (_write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            handle_frame(&text, &topic, &tracker, recorder.as_ref()).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!("relay connection closed");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!("relay read error: {}", e);
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    }
}

/// Decode one envelope frame and feed the pipeline.
async fn handle_frame(
    text: &str,
    topic: &str,
    tracker: &Arc<Mutex<BeaconTracker>>,
    recorder: Option<&Arc<Mutex<SampleRecorder>>>,
) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!("skipping undecodable frame: {}", e);
            return;
        }
    };

    if envelope.topic != topic {
        return;
    }

    let batch = match TelemetryBatch::from_value(&envelope.message) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!("skipping malformed batch: {}", e);
            return;
        }
    };

    tracker.lock().await.process_batch(&batch, Instant::now());

    if let Some(recorder) = recorder {
        recorder.lock().await.record_batch(&batch, now_ms());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FloorPlan, TrackerConfig};
    use crate::export::ExportSink;
    use crate::tracker::{MarkerUpdate, PresentationSink};
    use std::collections::HashMap;

    struct NullSink;

    impl PresentationSink for NullSink {
        fn upsert_marker(&mut self, _update: &MarkerUpdate) {}
        fn remove_marker(&mut self, _beacon_id: &str) {}
        fn update_counters(&mut self, _total: usize, _per_gateway: &HashMap<String, usize>) {}
    }

    struct NullExport;

    impl ExportSink for NullExport {
        fn export(&mut self, _rows: Vec<crate::export::SampleRow>) {}
    }

    fn test_tracker() -> Arc<Mutex<BeaconTracker>> {
        let config = TrackerConfig::default()
            .with_floor_plan(FloorPlan::grid(&["B1"], 1, 1, (100.0, 100.0)).unwrap());
        Arc::new(Mutex::new(BeaconTracker::new(config, Box::new(NullSink))))
    }

    #[tokio::test]
    async fn frame_on_matching_topic_feeds_tracker_and_recorder() {
        let tracker = test_tracker();
        let recorder = Arc::new(Mutex::new(SampleRecorder::new(
            100,
            10,
            Box::new(NullExport),
        )));

        let frame =
            r#"{"topic":"Honda","message":{"gmac":"G1","obj":[{"dmac":"B1","rssi":-45}]}}"#;
        handle_frame(frame, "Honda", &tracker, Some(&recorder)).await;

        assert!(tracker.lock().await.is_detected("B1"));
        assert_eq!(recorder.lock().await.pending(), 1);
    }

    #[tokio::test]
    async fn frame_on_other_topic_is_ignored() {
        let tracker = test_tracker();
        let frame =
            r#"{"topic":"Toyota","message":{"gmac":"G1","obj":[{"dmac":"B1","rssi":-45}]}}"#;
        handle_frame(frame, "Honda", &tracker, None).await;
        assert_eq!(tracker.lock().await.visible_count(), 0);
    }

    #[tokio::test]
    async fn undecodable_frame_is_skipped() {
        let tracker = test_tracker();
        handle_frame("garbage", "Honda", &tracker, None).await;
        handle_frame(r#"{"topic":"Honda","message":{"obj":[]}}"#, "Honda", &tracker, None).await;
        assert_eq!(tracker.lock().await.visible_count(), 0);
    }
}
