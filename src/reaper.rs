//! Periodic stale-entry sweep.
//!
//! One canonical eviction policy: a fixed-cadence task that sweeps the
//! tracker's detection set against per-beacon last-seen timestamps. The task
//! owns nothing but a handle to the shared tracker and stops when the
//! shutdown channel flips, so process shutdown drains it cleanly.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::tracker::BeaconTracker;

/// Spawn the sweep task for `tracker` at the tracker's configured cadence.
///
/// The task exits when `shutdown` observes a change (or its sender drops).
pub fn spawn_reaper(
    tracker: Arc<Mutex<BeaconTracker>>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = tracker.lock().await.sweep_interval();
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // skip the immediate first tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tracker.lock().await.sweep(Instant::now());
                }
                _ = shutdown.changed() => {
                    tracing::debug!("reaper stopping");
                    break;
                }
            }
        }
    })
}
