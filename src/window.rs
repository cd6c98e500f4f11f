//! Bounded sliding windows over RSSI samples.
//!
//! [`SlidingWindow`] is a fixed-capacity FIFO: pushing into a full window
//! drops the oldest sample first, so the window never holds more than its
//! capacity. [`RssiAverager`] keys one window per source (beacon or gateway
//! MAC) and exposes the running mean, rounded only at read time.

use std::collections::{HashMap, VecDeque};

// ════════════════════════════════════════════════════════════════════
// SlidingWindow
// ════════════════════════════════════════════════════════════════════

/// Fixed-capacity FIFO buffer of the most recent samples.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SlidingWindow {
    /// Create a window holding at most `capacity` samples.
    ///
    /// A zero capacity is clamped to 1 so the window can always hold the
    /// latest sample.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest when the window is full.
    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Arithmetic mean of the current contents, `None` when empty.
    ///
    /// The mean accumulates in floating point; nothing is pre-rounded or
    /// cached, so the value is never stale.
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as f64)
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` when no samples are held.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// ════════════════════════════════════════════════════════════════════
// RssiAverager
// ════════════════════════════════════════════════════════════════════

/// Per-source sliding-window RSSI smoothing.
#[derive(Debug, Clone)]
pub struct RssiAverager {
    windows: HashMap<String, SlidingWindow>,
    capacity: usize,
}

impl RssiAverager {
    /// Create an averager whose windows hold at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            windows: HashMap::new(),
            capacity,
        }
    }

    /// Append `rssi` to the window keyed by `source`, creating the window on
    /// first use.
    pub fn add_sample(&mut self, source: &str, rssi: f64) {
        self.windows
            .entry(source.to_string())
            .or_insert_with(|| SlidingWindow::new(self.capacity))
            .push(rssi);
    }

    /// Mean of the current window for `source`, rounded half away from zero.
    ///
    /// Returns `None` for an unknown source or an empty window — never zero,
    /// never a division by zero.
    pub fn current_average(&self, source: &str) -> Option<i32> {
        self.windows
            .get(source)?
            .mean()
            .map(|m| m.round() as i32)
    }

    /// Unrounded mean for `source`, for downstream math that should not
    /// accumulate rounding error.
    pub fn current_mean(&self, source: &str) -> Option<f64> {
        self.windows.get(source)?.mean()
    }

    /// Number of samples currently held for `source`.
    pub fn window_len(&self, source: &str) -> usize {
        self.windows.get(source).map_or(0, SlidingWindow::len)
    }

    /// Drop the window for `source`, if any.
    pub fn evict(&mut self, source: &str) {
        self.windows.remove(source);
    }

    /// Drop all windows.
    pub fn clear(&mut self) {
        self.windows.clear();
    }
}

// ════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════
