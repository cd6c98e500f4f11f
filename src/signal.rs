//! Log-distance path-loss model and signal-strength banding.

use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════════
// Calibration
// ════════════════════════════════════════════════════════════════════

/// Calibration constants for the log-distance path-loss model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Reference RSSI at 1 metre, in dBm.
    pub rssi_ref: f64,
    /// Environment-dependent attenuation exponent.
    pub path_loss_exponent: f64,
}

impl Default for Calibration {
    /// Values measured for the deployed gateways.
    fn default() -> Self {
        Self {
            rssi_ref: -28.0,
            path_loss_exponent: 1.3,
        }
    }
}

/// Estimated distance in metres for a smoothed RSSI value:
/// `10 ^ ((rssi_ref − rssi) / (10 · path_loss_exponent))`.
///
/// Strictly decreasing in `average_rssi` — a stronger signal means a smaller
/// distance. Non-finite input propagates as NaN; callers filter readings
/// before they reach this point.
pub fn estimate_distance(average_rssi: f64, calibration: &Calibration) -> f64 {
    10f64.powf((calibration.rssi_ref - average_rssi) / (10.0 * calibration.path_loss_exponent))
}

// ════════════════════════════════════════════════════════════════════
// Signal bands
// ════════════════════════════════════════════════════════════════════

/// Colour band for a smoothed RSSI value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalBand {
    /// Average above −50 dBm.
    Strong,
    /// Average in (−70, −50] dBm.
    Moderate,
    /// Average at or below −70 dBm.
    Weak,
}

impl SignalBand {
    /// Band for a smoothed RSSI value.
    pub fn from_average(average_rssi: f64) -> Self {
        if average_rssi > -50.0 {
            Self::Strong
        } else if average_rssi > -70.0 {
            Self::Moderate
        } else {
            Self::Weak
        }
    }
}

// ════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════
