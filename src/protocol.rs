//! Wire protocol types shared by the relay and its downstream consumers.
//!
//! # Upstream (broker → relay)
//!
//! Gateways publish one JSON object per scan pass:
//!
//! ```json
//! { "gmac": "94A408B0095C", "obj": [ { "dmac": "BC57290206E8", "rssi": -61, "temp": 23.5 } ] }
//! ```
//!
//! # Downstream (relay → WebSocket clients)
//!
//! The relay re-envelopes each upstream payload verbatim:
//!
//! ```json
//! { "topic": "Honda", "message": { "gmac": "...", "obj": [...] } }
//! ```
//!
//! The relay only validates that the payload is well-formed JSON; the typed
//! decode into [`TelemetryBatch`] happens at the consumer, where individual
//! malformed readings inside `obj` are skipped without rejecting the batch
//! (gateways occasionally emit empty `{}` entries).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, BridgeResult};

// ════════════════════════════════════════════════════════════════════
// Readings and batches
// ════════════════════════════════════════════════════════════════════

/// One observation of one beacon by one gateway at one instant.
///
/// Field names match the gateway wire format (`dmac` = device MAC of the
/// scanned beacon, `gmac` = MAC of the observing gateway).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconReading {
    /// MAC address of the scanned beacon.
    pub dmac: String,
    /// Received Signal Strength Indicator in dBm.
    pub rssi: f64,
    /// Beacon-reported temperature, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp: Option<f64>,
}

/// A batch of readings produced by a single gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryBatch {
    /// MAC address of the gateway that produced the batch.
    pub gmac: String,
    /// Readings from the gateway's latest scan pass.
    pub obj: Vec<BeaconReading>,
}

impl TelemetryBatch {
    /// Decode a batch from an already-parsed JSON value.
    ///
    /// The outer structure (`gmac` string, `obj` array) must be present;
    /// elements of `obj` that fail to decode are dropped individually.
    pub fn from_value(value: &Value) -> BridgeResult<Self> {
        #[derive(Deserialize)]
        struct RawBatch {
            gmac: String,
            obj: Vec<Value>,
        }

        let raw: RawBatch =
            serde_json::from_value(value.clone()).map_err(|source| BridgeError::Decode {
                context: "telemetry batch".to_string(),
                source,
            })?;

        let obj = raw
            .obj
            .into_iter()
            .filter_map(|v| serde_json::from_value::<BeaconReading>(v).ok())
            .collect();

        Ok(Self {
            gmac: raw.gmac,
            obj,
        })
    }
}

// ════════════════════════════════════════════════════════════════════
// Downstream envelope
// ════════════════════════════════════════════════════════════════════

/// The frame every downstream WebSocket client receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// The upstream topic the payload arrived on.
    pub topic: String,
    /// The upstream payload, forwarded verbatim.
    pub message: Value,
}

/// Returns the current milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_decodes_valid_readings() {
        let v: Value = serde_json::from_str(
            r#"{"gmac":"94A408B0095C","obj":[{"dmac":"BC57290206E8","rssi":-61,"temp":23.5}]}"#,
        )
        .unwrap();
        let batch = TelemetryBatch::from_value(&v).unwrap();
        assert_eq!(batch.gmac, "94A408B0095C");
        assert_eq!(batch.obj.len(), 1);
        assert_eq!(batch.obj[0].dmac, "BC57290206E8");
        assert_eq!(batch.obj[0].rssi, -61.0);
        assert_eq!(batch.obj[0].temp, Some(23.5));
    }

    #[test]
    fn batch_skips_malformed_elements() {
        // Gateways occasionally pad obj with empty objects; those must not
        // reject the whole batch.
        let v: Value = serde_json::from_str(
            r#"{"gmac":"G1","obj":[{},{"dmac":"B1","rssi":-70},{"rssi":-40}]}"#,
        )
        .unwrap();
        let batch = TelemetryBatch::from_value(&v).unwrap();
        assert_eq!(batch.obj.len(), 1);
        assert_eq!(batch.obj[0].dmac, "B1");
    }

    #[test]
    fn batch_rejects_malformed_outer_structure() {
        let v: Value = serde_json::from_str(r#"{"obj":[]}"#).unwrap();
        assert!(TelemetryBatch::from_value(&v).is_err());
    }

    #[test]
    fn reading_temp_is_optional() {
        let reading: BeaconReading =
            serde_json::from_str(r#"{"dmac":"B1","rssi":-55}"#).unwrap();
        assert_eq!(reading.temp, None);
    }

    #[test]
    fn envelope_roundtrip() {
        let env = Envelope {
            topic: "Honda".to_string(),
            message: serde_json::json!({"gmac": "G1", "obj": []}),
        };
        let text = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back.topic, "Honda");
        assert_eq!(back.message["gmac"], "G1");
    }
}
