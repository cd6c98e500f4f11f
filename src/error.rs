//! Error handling for the bridge.
//!
//! Failures fall into a small taxonomy:
//!
//! - **Transport** — an upstream or downstream connection could not be
//!   established or dropped. Recoverable: the owning task logs it and retries
//!   with backoff.
//! - **Decode** — a payload failed to parse as the expected structure. The
//!   single offending message is dropped and processing continues.
//! - **Config** — invalid startup configuration. Fatal, surfaced from `main`.
//!
//! A missing position mapping for a beacon and an empty aggregation window
//! are *not* errors: the first is an `Option` miss that silently skips one
//! reading, the second makes [`crate::window::RssiAverager::current_average`]
//! return `None` instead of dividing by zero.

use thiserror::Error;

/// Unified error type for bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Connection establishment or I/O failure on either side of the bridge.
    #[error("transport error on {endpoint}: {reason}")]
    Transport { endpoint: String, reason: String },

    /// Payload did not decode as the expected structure.
    #[error("failed to decode {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// Invalid configuration detected at startup.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Shorthand for a transport error with a displayable cause.
    pub fn transport(endpoint: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result alias used throughout the crate.
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_display_includes_endpoint() {
        let err = BridgeError::transport("broker:1883", "connection refused");
        let msg = err.to_string();
        assert!(msg.contains("broker:1883"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn decode_error_chains_source() {
        let source = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err = BridgeError::Decode {
            context: "telemetry batch".to_string(),
            source,
        };
        assert!(std::error::Error::source(&err).is_some());
    }
}
