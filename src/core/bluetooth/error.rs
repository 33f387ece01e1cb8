//! Error types for the putting device integration.
//!
//! Payload errors are local: a bad notification is logged and dropped.
//! Link, discovery and heartbeat errors are fatal to the session and
//! always surface to the collaborator as an `error` event.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::core::bluetooth::types::{CharacteristicKind, ConnectionPhase};

#[derive(Debug, Clone, Error)]
pub enum BleError {
    /// Characteristic bytes did not match the expected layout.
    #[error("Malformed {kind} payload: {reason}")]
    MalformedPayload {
        kind: CharacteristicKind,
        reason: String,
    },

    /// A service could not be discovered or subscribed.
    #[error("Service {service} discovery failed: {reason}")]
    ServiceDiscoveryFailed { service: Uuid, reason: String },

    /// The transport reported an unexpected disconnect.
    #[error("Lost the Bluetooth connection to {device}")]
    LinkLost { device: String },

    /// No qualifying traffic arrived within the heartbeat interval.
    #[error("Heartbeat timeout: no data received from {device} for {}s", .interval.as_secs())]
    HeartbeatTimeout { device: String, interval: Duration },

    /// A scan finished without a matching device.
    #[error("No device found with a name starting with '{prefix}'")]
    DeviceNotFound { prefix: String },

    /// Link-level connect failed.
    #[error("Could not connect to {device}: {reason}")]
    ConnectionFailed { device: String, reason: String },

    /// An operation was called in a phase that does not allow it.
    #[error("Cannot {operation} while {phase}")]
    InvalidState {
        operation: &'static str,
        phase: ConnectionPhase,
    },

    #[error("No Bluetooth adapter available")]
    AdapterUnavailable,

    /// Anything else the platform stack reports.
    #[error("Bluetooth transport error: {0}")]
    Transport(String),
}

pub type BleResult<T> = std::result::Result<T, BleError>;

impl BleError {
    pub fn malformed(kind: CharacteristicKind, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            kind,
            reason: reason.into(),
        }
    }

    /// Returns `true` for errors that end a session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ServiceDiscoveryFailed { .. }
                | Self::LinkLost { .. }
                | Self::HeartbeatTimeout { .. }
                | Self::ConnectionFailed { .. }
                | Self::AdapterUnavailable
        )
    }
}
