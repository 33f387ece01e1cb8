//! Outward events delivered to the application.

use serde::Serialize;

use crate::core::ball_data::BallData;

/// Everything the putting integration reports to the UI/network layer.
///
/// `Connected`, `Battery`, `Status`, `Shot` and `Error` come from the device
/// session and are forwarded unchanged. The rest are produced by the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum DeviceEvent {
    Connected(String),
    /// Raw battery level; above 100 means unknown
    Battery(u16),
    Status { kind: String, message: String },
    Shot(BallData),
    Error(String),
    Rssi(i16),
    Scanning(String),
    DeviceNotFound(String),
    ScanError(String),
    Disconnected,
    /// Whether shots should currently be held back by the forwarder
    Forwarding { paused: bool },
}

impl DeviceEvent {
    pub fn status(kind: &str, message: &str) -> Self {
        Self::Status {
            kind: kind.to_string(),
            message: message.to_string(),
        }
    }
}
