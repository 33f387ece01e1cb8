//! Bluetooth functionality for the OnePutt bridge
//! This module handles scanning, connecting and supervising the putting
//! sensor, and decoding what it sends.

pub mod codec;
mod constants;
pub mod device;
mod error;
pub mod heartbeat;
pub mod scanner;
pub mod service;
pub mod session;
pub mod sim;
mod types;

#[cfg(feature = "bluetooth")]
mod connection;
#[cfg(feature = "bluetooth")]
mod notification;

// Re-export types that should be publicly accessible
pub use codec::{Reading, ShotRecord};
#[cfg(feature = "bluetooth")]
pub use connection::BluestDevice;
pub use constants::*; // Re-export all constants
pub use device::{DeviceClass, GattDevice, HeartbeatPolicy, NotificationStream, ShotRule};
pub use error::{BleError, BleResult};
pub use heartbeat::HeartbeatWatchdog;
#[cfg(feature = "bluetooth")]
pub use scanner::{BluestRssiScanner, BluestScanner};
pub use scanner::{DeviceScanner, FoundDevice, RssiScanner, ScannerEvent, report};
pub use service::{BindingEvent, ServiceBinding};
pub use session::{DeviceSession, SessionInput, SessionWake};
pub use sim::{SimulatedDevice, SimulatedRssiScanner, SimulatedScanner};
pub use types::{
    BluetoothDevice, CharacteristicKind, CharacteristicSpec, ConnectionPhase, DeviceIdentity,
    DeviceSessionState, ReadyState, ServiceDescriptor, extract_mac_address, name_matches_prefix,
};
