//! Defines shared data structures for the Bluetooth module.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

/// Represents a discovered Bluetooth device
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BluetoothDevice {
    /// The name of the device, if available
    pub name: Option<String>,
    /// The address of the device (MAC address on most platforms, may be N/A on macOS)
    pub address: String,
    /// Platform-specific unique identifier for the device (especially important on macOS)
    pub id: String,
    /// The signal strength (RSSI) of the device
    pub rssi: Option<i16>,
}

impl BluetoothDevice {
    /// Creates a new BluetoothDevice, pulling the MAC address out of the platform id
    pub fn new(id: String, name: Option<String>, rssi: Option<i16>) -> Self {
        let address = extract_mac_address(&id).unwrap_or_else(|| "N/A".to_string());
        Self {
            name,
            address,
            id,
            rssi,
        }
    }

    /// Returns true if the advertised name starts with `prefix`
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        name_matches_prefix(self.name.as_deref(), prefix)
    }
}

/// Name-prefix match used by every scanner. Unnamed devices never match.
pub fn name_matches_prefix(name: Option<&str>, prefix: &str) -> bool {
    name.is_some_and(|name| name.starts_with(prefix))
}

/// Finds the last MAC-looking token in a platform device id.
///
/// BlueZ ids look like `hci0/dev_AA_BB_...`, Windows ids embed `aa:bb:...`.
pub fn extract_mac_address(device_id: &str) -> Option<String> {
    static MAC: OnceLock<Option<Regex>> = OnceLock::new();
    let re = MAC
        .get_or_init(|| Regex::new(r"([0-9A-Fa-f]{2}[:_-]){5}([0-9A-Fa-f]{2})").ok())
        .as_ref()?;
    re.find_iter(device_id)
        .last()
        .map(|m| m.as_str().replace(['_', '-'], ":").to_uppercase())
}

/// Identity of the device owned by a session.
///
/// Metadata fields stay `None` until the device information reads complete.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DeviceIdentity {
    pub id: String,
    pub name: Option<String>,
    pub name_prefix: String,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
    pub model: Option<String>,
}

impl DeviceIdentity {
    pub fn clear_metadata(&mut self) {
        self.serial_number = None;
        self.firmware_version = None;
        self.model = None;
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Connection phase of a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    DiscoveringServices,
    Ready,
    Error,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::DiscoveringServices => "discovering services",
            Self::Ready => "ready",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// How the bytes of a characteristic are decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CharacteristicKind {
    BatteryLevel,
    ReadyStatus,
    Measurement,
    SerialNumber,
    FirmwareVersion,
    Model,
}

impl CharacteristicKind {
    /// Minimum payload length for this kind
    pub fn min_len(self) -> usize {
        match self {
            Self::BatteryLevel => 2,
            Self::ReadyStatus => 1,
            Self::Measurement => super::constants::MEASUREMENT_PACKET_SIZE,
            Self::SerialNumber | Self::FirmwareVersion | Self::Model => 0,
        }
    }
}

impl fmt::Display for CharacteristicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BatteryLevel => "battery level",
            Self::ReadyStatus => "ready status",
            Self::Measurement => "measurement",
            Self::SerialNumber => "serial number",
            Self::FirmwareVersion => "firmware version",
            Self::Model => "model",
        };
        f.write_str(label)
    }
}

/// A characteristic a binding cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicSpec {
    pub uuid: Uuid,
    pub kind: CharacteristicKind,
}

/// One GATT service of a device class.
#[derive(Debug, Clone, Copy)]
pub struct ServiceDescriptor {
    pub uuid: Uuid,
    /// Characteristics to enable notifications on, in order
    pub notify: &'static [CharacteristicSpec],
    /// Characteristics to read once after discovery, in order
    pub read_once: &'static [CharacteristicSpec],
    /// Whether the session waits for this service before reporting Ready
    pub gates_readiness: bool,
}

impl ServiceDescriptor {
    /// Looks up a characteristic of either set
    pub fn characteristic(&self, uuid: Uuid) -> Option<&CharacteristicSpec> {
        self.notify
            .iter()
            .chain(self.read_once.iter())
            .find(|spec| spec.uuid == uuid)
    }
}

/// Readiness reported by the measurement service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReadyState {
    Waiting,
    NotReady,
}

impl ReadyState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Waiting => "Waiting",
            Self::NotReady => "Not Ready",
        }
    }
}

/// Snapshot of everything a session tracks besides its tasks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSessionState {
    pub phase: ConnectionPhase,
    /// Highest shot sequence number accepted so far
    pub watermark: u16,
    pub battery: Option<u16>,
    pub ready: Option<ReadyState>,
    pub selected_club: String,
    pub paused: bool,
}

impl DeviceSessionState {
    pub fn new(selected_club: String) -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            watermark: 0,
            battery: None,
            ready: None,
            selected_club,
            paused: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_mac_address() {
        assert_eq!(
            extract_mac_address("/org/bluez/hci0/dev_c4_de_e2_11_22_33").as_deref(),
            Some("C4:DE:E2:11:22:33")
        );
        assert_eq!(
            extract_mac_address("BluetoothLE#BluetoothLE00:1a:7d:da:71:13-c4:de:e2:11:22:33")
                .as_deref(),
            Some("C4:DE:E2:11:22:33")
        );
        assert_eq!(extract_mac_address("6F1A2C4E-0000-4A4A-9C9C-2C1D5E6F7A8B"), None);
    }

    #[test]
    fn test_prefix_match() {
        let device = BluetoothDevice::new("sim-1".into(), Some("OnePutt-0042".into()), Some(-55));
        assert!(device.matches_prefix("OnePutt-"));
        assert!(!device.matches_prefix("ExPutt"));
        assert_eq!(device.address, "N/A");

        let unnamed = BluetoothDevice::new("sim-2".into(), None, None);
        assert!(!unnamed.matches_prefix("OnePutt-"));
        assert!(name_matches_prefix(Some("OnePutt-7"), "OnePutt-"));
        assert!(!name_matches_prefix(Some("onePutt-7"), "OnePutt-"));
        assert!(!name_matches_prefix(None, ""));
    }
}
