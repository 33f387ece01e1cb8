//! Constants used throughout the application
//! This module contains the constant values of the OnePutt device class,
//! such as UUIDs, timeouts, and shot validation limits.

use std::time::Duration;

use uuid::Uuid;

/// Advertised name prefix of OnePutt sensors
pub const ONEPUTT_NAME_PREFIX: &str = "OnePutt-";

/// Shown to the user when a scan comes back empty
pub const ONEPUTT_START_MESSAGE: &str =
    "Before starting Bluetooth connection ensure your OnePutt is turned on.";

/// OnePutt device information service and its read-once characteristics
pub const UUID_DEVICE_INFO_SERVICE: Uuid = Uuid::from_u128(0x84d32310_fc87_44bd_a97a_fe7116f7ee7a);
pub const UUID_FIRMWARE_VERSION: Uuid = Uuid::from_u128(0x84d32311_fc87_44bd_a97a_fe7116f7ee7a);
pub const UUID_MODEL: Uuid = Uuid::from_u128(0x84d32312_fc87_44bd_a97a_fe7116f7ee7a);
pub const UUID_SERIAL_NUMBER: Uuid = Uuid::from_u128(0x84d32313_fc87_44bd_a97a_fe7116f7ee7a);

/// OnePutt battery service
pub const UUID_BATTERY_SERVICE: Uuid = Uuid::from_u128(0x5bc7050a_9607_4cf4_bbd5_e9017ba8a580);
pub const UUID_BATTERY_LEVEL: Uuid = Uuid::from_u128(0x5bc7050b_9607_4cf4_bbd5_e9017ba8a580);

/// OnePutt measurement service
pub const UUID_MEASUREMENT_SERVICE: Uuid = Uuid::from_u128(0x99c8887f_c000_45b2_aa71_60a482a5c19a);
pub const UUID_MEASUREMENT: Uuid = Uuid::from_u128(0x99c88872_c000_45b2_aa71_60a482a5c19a);
pub const UUID_READY_STATUS: Uuid = Uuid::from_u128(0x99c88873_c000_45b2_aa71_60a482a5c19a);

/// Heartbeat interval used by device classes without an override
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(2000);

/// OnePutt measurement traffic is bursty, so it gets a longer heartbeat
pub const ONEPUTT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(20000);

/// Interval between RSSI readings once a device is connected
pub const RSSI_SCAN_INTERVAL: Duration = Duration::from_millis(5000);

/// Scan duration in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 10;

/// Lowest plausible raw shot speed, anything slower is transmission noise
pub const MIN_SHOT_SPEED: f32 = 200.0;

/// Highest plausible raw shot speed
pub const MAX_SHOT_SPEED: f32 = 15000.0;

/// Converts raw OnePutt speed units to miles per hour
pub const SPEED_SCALE: f64 = 0.00223694;

/// Club code of the putter; selecting it resumes shot forwarding
pub const PUTTER_CLUB: &str = "PT";

/// Battery levels above this are a sentinel for "unknown"
pub const MAX_BATTERY_LEVEL: u16 = 100;

/// Measurement payload size in bytes
pub const MEASUREMENT_PACKET_SIZE: usize = 22;
