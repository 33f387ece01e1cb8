//! Bluetooth device abstraction and device class definitions
//!
//! A session never talks to a platform Bluetooth API directly. It goes through
//! [`GattDevice`], which is implemented by the `bluest` backend and by the
//! simulator. A [`DeviceClass`] describes everything that differs between
//! putting sensors, so supporting a new sensor is a matter of data.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use uuid::Uuid;

use crate::core::ball_data::PuttType;
use crate::core::bluetooth::constants::{
    HEARTBEAT_INTERVAL, MAX_SHOT_SPEED, MIN_SHOT_SPEED, ONEPUTT_HEARTBEAT_INTERVAL,
    ONEPUTT_NAME_PREFIX, ONEPUTT_START_MESSAGE, SPEED_SCALE, UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE,
    UUID_DEVICE_INFO_SERVICE, UUID_FIRMWARE_VERSION, UUID_MEASUREMENT, UUID_MEASUREMENT_SERVICE,
    UUID_MODEL, UUID_READY_STATUS, UUID_SERIAL_NUMBER,
};
use crate::core::bluetooth::error::BleResult;
use crate::core::bluetooth::types::{CharacteristicKind, CharacteristicSpec, ServiceDescriptor};

/// Stream of raw notification payloads for one characteristic
pub type NotificationStream = BoxStream<'static, BleResult<Vec<u8>>>;

/// GATT client operations needed by a device session
#[async_trait]
pub trait GattDevice: Send + Sync {
    /// Platform-specific identifier
    fn id(&self) -> String;

    /// Advertised name, if known
    fn name(&self) -> Option<String>;

    /// Establishes the link
    async fn connect(&self) -> BleResult<()>;

    /// Tears the link down; succeeds if it is already down
    async fn disconnect(&self) -> BleResult<()>;

    /// Discovers `service` and the listed characteristics on it
    async fn discover(&self, service: Uuid, characteristics: &[Uuid]) -> BleResult<()>;

    /// Reads a characteristic of a discovered service
    async fn read(&self, service: Uuid, characteristic: Uuid) -> BleResult<Vec<u8>>;

    /// Enables notifications and returns the payload stream
    async fn subscribe(&self, service: Uuid, characteristic: Uuid) -> BleResult<NotificationStream>;

    /// Resolves when the link drops
    async fn wait_for_disconnect(&self) -> BleResult<()>;
}

/// How a device class decides the link is still alive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    pub generic_interval: Duration,
    pub class_interval: Option<Duration>,
    /// Whether battery notifications count as activity
    pub battery_is_activity: bool,
}

impl HeartbeatPolicy {
    pub fn interval(&self) -> Duration {
        self.class_interval.unwrap_or(self.generic_interval)
    }
}

/// Validation and conversion applied to decoded shots
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotRule {
    pub min_speed: f32,
    pub max_speed: f32,
    pub speed_scale: f64,
    pub putt_type: PuttType,
}

impl ShotRule {
    pub fn is_plausible(&self, speed: f32) -> bool {
        (self.min_speed..=self.max_speed).contains(&speed)
    }
}

/// Everything the session engine needs to know about one kind of sensor
#[derive(Debug, Clone)]
pub struct DeviceClass {
    pub name: &'static str,
    pub name_prefix: String,
    /// Hint shown when a scan finds nothing
    pub start_message: &'static str,
    pub services: &'static [ServiceDescriptor],
    pub heartbeat: HeartbeatPolicy,
    pub shot_rule: ShotRule,
}

impl DeviceClass {
    /// The OnePutt sensor
    pub fn one_putt() -> Self {
        Self {
            name: "OnePutt",
            name_prefix: ONEPUTT_NAME_PREFIX.to_string(),
            start_message: ONEPUTT_START_MESSAGE,
            services: &ONEPUTT_SERVICES,
            heartbeat: HeartbeatPolicy {
                generic_interval: HEARTBEAT_INTERVAL,
                class_interval: Some(ONEPUTT_HEARTBEAT_INTERVAL),
                battery_is_activity: true,
            },
            shot_rule: ShotRule {
                min_speed: MIN_SHOT_SPEED,
                max_speed: MAX_SHOT_SPEED,
                speed_scale: SPEED_SCALE,
                putt_type: PuttType::OnePutt,
            },
        }
    }

    /// Replaces the class heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat.class_interval = Some(interval);
        self
    }

    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }
}

static ONEPUTT_DEVICE_INFO_READS: [CharacteristicSpec; 3] = [
    CharacteristicSpec {
        uuid: UUID_SERIAL_NUMBER,
        kind: CharacteristicKind::SerialNumber,
    },
    CharacteristicSpec {
        uuid: UUID_FIRMWARE_VERSION,
        kind: CharacteristicKind::FirmwareVersion,
    },
    CharacteristicSpec {
        uuid: UUID_MODEL,
        kind: CharacteristicKind::Model,
    },
];

static ONEPUTT_BATTERY_NOTIFY: [CharacteristicSpec; 1] = [CharacteristicSpec {
    uuid: UUID_BATTERY_LEVEL,
    kind: CharacteristicKind::BatteryLevel,
}];

static ONEPUTT_MEASUREMENT_NOTIFY: [CharacteristicSpec; 2] = [
    CharacteristicSpec {
        uuid: UUID_MEASUREMENT,
        kind: CharacteristicKind::Measurement,
    },
    CharacteristicSpec {
        uuid: UUID_READY_STATUS,
        kind: CharacteristicKind::ReadyStatus,
    },
];

/// Device information is best effort; battery and measurement gate readiness.
pub static ONEPUTT_SERVICES: [ServiceDescriptor; 3] = [
    ServiceDescriptor {
        uuid: UUID_DEVICE_INFO_SERVICE,
        notify: &[],
        read_once: &ONEPUTT_DEVICE_INFO_READS,
        gates_readiness: false,
    },
    ServiceDescriptor {
        uuid: UUID_BATTERY_SERVICE,
        notify: &ONEPUTT_BATTERY_NOTIFY,
        read_once: &[],
        gates_readiness: true,
    },
    ServiceDescriptor {
        uuid: UUID_MEASUREMENT_SERVICE,
        notify: &ONEPUTT_MEASUREMENT_NOTIFY,
        read_once: &[],
        gates_readiness: true,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oneputt_heartbeat_uses_class_override() {
        let class = DeviceClass::one_putt();
        assert_eq!(class.heartbeat.interval(), Duration::from_secs(20));
        assert_eq!(class.heartbeat.generic_interval, Duration::from_secs(2));

        let generic = HeartbeatPolicy {
            class_interval: None,
            ..class.heartbeat
        };
        assert_eq!(generic.interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_plausibility_band_is_inclusive() {
        let rule = DeviceClass::one_putt().shot_rule;
        assert!(rule.is_plausible(200.0));
        assert!(rule.is_plausible(15000.0));
        assert!(!rule.is_plausible(199.9));
        assert!(!rule.is_plausible(15000.5));
        assert!(!rule.is_plausible(f32::NAN));
    }

    #[test]
    fn test_oneputt_topology() {
        let class = DeviceClass::one_putt();
        let gating: Vec<Uuid> = class
            .services
            .iter()
            .filter(|s| s.gates_readiness)
            .map(|s| s.uuid)
            .collect();
        assert_eq!(gating, vec![UUID_BATTERY_SERVICE, UUID_MEASUREMENT_SERVICE]);

        let info = &class.services[0];
        let order: Vec<Uuid> = info.read_once.iter().map(|c| c.uuid).collect();
        assert_eq!(
            order,
            vec![UUID_SERIAL_NUMBER, UUID_FIRMWARE_VERSION, UUID_MODEL]
        );
        assert_eq!(
            class.services[2].characteristic(UUID_READY_STATUS).map(|c| c.kind),
            Some(CharacteristicKind::ReadyStatus)
        );
    }
}
