use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::{
    DEFAULT_SCAN_DURATION_SECS, DeviceClass, ONEPUTT_NAME_PREFIX, PUTTER_CLUB, RSSI_SCAN_INTERVAL,
};

/// Putting sensor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Advertised name prefix to look for
    pub name_prefix: String,

    /// Overrides the device class heartbeat when set
    pub heartbeat_interval_secs: Option<u64>,

    pub scan_timeout_secs: u64,

    pub rssi_interval_secs: u64,

    /// Club attached to shots until one is selected
    pub default_club: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name_prefix: ONEPUTT_NAME_PREFIX.to_string(),
            heartbeat_interval_secs: None,
            scan_timeout_secs: DEFAULT_SCAN_DURATION_SECS,
            rssi_interval_secs: RSSI_SCAN_INTERVAL.as_secs(),
            default_club: PUTTER_CLUB.to_string(),
        }
    }
}

impl DeviceConfig {
    /// The OnePutt class with the overrides of this config applied
    pub fn device_class(&self) -> DeviceClass {
        let class = DeviceClass::one_putt().with_name_prefix(self.name_prefix.clone());
        match self.heartbeat_interval_secs {
            Some(secs) if secs > 0 => class.with_heartbeat_interval(Duration::from_secs(secs)),
            _ => class,
        }
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs.max(1))
    }

    pub fn rssi_interval(&self) -> Duration {
        Duration::from_secs(self.rssi_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_oneputt() {
        let config = DeviceConfig::default();
        let class = config.device_class();
        assert_eq!(class.name_prefix, "OnePutt-");
        assert_eq!(class.heartbeat.interval(), Duration::from_secs(20));
        assert_eq!(config.scan_timeout(), Duration::from_secs(10));
        assert_eq!(config.rssi_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_heartbeat_keeps_class_interval() {
        let config = DeviceConfig {
            heartbeat_interval_secs: Some(0),
            ..DeviceConfig::default()
        };
        assert_eq!(config.device_class().heartbeat.interval(), Duration::from_secs(20));
    }
}
