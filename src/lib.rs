//! OnePutt bridge library
//! Connects a OnePutt putting sensor over Bluetooth LE and turns its
//! notifications into validated shots for a shot-tracking application.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod utils;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::bluetooth::{SimulatedDevice, SimulatedRssiScanner, SimulatedScanner};
use crate::core::{ControllerHandle, DeviceEvent, PuttingDeviceController};

/// A controller wired to a backend, not yet running
pub struct Bridge {
    pub controller: PuttingDeviceController,
    pub handle: ControllerHandle,
    /// Drives the simulated sensor, if any
    pub demo: Option<JoinHandle<()>>,
}

/// Builds a controller on top of the simulated sensor.
/// The demo task stops when `token` is cancelled.
pub fn simulated_bridge(
    config: &AppConfig,
    events: mpsc::UnboundedSender<DeviceEvent>,
    token: CancellationToken,
) -> Bridge {
    let class = config.device.device_class();
    let name = format!("{}0001", class.name_prefix);
    let device = SimulatedDevice::one_putt(&name);
    let demo = device.spawn_demo(token);

    let scanner = Arc::new(SimulatedScanner::new(vec![(device, -57)]));
    let (controller, handle) = PuttingDeviceController::new(
        class,
        scanner,
        Arc::new(SimulatedRssiScanner::new()),
        events,
    );
    Bridge {
        controller: controller
            .with_rssi_interval(config.device.rssi_interval())
            .with_club(config.device.default_club.clone()),
        handle,
        demo: Some(demo),
    }
}

/// Builds a controller on top of the platform Bluetooth adapter
#[cfg(feature = "bluetooth")]
pub async fn bluetooth_bridge(
    config: &AppConfig,
    events: mpsc::UnboundedSender<DeviceEvent>,
) -> Result<Bridge> {
    use crate::core::bluetooth::{BleError, BluestRssiScanner, BluestScanner};

    let adapter = bluest::Adapter::default()
        .await
        .ok_or(BleError::AdapterUnavailable)?;
    adapter.wait_available().await?;
    log::info!("Bluetooth adapter is available.");

    let scanner = Arc::new(BluestScanner::new(
        adapter.clone(),
        config.device.scan_timeout(),
    ));
    let (controller, handle) = PuttingDeviceController::new(
        config.device.device_class(),
        scanner,
        Arc::new(BluestRssiScanner::new(adapter)),
        events,
    );
    Ok(Bridge {
        controller: controller
            .with_rssi_interval(config.device.rssi_interval())
            .with_club(config.device.default_club.clone()),
        handle,
        demo: None,
    })
}

#[cfg(not(feature = "bluetooth"))]
pub async fn bluetooth_bridge(
    _config: &AppConfig,
    _events: mpsc::UnboundedSender<DeviceEvent>,
) -> Result<Bridge> {
    anyhow::bail!("Built without the `bluetooth` feature; rebuild with it or use --simulate")
}
