//! Device discovery
//! Scanners look for a sensor by advertised name prefix and report what they
//! find through [`ScannerEvent`]s.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc;

use crate::core::bluetooth::device::GattDevice;
use crate::core::bluetooth::error::BleResult;
use crate::core::bluetooth::types::BluetoothDevice;

/// A device a scanner matched, ready to be handed to a session
#[derive(Clone)]
pub struct FoundDevice {
    pub info: BluetoothDevice,
    pub device: Arc<dyn GattDevice>,
}

impl std::fmt::Debug for FoundDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FoundDevice")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// What background scans report to the controller
#[derive(Debug, Clone)]
pub enum ScannerEvent {
    DeviceFound(FoundDevice),
    DeviceNotFound,
    StatusUpdate(String),
    Error(String),
    Rssi(i16),
}

/// Sends a scanner event; a gone receiver means the scan was abandoned.
pub fn report(events: &mpsc::UnboundedSender<ScannerEvent>, event: ScannerEvent) {
    if let Err(e) = events.send(event) {
        debug!("Scanner event dropped, nobody is listening: {:?}", e.0);
    }
}

/// Finds the first device whose name starts with a prefix
#[async_trait]
pub trait DeviceScanner: Send + Sync {
    /// Scans until a match is found, the scan times out or [`cancel`](Self::cancel) is called.
    /// Ends with exactly one `DeviceFound` or `DeviceNotFound` unless cancelled or failed.
    async fn scan(&self, prefix: &str, events: mpsc::UnboundedSender<ScannerEvent>) -> BleResult<()>;

    fn cancel(&self);
}

/// Reads the signal strength of an advertising device, for display only
#[async_trait]
pub trait RssiScanner: Send + Sync {
    async fn scan(&self, prefix: &str) -> BleResult<Option<i16>>;
}

#[cfg(feature = "bluetooth")]
pub use self::bluest_scanner::{BluestRssiScanner, BluestScanner};

#[cfg(feature = "bluetooth")]
mod bluest_scanner {
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    use async_trait::async_trait;
    use bluest::{Adapter, Device};
    use futures_util::StreamExt;
    use log::{debug, info};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::{DeviceScanner, FoundDevice, RssiScanner, ScannerEvent, report};
    use crate::core::bluetooth::connection::{BluestDevice, transport};
    use crate::core::bluetooth::error::BleResult;
    use crate::core::bluetooth::types::{BluetoothDevice, name_matches_prefix};

    const RSSI_SCAN_WINDOW: Duration = Duration::from_secs(3);

    pub struct BluestScanner {
        adapter: Adapter,
        scan_duration: Duration,
        cancel_token: Mutex<CancellationToken>,
    }

    impl BluestScanner {
        pub fn new(adapter: Adapter, scan_duration: Duration) -> Self {
            Self {
                adapter,
                scan_duration,
                cancel_token: Mutex::new(CancellationToken::new()),
            }
        }

        fn fresh_token(&self) -> CancellationToken {
            let mut token = self
                .cancel_token
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *token = CancellationToken::new();
            token.clone()
        }

        async fn found(&self, device: Device, name: String, rssi: Option<i16>) -> FoundDevice {
            let rssi = match rssi {
                Some(rssi) => Some(rssi),
                None => device.rssi().await.ok(),
            };
            let info = BluetoothDevice::new(device.id().to_string(), Some(name), rssi);
            info!(
                "Found putting device: Address: {}, ID: {}, Name: {:?}, RSSI: {:?}",
                info.address, info.id, info.name, info.rssi
            );
            FoundDevice {
                info,
                device: Arc::new(BluestDevice::new(self.adapter.clone(), device)),
            }
        }
    }

    #[async_trait]
    impl DeviceScanner for BluestScanner {
        async fn scan(
            &self,
            prefix: &str,
            events: mpsc::UnboundedSender<ScannerEvent>,
        ) -> BleResult<()> {
            let cancel_token = self.fresh_token();
            self.adapter.wait_available().await.map_err(transport)?;

            // A sensor still bonded from an earlier run does not advertise.
            info!("Checking for connected devices");
            for device in self.adapter.connected_devices().await.map_err(transport)? {
                if let Ok(name) = device.name() {
                    if name_matches_prefix(Some(&name), prefix) {
                        let found = self.found(device, name, None).await;
                        report(&events, ScannerEvent::DeviceFound(found));
                        return Ok(());
                    }
                }
            }

            report(
                &events,
                ScannerEvent::StatusUpdate(format!(
                    "Scanning for devices starting with '{}'",
                    prefix
                )),
            );
            info!("Starting bluetooth scan");
            let mut scan_stream = self.adapter.scan(&[]).await.map_err(transport)?;
            let deadline = tokio::time::sleep(self.scan_duration);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    result = scan_stream.next() => {
                        let Some(discovered) = result else {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        };
                        let name = discovered
                            .adv_data
                            .local_name
                            .clone()
                            .or_else(|| discovered.device.name().ok());
                        debug!("Found device - Device: {:?}, RSSI: {:?}", discovered.device, discovered.rssi);
                        if let Some(name) = name.filter(|n| name_matches_prefix(Some(n), prefix)) {
                            let found = self.found(discovered.device, name, discovered.rssi).await;
                            report(&events, ScannerEvent::DeviceFound(found));
                            return Ok(());
                        }
                    }
                    _ = &mut deadline => break,
                    _ = cancel_token.cancelled() => {
                        info!("Bluetooth scan cancelled");
                        return Ok(());
                    }
                }
            }

            report(&events, ScannerEvent::DeviceNotFound);
            Ok(())
        }

        fn cancel(&self) {
            info!("Stopping Bluetooth scan.");
            self.cancel_token
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .cancel();
        }
    }

    pub struct BluestRssiScanner {
        adapter: Adapter,
    }

    impl BluestRssiScanner {
        pub fn new(adapter: Adapter) -> Self {
            Self { adapter }
        }
    }

    #[async_trait]
    impl RssiScanner for BluestRssiScanner {
        async fn scan(&self, prefix: &str) -> BleResult<Option<i16>> {
            for device in self.adapter.connected_devices().await.map_err(transport)? {
                if name_matches_prefix(device.name().ok().as_deref(), prefix) {
                    match device.rssi().await {
                        Ok(rssi) => return Ok(Some(rssi)),
                        Err(e) => debug!("RSSI of connected device unavailable: {}", e),
                    }
                }
            }

            let mut scan_stream = self.adapter.scan(&[]).await.map_err(transport)?;
            let window = tokio::time::timeout(RSSI_SCAN_WINDOW, async {
                while let Some(discovered) = scan_stream.next().await {
                    let matches =
                        name_matches_prefix(discovered.adv_data.local_name.as_deref(), prefix);
                    if matches && discovered.rssi.is_some() {
                        return discovered.rssi;
                    }
                }
                None
            })
            .await;
            match window {
                Ok(rssi) => Ok(rssi),
                Err(_) => {
                    debug!("No RSSI reading within {}s", RSSI_SCAN_WINDOW.as_secs());
                    Ok(None)
                }
            }
        }
    }
}
