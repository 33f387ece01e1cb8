//! `bluest` implementation of [`GattDevice`]
//! Connects, discovers services and caches the characteristics of one platform device.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, ConnectionEvent, Device};
use futures_util::StreamExt;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::core::bluetooth::device::{GattDevice, NotificationStream};
use crate::core::bluetooth::error::{BleError, BleResult};
use crate::core::bluetooth::notification::owned_notifications;

pub(crate) fn transport(e: bluest::Error) -> BleError {
    BleError::Transport(e.to_string())
}

/// A platform device plus the characteristics found on it so far
pub struct BluestDevice {
    adapter: Adapter,
    device: Device,
    /// service -> characteristic uuid -> handle
    characteristics: Mutex<HashMap<Uuid, HashMap<Uuid, Characteristic>>>,
}

impl BluestDevice {
    pub fn new(adapter: Adapter, device: Device) -> Self {
        Self {
            adapter,
            device,
            characteristics: Mutex::new(HashMap::new()),
        }
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<Uuid, HashMap<Uuid, Characteristic>>> {
        self.characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn characteristic(&self, service: Uuid, characteristic: Uuid) -> BleResult<Characteristic> {
        self.cache()
            .get(&service)
            .and_then(|chars| chars.get(&characteristic))
            .cloned()
            .ok_or_else(|| {
                BleError::Transport(format!(
                    "characteristic {} of service {} was not discovered",
                    characteristic, service
                ))
            })
    }
}

#[async_trait]
impl GattDevice for BluestDevice {
    fn id(&self) -> String {
        self.device.id().to_string()
    }

    fn name(&self) -> Option<String> {
        self.device.name().ok()
    }

    async fn connect(&self) -> BleResult<()> {
        if self.device.is_connected().await {
            info!("Device {} already connected", self.device.id());
            return Ok(());
        }
        info!("Initiating connection to {}...", self.device.id());
        self.adapter
            .connect_device(&self.device)
            .await
            .map_err(transport)?;
        info!("Connection successful");
        Ok(())
    }

    async fn disconnect(&self) -> BleResult<()> {
        self.cache().clear();
        if self.device.is_connected().await {
            info!("Disconnecting from device {}", self.device.id());
            self.adapter
                .disconnect_device(&self.device)
                .await
                .map_err(transport)?;
            info!("Successfully disconnected");
        } else {
            debug!("Device {} not connected", self.device.id());
        }
        Ok(())
    }

    async fn discover(&self, service: Uuid, characteristics: &[Uuid]) -> BleResult<()> {
        let services = self
            .device
            .discover_services_with_uuid(service)
            .await
            .map_err(transport)?;
        let Some(found) = services.into_iter().find(|s| s.uuid() == service) else {
            return Err(BleError::Transport(format!("service {} not found", service)));
        };
        debug!("Found service: {}", found.uuid());

        let mut handles = HashMap::new();
        for ch in found.characteristics().await.map_err(transport)? {
            handles.insert(ch.uuid(), ch);
        }
        if let Some(missing) = characteristics.iter().find(|c| !handles.contains_key(c)) {
            for uuid in handles.keys() {
                debug!("Available characteristic: {}", uuid);
            }
            return Err(BleError::Transport(format!(
                "characteristic {} not found",
                missing
            )));
        }

        self.cache().insert(service, handles);
        Ok(())
    }

    async fn read(&self, service: Uuid, characteristic: Uuid) -> BleResult<Vec<u8>> {
        let handle = self.characteristic(service, characteristic)?;
        handle.read().await.map_err(transport)
    }

    async fn subscribe(&self, service: Uuid, characteristic: Uuid) -> BleResult<NotificationStream> {
        let handle = self.characteristic(service, characteristic)?;
        info!("Subscribing to notifications of {}...", characteristic);
        owned_notifications(handle).await
    }

    async fn wait_for_disconnect(&self) -> BleResult<()> {
        let mut events = self
            .adapter
            .device_connection_events(&self.device)
            .await
            .map_err(transport)?;
        while let Some(event) = events.next().await {
            if matches!(event, ConnectionEvent::Disconnected) {
                warn!("Device {} disconnected", self.device.id());
                return Ok(());
            }
        }
        Err(BleError::Transport(
            "connection event stream ended".to_string(),
        ))
    }
}
