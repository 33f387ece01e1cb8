//! Service binding
//! Runs discovery, one-shot reads and notification subscriptions for a single
//! GATT service and reports decoded values to the owning session.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::select_all;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::bluetooth::codec::{self, Reading};
use crate::core::bluetooth::device::GattDevice;
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::session::SessionInput;
use crate::core::bluetooth::types::ServiceDescriptor;

/// What a binding reports to its session
#[derive(Debug, Clone)]
pub enum BindingEvent {
    /// A decoded notification or read result
    Value {
        service: Uuid,
        characteristic: Uuid,
        reading: Reading,
        raw: Vec<u8>,
    },
    /// Data arrived for a characteristic the descriptor does not list
    Unrecognized {
        service: Uuid,
        characteristic: Uuid,
        raw: Vec<u8>,
    },
    /// Reads issued and every notification enabled
    Ready { service: Uuid },
    DiscoveryFailed { service: Uuid, error: BleError },
}

/// A live binding of one service descriptor to a device
pub struct ServiceBinding {
    descriptor: &'static ServiceDescriptor,
    ready: bool,
    task: JoinHandle<()>,
}

impl ServiceBinding {
    /// Starts discovery in the background and returns immediately
    pub fn bind(
        device: Arc<dyn GattDevice>,
        descriptor: &'static ServiceDescriptor,
        inbox: mpsc::UnboundedSender<SessionInput>,
    ) -> Self {
        let task = tokio::spawn(run_binding(device, descriptor, inbox));
        Self {
            descriptor,
            ready: false,
            task,
        }
    }

    pub fn service(&self) -> Uuid {
        self.descriptor.uuid
    }

    pub fn gates_readiness(&self) -> bool {
        self.descriptor.gates_readiness
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub(crate) fn mark_ready(&mut self) {
        self.ready = true;
    }

    /// Stops discovery and notification delivery
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for ServiceBinding {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_binding(
    device: Arc<dyn GattDevice>,
    descriptor: &'static ServiceDescriptor,
    inbox: mpsc::UnboundedSender<SessionInput>,
) {
    let service = descriptor.uuid;
    let wanted: Vec<Uuid> = descriptor
        .read_once
        .iter()
        .chain(descriptor.notify.iter())
        .map(|spec| spec.uuid)
        .collect();

    debug!("Discovering service {}", service);
    if let Err(e) = device.discover(service, &wanted).await {
        report(&inbox, discovery_failed(service, e.to_string()));
        return;
    }

    for spec in descriptor.read_once {
        match device.read(service, spec.uuid).await {
            Ok(raw) => {
                if let Some(event) = classify(descriptor, spec.uuid, raw) {
                    report(&inbox, event);
                }
            }
            Err(e) => warn!("Reading {} from service {} failed: {}", spec.kind, service, e),
        }
    }

    let mut streams = Vec::with_capacity(descriptor.notify.len());
    for spec in descriptor.notify {
        let characteristic = spec.uuid;
        match device.subscribe(service, characteristic).await {
            Ok(stream) => streams.push(stream.map(move |item| (characteristic, item))),
            Err(e) => {
                let reason = format!("enabling notifications on {} failed: {}", characteristic, e);
                report(&inbox, discovery_failed(service, reason));
                return;
            }
        }
    }

    info!("Service {} ready", service);
    if !report(&inbox, BindingEvent::Ready { service }) {
        return;
    }
    if streams.is_empty() {
        return;
    }

    let mut notifications = select_all(streams);
    while let Some((characteristic, item)) = notifications.next().await {
        match item {
            Ok(raw) => {
                if let Some(event) = classify(descriptor, characteristic, raw) {
                    if !report(&inbox, event) {
                        break;
                    }
                }
            }
            Err(e) => warn!("Error in notification stream of {}: {}", characteristic, e),
        }
    }
    debug!("Notification streams of service {} ended", service);
}

fn discovery_failed(service: Uuid, reason: String) -> BindingEvent {
    BindingEvent::DiscoveryFailed {
        service,
        error: BleError::ServiceDiscoveryFailed { service, reason },
    }
}

/// Returns `false` once the session has gone away
fn report(inbox: &mpsc::UnboundedSender<SessionInput>, event: BindingEvent) -> bool {
    inbox.send(SessionInput::Binding(event)).is_ok()
}

/// Decodes a payload for `characteristic`; malformed payloads are logged and dropped.
pub(crate) fn classify(
    descriptor: &ServiceDescriptor,
    characteristic: Uuid,
    raw: Vec<u8>,
) -> Option<BindingEvent> {
    let service = descriptor.uuid;
    let Some(spec) = descriptor.characteristic(characteristic) else {
        return Some(BindingEvent::Unrecognized {
            service,
            characteristic,
            raw,
        });
    };

    debug!(
        "<---- ({}) Received data for characteristic {}: {}",
        spec.kind,
        characteristic,
        codec::hex_string(&raw)
    );
    match codec::decode(spec.kind, &raw) {
        Ok(reading) => Some(BindingEvent::Value {
            service,
            characteristic,
            reading,
            raw,
        }),
        Err(e) => {
            warn!("Dropping notification from {}: {}", characteristic, e);
            None
        }
    }
}
