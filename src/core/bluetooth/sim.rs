//! Simulated OnePutt sensor
//! In-memory GATT device and scanners used by `--simulate` and by the tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use log::{debug, info};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::codec::{ShotRecord, encode_measurement};
use crate::core::bluetooth::constants::{
    UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE, UUID_DEVICE_INFO_SERVICE, UUID_FIRMWARE_VERSION,
    UUID_MEASUREMENT, UUID_MEASUREMENT_SERVICE, UUID_MODEL, UUID_READY_STATUS, UUID_SERIAL_NUMBER,
};
use crate::core::bluetooth::device::{GattDevice, NotificationStream};
use crate::core::bluetooth::error::{BleError, BleResult};
use crate::core::bluetooth::scanner::{
    DeviceScanner, FoundDevice, RssiScanner, ScannerEvent, report,
};
use crate::core::bluetooth::types::{BluetoothDevice, name_matches_prefix};

/// A call the simulated device received, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    Connect,
    Disconnect,
    Discover(Uuid),
    Read(Uuid),
    Subscribe(Uuid),
}

type Subscriber = mpsc::UnboundedSender<BleResult<Vec<u8>>>;

#[derive(Default)]
struct SimState {
    /// service -> characteristics
    services: HashMap<Uuid, Vec<Uuid>>,
    values: HashMap<Uuid, Vec<u8>>,
    subscribers: HashMap<Uuid, Vec<Subscriber>>,
    calls: Vec<SimCall>,
    refuse_connect: bool,
}

pub struct SimulatedDevice {
    id: String,
    name: String,
    state: Mutex<SimState>,
    link: watch::Sender<bool>,
}

impl SimulatedDevice {
    /// A device exposing the OnePutt GATT topology
    pub fn one_putt(name: &str) -> Arc<Self> {
        let suffix = name.rsplit('-').next().unwrap_or(name);
        let mut state = SimState::default();
        state.services.insert(
            UUID_DEVICE_INFO_SERVICE,
            vec![UUID_SERIAL_NUMBER, UUID_FIRMWARE_VERSION, UUID_MODEL],
        );
        state
            .services
            .insert(UUID_BATTERY_SERVICE, vec![UUID_BATTERY_LEVEL]);
        state.services.insert(
            UUID_MEASUREMENT_SERVICE,
            vec![UUID_MEASUREMENT, UUID_READY_STATUS],
        );
        state.values.insert(
            UUID_SERIAL_NUMBER,
            format!("OP-{:0>6}", suffix).into_bytes(),
        );
        state
            .values
            .insert(UUID_FIRMWARE_VERSION, b"1.4.2".to_vec());
        state.values.insert(UUID_MODEL, b"OnePutt".to_vec());

        let (link, _) = watch::channel(false);
        Arc::new(Self {
            id: format!("sim/dev_{}", name.replace('-', "_")),
            name: name.to_string(),
            state: Mutex::new(state),
            link,
        })
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: SimCall) {
        self.state().calls.push(call);
    }

    /// Every call received so far
    pub fn calls(&self) -> Vec<SimCall> {
        self.state().calls.clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.link.borrow()
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state().refuse_connect = refuse;
    }

    /// Makes discovery of `service` fail from now on
    pub fn remove_service(&self, service: Uuid) {
        self.state().services.remove(&service);
    }

    /// Pushes a notification. Returns `false` when nobody is subscribed.
    pub fn notify(&self, characteristic: Uuid, payload: Vec<u8>) -> bool {
        let mut state = self.state();
        state.values.insert(characteristic, payload.clone());
        let Some(subscribers) = state.subscribers.get_mut(&characteristic) else {
            return false;
        };
        subscribers.retain(|tx| tx.send(Ok(payload.clone())).is_ok());
        !subscribers.is_empty()
    }

    /// Drops the link as if the sensor went out of range
    pub fn drop_link(&self) {
        info!("Simulated link to {} dropped", self.name);
        self.state().subscribers.clear();
        self.link.send_replace(false);
    }

    /// Plays a putting session: battery reports, readiness flips and a putt every few seconds.
    pub fn spawn_demo(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let device = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(4));
            let mut sequence: u16 = 0;
            let mut battery: u16 = 96;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if !device.is_connected() {
                    continue;
                }

                sequence = sequence.wrapping_add(1);
                device.notify(UUID_READY_STATUS, vec![0x01]);
                let shot = demo_shot(sequence);
                debug!("Simulated putt {} at {}", sequence, shot.speed);
                device.notify(UUID_MEASUREMENT, encode_measurement(&shot));
                device.notify(UUID_READY_STATUS, vec![0x00]);

                if sequence % 3 == 0 {
                    battery = battery.saturating_sub(1);
                    device.notify(UUID_BATTERY_LEVEL, battery.to_le_bytes().to_vec());
                }
            }
        })
    }
}

/// Deterministic spread of putts between roughly 3 and 12 mph
fn demo_shot(sequence: u16) -> ShotRecord {
    let step = f32::from(sequence % 9);
    ShotRecord {
        sequence,
        speed: 1400.0 + step * 450.0,
        vla: 1.5 + step * 0.25,
        hla: (step - 4.0) * 0.4,
        max_launch_angle: 3.0 + step * 0.3,
        min_launch_angle: 0.5,
    }
}

#[async_trait]
impl GattDevice for SimulatedDevice {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn name(&self) -> Option<String> {
        Some(self.name.clone())
    }

    async fn connect(&self) -> BleResult<()> {
        let refuse = {
            let mut state = self.state();
            state.calls.push(SimCall::Connect);
            state.refuse_connect
        };
        if refuse {
            return Err(BleError::Transport("connection refused".to_string()));
        }
        self.link.send_replace(true);
        Ok(())
    }

    async fn disconnect(&self) -> BleResult<()> {
        {
            let mut state = self.state();
            state.calls.push(SimCall::Disconnect);
            state.subscribers.clear();
        }
        self.link.send_replace(false);
        Ok(())
    }

    async fn discover(&self, service: Uuid, characteristics: &[Uuid]) -> BleResult<()> {
        let mut state = self.state();
        state.calls.push(SimCall::Discover(service));
        let Some(available) = state.services.get(&service) else {
            return Err(BleError::Transport(format!("service {} not found", service)));
        };
        match characteristics.iter().find(|c| !available.contains(c)) {
            Some(missing) => Err(BleError::Transport(format!(
                "characteristic {} not found",
                missing
            ))),
            None => Ok(()),
        }
    }

    async fn read(&self, _service: Uuid, characteristic: Uuid) -> BleResult<Vec<u8>> {
        let mut state = self.state();
        state.calls.push(SimCall::Read(characteristic));
        state
            .values
            .get(&characteristic)
            .cloned()
            .ok_or_else(|| BleError::Transport(format!("{} is not readable", characteristic)))
    }

    async fn subscribe(&self, _service: Uuid, characteristic: Uuid) -> BleResult<NotificationStream> {
        self.record(SimCall::Subscribe(characteristic));
        if !self.is_connected() {
            return Err(BleError::Transport("not connected".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.state()
            .subscribers
            .entry(characteristic)
            .or_default()
            .push(tx);
        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }

    async fn wait_for_disconnect(&self) -> BleResult<()> {
        let mut link = self.link.subscribe();
        link.wait_for(|up| !*up)
            .await
            .map(|_| ())
            .map_err(|_| BleError::Transport("link watcher closed".to_string()))
    }
}

/// Scanner over a fixed set of simulated devices
pub struct SimulatedScanner {
    devices: Vec<(Arc<SimulatedDevice>, i16)>,
    token: Mutex<CancellationToken>,
    scan_time: Duration,
}

impl SimulatedScanner {
    pub fn new(devices: Vec<(Arc<SimulatedDevice>, i16)>) -> Self {
        Self {
            devices,
            token: Mutex::new(CancellationToken::new()),
            scan_time: Duration::from_millis(500),
        }
    }

    fn fresh_token(&self) -> CancellationToken {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        *token = CancellationToken::new();
        token.clone()
    }
}

#[async_trait]
impl DeviceScanner for SimulatedScanner {
    async fn scan(&self, prefix: &str, events: mpsc::UnboundedSender<ScannerEvent>) -> BleResult<()> {
        let token = self.fresh_token();
        report(
            &events,
            ScannerEvent::StatusUpdate(format!(
                "Scanning for devices starting with '{}'",
                prefix
            )),
        );

        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = tokio::time::sleep(self.scan_time) => {}
        }

        let found = self.devices.iter().find(|(device, _)| {
            name_matches_prefix(GattDevice::name(device.as_ref()).as_deref(), prefix)
        });
        let event = match found {
            Some((device, rssi)) => {
                let info = BluetoothDevice::new(
                    GattDevice::id(device.as_ref()),
                    GattDevice::name(device.as_ref()),
                    Some(*rssi),
                );
                ScannerEvent::DeviceFound(FoundDevice {
                    info,
                    device: device.clone(),
                })
            }
            None => ScannerEvent::DeviceNotFound,
        };
        report(&events, event);
        Ok(())
    }

    fn cancel(&self) {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }
}

/// Reports a slowly drifting signal strength
pub struct SimulatedRssiScanner {
    readings: Mutex<u32>,
}

impl SimulatedRssiScanner {
    pub fn new() -> Self {
        Self {
            readings: Mutex::new(0),
        }
    }
}

impl Default for SimulatedRssiScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RssiScanner for SimulatedRssiScanner {
    async fn scan(&self, _prefix: &str) -> BleResult<Option<i16>> {
        let mut readings = self.readings.lock().unwrap_or_else(PoisonError::into_inner);
        *readings += 1;
        let drift = i16::try_from(*readings % 7).unwrap_or(0);
        Ok(Some(-58 - drift))
    }
}
