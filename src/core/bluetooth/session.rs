//! Device session
//! Turns one found device into a supervised connection: link lifecycle,
//! service bindings, heartbeat and shot deduplication.
//!
//! A session never runs on its own. The owner waits on [`DeviceSession::next_wake`]
//! and hands the result back to [`DeviceSession::handle_wake`], so all state changes
//! happen on the owner's event loop. Background tasks only do I/O and report
//! through the session inbox.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::core::ball_data::BallData;
use crate::core::bluetooth::codec::{Reading, ShotRecord};
use crate::core::bluetooth::device::{DeviceClass, GattDevice};
use crate::core::bluetooth::error::{BleError, BleResult};
use crate::core::bluetooth::heartbeat::HeartbeatWatchdog;
use crate::core::bluetooth::service::{BindingEvent, ServiceBinding};
use crate::core::bluetooth::types::{
    ConnectionPhase, DeviceIdentity, DeviceSessionState, ReadyState,
};
use crate::core::events::DeviceEvent;

/// Status kind of readiness updates
pub const READY_STATUS: &str = "ready_status";

/// Messages background tasks send to their session
#[derive(Debug)]
pub enum SessionInput {
    LinkUp,
    LinkFailed(BleError),
    LinkLost,
    Binding(BindingEvent),
}

/// Something the session has to react to; produced by [`DeviceSession::next_wake`]
#[derive(Debug)]
pub struct SessionWake(Wake);

#[derive(Debug)]
enum Wake {
    Input(SessionInput),
    HeartbeatDue,
}

pub struct DeviceSession {
    device: Arc<dyn GattDevice>,
    class: DeviceClass,
    identity: DeviceIdentity,
    state: DeviceSessionState,
    heartbeat: HeartbeatWatchdog,
    bindings: Vec<ServiceBinding>,
    link_tasks: Vec<JoinHandle<()>>,
    inbox_tx: mpsc::UnboundedSender<SessionInput>,
    inbox: mpsc::UnboundedReceiver<SessionInput>,
    events: VecDeque<DeviceEvent>,
}

impl DeviceSession {
    pub fn new(device: Arc<dyn GattDevice>, class: DeviceClass, club: impl Into<String>) -> Self {
        let identity = DeviceIdentity {
            id: device.id(),
            name: device.name(),
            name_prefix: class.name_prefix.clone(),
            ..DeviceIdentity::default()
        };
        let heartbeat = HeartbeatWatchdog::new(class.heartbeat.interval());
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        Self {
            device,
            class,
            identity,
            state: DeviceSessionState::new(club.into()),
            heartbeat,
            bindings: Vec::new(),
            link_tasks: Vec::new(),
            inbox_tx,
            inbox,
            events: VecDeque::new(),
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.state.phase
    }

    pub fn state(&self) -> &DeviceSessionState {
        &self.state
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn heartbeat(&self) -> &HeartbeatWatchdog {
        &self.heartbeat
    }

    /// Starts connecting in the background. Only valid while disconnected.
    pub fn connect(&mut self) -> BleResult<()> {
        if self.state.phase != ConnectionPhase::Disconnected {
            return Err(BleError::InvalidState {
                operation: "connect",
                phase: self.state.phase,
            });
        }

        info!(
            "Connecting to {} ({})",
            self.identity.display_name(),
            self.identity.id
        );
        self.state.phase = ConnectionPhase::Connecting;

        let device = self.device.clone();
        let inbox = self.inbox_tx.clone();
        self.link_tasks.push(tokio::spawn(async move {
            let input = match device.connect().await {
                Ok(()) => SessionInput::LinkUp,
                Err(e) => SessionInput::LinkFailed(e),
            };
            if inbox.send(input).is_err() {
                debug!("Session gone before the link attempt finished");
            }
        }));
        Ok(())
    }

    /// Tears the session down. Does nothing when already disconnected.
    pub async fn disconnect(&mut self) {
        if self.state.phase == ConnectionPhase::Disconnected {
            return;
        }

        self.cancel_tasks();
        self.heartbeat.disarm();
        // Anything still queued belongs to the old link.
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        self.inbox_tx = inbox_tx;
        self.inbox = inbox;

        self.identity.clear_metadata();
        self.state.watermark = 0;
        self.state.battery = None;
        self.state.ready = None;
        self.state.phase = ConnectionPhase::Disconnected;
        info!("Disconnecting from {}", self.identity.display_name());

        if let Err(e) = self.device.disconnect().await {
            warn!("Failed to close link to {}: {}", self.identity.display_name(), e);
        }
    }

    pub fn select_club(&mut self, club: &str) {
        debug!("Club selected: {}", club);
        self.state.selected_club = club.to_string();
    }

    /// Shots are still emitted while paused; holding them back is up to the consumer.
    pub fn pause(&mut self) {
        self.state.paused = true;
    }

    pub fn resume(&mut self) {
        self.state.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    /// Waits for the next inbox message or heartbeat expiry. Cancel safe.
    pub async fn next_wake(&mut self) -> SessionWake {
        let deadline = match self.state.phase {
            ConnectionPhase::Ready => self.heartbeat.deadline(),
            _ => None,
        };
        let inbox = &mut self.inbox;
        let wake = tokio::select! {
            Some(input) = inbox.recv() => Wake::Input(input),
            () = sleep_until(deadline) => Wake::HeartbeatDue,
        };
        SessionWake(wake)
    }

    pub fn handle_wake(&mut self, wake: SessionWake) {
        match wake.0 {
            Wake::Input(input) => self.handle_input(input),
            Wake::HeartbeatDue => self.check_heartbeat(Instant::now()),
        }
    }

    /// Removes and returns the events produced so far, oldest first
    pub fn take_events(&mut self) -> Vec<DeviceEvent> {
        self.events.drain(..).collect()
    }

    pub fn check_heartbeat(&mut self, now: Instant) {
        if self.state.phase != ConnectionPhase::Ready {
            return;
        }
        if self.heartbeat.poll_expired(now) {
            self.on_error(BleError::HeartbeatTimeout {
                device: self.identity.display_name().to_string(),
                interval: self.heartbeat.interval(),
            });
        }
    }

    fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::LinkUp => self.on_link_up(),
            SessionInput::LinkFailed(e) => {
                if self.state.phase == ConnectionPhase::Connecting {
                    self.on_error(BleError::ConnectionFailed {
                        device: self.identity.display_name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
            SessionInput::LinkLost => {
                if matches!(
                    self.state.phase,
                    ConnectionPhase::Connecting
                        | ConnectionPhase::DiscoveringServices
                        | ConnectionPhase::Ready
                ) {
                    self.on_error(BleError::LinkLost {
                        device: self.identity.display_name().to_string(),
                    });
                }
            }
            SessionInput::Binding(event) => self.on_binding_event(event),
        }
    }

    fn on_link_up(&mut self) {
        if self.state.phase != ConnectionPhase::Connecting {
            return;
        }
        info!("Link to {} established, discovering services...", self.identity.display_name());
        self.state.phase = ConnectionPhase::DiscoveringServices;

        let device = self.device.clone();
        let inbox = self.inbox_tx.clone();
        self.link_tasks.push(tokio::spawn(async move {
            match device.wait_for_disconnect().await {
                Ok(()) => {
                    if inbox.send(SessionInput::LinkLost).is_err() {
                        debug!("Link dropped after the session went away");
                    }
                }
                Err(e) => warn!("Link watcher stopped: {}", e),
            }
        }));

        self.bindings = self
            .class
            .services
            .iter()
            .map(|descriptor| ServiceBinding::bind(self.device.clone(), descriptor, self.inbox_tx.clone()))
            .collect();
    }

    fn on_binding_event(&mut self, event: BindingEvent) {
        match event {
            BindingEvent::Ready { service } => {
                if let Some(binding) = self.bindings.iter_mut().find(|b| b.service() == service) {
                    binding.mark_ready();
                }
                self.try_become_ready();
            }
            BindingEvent::DiscoveryFailed { service, error } => {
                let gating = self
                    .bindings
                    .iter()
                    .any(|b| b.service() == service && b.gates_readiness());
                if gating {
                    self.on_error(error);
                } else {
                    warn!("Optional service {} unavailable: {}", service, error);
                }
            }
            BindingEvent::Unrecognized {
                service,
                characteristic,
                ..
            } => {
                warn!(
                    "Unknown characteristic {} on service {}",
                    characteristic, service
                );
            }
            BindingEvent::Value { reading, .. } => {
                if matches!(
                    self.state.phase,
                    ConnectionPhase::DiscoveringServices | ConnectionPhase::Ready
                ) {
                    self.on_reading(reading, Instant::now());
                }
            }
        }
    }

    fn try_become_ready(&mut self) {
        if self.state.phase != ConnectionPhase::DiscoveringServices {
            return;
        }
        let all_ready = self
            .bindings
            .iter()
            .filter(|b| b.gates_readiness())
            .all(ServiceBinding::is_ready);
        if !all_ready {
            return;
        }

        self.state.phase = ConnectionPhase::Ready;
        self.heartbeat.arm(Instant::now());
        info!(
            "{} ready (heartbeat {}s)",
            self.identity.display_name(),
            self.heartbeat.interval().as_secs()
        );
        self.events
            .push_back(DeviceEvent::Connected("connected".to_string()));
    }

    fn on_reading(&mut self, reading: Reading, now: Instant) {
        match reading {
            Reading::Shot(shot) => self.on_shot(&shot, now),
            Reading::Battery(level) => {
                debug!("Battery level: {}", level);
                self.state.battery = Some(level);
                if self.class.heartbeat.battery_is_activity {
                    self.heartbeat.record_activity(now);
                }
                self.events.push_back(DeviceEvent::Battery(level));
            }
            Reading::Ready(ready) => self.on_ready_status(ready),
            Reading::SerialNumber(serial) => {
                info!("Serial number: {}", serial);
                self.identity.serial_number = Some(serial);
            }
            Reading::FirmwareVersion(version) => {
                info!("Firmware version: {}", version);
                self.identity.firmware_version = Some(version);
            }
            Reading::Model(model) => {
                info!("Model: {}", model);
                self.identity.model = Some(model);
            }
        }
    }

    fn on_ready_status(&mut self, ready: ReadyState) {
        self.state.ready = Some(ready);
        self.events
            .push_back(DeviceEvent::status(READY_STATUS, ready.label()));
    }

    fn on_shot(&mut self, shot: &ShotRecord, now: Instant) {
        let rule = self.class.shot_rule;
        if !rule.is_plausible(shot.speed) {
            debug!(
                "Ignoring shot {} with implausible speed {}",
                shot.sequence, shot.speed
            );
            return;
        }
        // 0 means the sensor restarted its counter
        if shot.sequence != 0 && shot.sequence <= self.state.watermark {
            debug!(
                "Ignoring stale shot {} (last accepted {})",
                shot.sequence, self.state.watermark
            );
            return;
        }

        self.state.watermark = shot.sequence;
        let ball = BallData::from_shot(shot, rule.speed_scale, rule.putt_type, &self.state.selected_club);
        info!(
            "Shot {}: speed {} hla {} vla {} club {}",
            shot.sequence, ball.speed, ball.hla, ball.vla, ball.club
        );
        self.heartbeat.record_activity(now);
        self.events.push_back(DeviceEvent::Shot(ball));
    }

    /// Fatal errors end the session; anything else is logged and the session carries on.
    fn on_error(&mut self, err: BleError) {
        if !err.is_fatal() {
            warn!("{}", err);
            return;
        }
        error!("{}", err);
        self.cancel_tasks();
        self.heartbeat.disarm();
        self.state.phase = ConnectionPhase::Error;
        self.events.push_back(DeviceEvent::Error(err.to_string()));
    }

    fn cancel_tasks(&mut self) {
        for binding in self.bindings.drain(..) {
            binding.cancel();
        }
        for task in self.link_tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.cancel_tasks();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::core::bluetooth::codec::encode_measurement;
    use crate::core::bluetooth::constants::{
        UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE, UUID_DEVICE_INFO_SERVICE, UUID_MEASUREMENT,
        UUID_READY_STATUS,
    };
    use crate::core::bluetooth::sim::{SimCall, SimulatedDevice};

    fn measurement(sequence: u16, speed: f32) -> Vec<u8> {
        encode_measurement(&ShotRecord {
            sequence,
            speed,
            vla: 2.5,
            hla: -1.0,
            max_launch_angle: 5.0,
            min_launch_angle: 1.0,
        })
    }

    fn new_session(device: &Arc<SimulatedDevice>) -> DeviceSession {
        DeviceSession::new(device.clone(), DeviceClass::one_putt(), "PT")
    }

    /// Applies wakes until `done` holds, collecting the events produced on the way
    async fn pump_until(
        session: &mut DeviceSession,
        mut done: impl FnMut(&DeviceSession, &[DeviceEvent]) -> bool,
    ) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        tokio::time::timeout(Duration::from_secs(120), async {
            while !done(session, &events) {
                let wake = session.next_wake().await;
                session.handle_wake(wake);
                events.extend(session.take_events());
            }
        })
        .await
        .expect("session did not reach the expected state");
        events
    }

    async fn ready_session(device: &Arc<SimulatedDevice>) -> DeviceSession {
        let mut session = new_session(device);
        session.connect().unwrap();
        pump_until(&mut session, |s, _| s.phase() == ConnectionPhase::Ready).await;
        session
    }

    /// Lets the binding tasks forward anything already queued, then applies it
    async fn drain(session: &mut DeviceSession) -> Vec<DeviceEvent> {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let mut events = Vec::new();
        while let Ok(input) = session.inbox.try_recv() {
            session.handle_input(input);
            events.extend(session.take_events());
        }
        events
    }

    fn shots(events: &[DeviceEvent]) -> Vec<&BallData> {
        events
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::Shot(ball) => Some(ball),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_reaches_ready_and_reads_identity() {
        let device = SimulatedDevice::one_putt("OnePutt-0042");
        let mut session = new_session(&device);
        session.connect().unwrap();
        assert_eq!(session.phase(), ConnectionPhase::Connecting);

        let events = pump_until(&mut session, |s, _| {
            s.phase() == ConnectionPhase::Ready && s.identity().model.is_some()
        })
        .await;

        assert!(events.contains(&DeviceEvent::Connected("connected".into())));
        assert!(session.heartbeat().is_armed());
        let identity = session.identity();
        assert_eq!(identity.serial_number.as_deref(), Some("OP-000042"));
        assert_eq!(identity.firmware_version.as_deref(), Some("1.4.2"));
        assert_eq!(identity.model.as_deref(), Some("OnePutt"));

        let reads: Vec<SimCall> = device
            .calls()
            .into_iter()
            .filter(|c| matches!(c, SimCall::Read(_)))
            .collect();
        assert_eq!(reads.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_rejected_unless_disconnected() {
        let device = SimulatedDevice::one_putt("OnePutt-1");
        let mut session = ready_session(&device).await;
        let err = session.connect().unwrap_err();
        assert!(matches!(
            err,
            BleError::InvalidState {
                phase: ConnectionPhase::Ready,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shot_scenario() {
        let device = SimulatedDevice::one_putt("OnePutt-1");
        let mut session = ready_session(&device).await;

        assert!(device.notify(UUID_MEASUREMENT, measurement(1, 3000.0)));
        let events = drain(&mut session).await;
        let shots = shots(&events);
        assert_eq!(shots.len(), 1);
        assert!((shots[0].speed - 6.71).abs() < 1e-9);
        assert!((shots[0].vla - 2.5).abs() < 1e-9);
        assert!((shots[0].hla + 1.0).abs() < 1e-9);
        assert_eq!(shots[0].club, "PT");
        assert_eq!(session.state().watermark, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_sequence_is_dropped() {
        let device = SimulatedDevice::one_putt("OnePutt-1");
        let mut session = ready_session(&device).await;

        device.notify(UUID_MEASUREMENT, measurement(5, 3000.0));
        device.notify(UUID_MEASUREMENT, measurement(3, 3000.0));
        device.notify(UUID_MEASUREMENT, measurement(5, 3000.0));
        let events = drain(&mut session).await;
        assert_eq!(shots(&events).len(), 1);
        assert_eq!(session.state().watermark, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monotonic_sequences_are_all_accepted() {
        let device = SimulatedDevice::one_putt("OnePutt-1");
        let mut session = ready_session(&device).await;

        for sequence in [1u16, 2, 7, 300, u16::MAX] {
            device.notify(UUID_MEASUREMENT, measurement(sequence, 1500.0));
        }
        let events = drain(&mut session).await;
        assert_eq!(shots(&events).len(), 5);
        assert_eq!(session.state().watermark, u16::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_zero_restarts_watermark() {
        let device = SimulatedDevice::one_putt("OnePutt-1");
        let mut session = ready_session(&device).await;

        device.notify(UUID_MEASUREMENT, measurement(40, 3000.0));
        device.notify(UUID_MEASUREMENT, measurement(0, 3000.0));
        device.notify(UUID_MEASUREMENT, measurement(0, 3000.0));
        device.notify(UUID_MEASUREMENT, measurement(1, 3000.0));
        let events = drain(&mut session).await;
        assert_eq!(shots(&events).len(), 4);
        assert_eq!(session.state().watermark, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_implausible_speed_is_never_emitted() {
        let device = SimulatedDevice::one_putt("OnePutt-1");
        let mut session = ready_session(&device).await;

        device.notify(UUID_MEASUREMENT, measurement(1, 199.0));
        device.notify(UUID_MEASUREMENT, measurement(2, 15001.0));
        device.notify(UUID_MEASUREMENT, measurement(0, f32::NAN));
        device.notify(UUID_MEASUREMENT, measurement(3, 200.0));
        let events = drain(&mut session).await;
        assert_eq!(shots(&events).len(), 1);
        // rejected shots leave the watermark alone
        assert_eq!(session.state().watermark, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_notification_keeps_session_alive() {
        let device = SimulatedDevice::one_putt("OnePutt-1");
        let mut session = ready_session(&device).await;

        device.notify(UUID_MEASUREMENT, vec![0x01, 0x00, 0x00]);
        device.notify(UUID_MEASUREMENT, measurement(1, 3000.0));
        let events = drain(&mut session).await;
        assert_eq!(shots(&events).len(), 1);
        assert_eq!(session.phase(), ConnectionPhase::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_fatal_errors_end_the_session() {
        let device = SimulatedDevice::one_putt("OnePutt-1");
        let mut session = ready_session(&device).await;

        session.on_error(BleError::malformed(
            crate::core::bluetooth::CharacteristicKind::BatteryLevel,
            "short",
        ));
        assert_eq!(session.phase(), ConnectionPhase::Ready);
        assert!(session.take_events().is_empty());

        session.on_error(BleError::LinkLost {
            device: "OnePutt-1".into(),
        });
        assert_eq!(session.phase(), ConnectionPhase::Error);
        assert!(!session.heartbeat().is_armed());
        assert!(matches!(
            session.take_events().as_slice(),
            [DeviceEvent::Error(msg)] if msg.contains("OnePutt-1")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_battery_sentinel_passes_through() {
        let device = SimulatedDevice::one_putt("OnePutt-1");
        let mut session = ready_session(&device).await;

        device.notify(UUID_BATTERY_LEVEL, 87u16.to_le_bytes().to_vec());
        device.notify(UUID_BATTERY_LEVEL, 0xFFFFu16.to_le_bytes().to_vec());
        let events = drain(&mut session).await;
        assert_eq!(
            events,
            vec![DeviceEvent::Battery(87), DeviceEvent::Battery(0xFFFF)]
        );
        assert_eq!(session.state().battery, Some(0xFFFF));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_status_labels() {
        let device = SimulatedDevice::one_putt("OnePutt-1");
        let mut session = ready_session(&device).await;

        device.notify(UUID_READY_STATUS, vec![0x00]);
        device.notify(UUID_READY_STATUS, vec![0x01]);
        let events = drain(&mut session).await;
        assert_eq!(
            events,
            vec![
                DeviceEvent::status("ready_status", "Waiting"),
                DeviceEvent::status("ready_status", "Not Ready"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_selected_club_and_pause_apply_to_later_shots() {
        let device = SimulatedDevice::one_putt("OnePutt-1");
        let mut session = ready_session(&device).await;

        session.select_club("DR");
        session.pause();
        device.notify(UUID_MEASUREMENT, measurement(1, 3000.0));
        let events = drain(&mut session).await;
        let shots = shots(&events);
        // paused sessions still emit shots
        assert_eq!(shots.len(), 1);
        assert_eq!(shots[0].club, "DR");
        assert!(session.is_paused());
        assert_eq!(session.phase(), ConnectionPhase::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_fires_once() {
        let device = SimulatedDevice::one_putt("OnePutt-1");
        let mut session = ready_session(&device).await;
        let started = Instant::now();

        let events = pump_until(&mut session, |s, _| s.phase() == ConnectionPhase::Error).await;
        assert!(Instant::now() - started >= Duration::from_secs(20));
        let errors: Vec<&DeviceEvent> = events
            .iter()
            .filter(|e| matches!(e, DeviceEvent::Error(_)))
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], DeviceEvent::Error(msg) if msg.contains("Heartbeat timeout")));
        assert!(!session.heartbeat().is_armed());

        // nothing else fires while in Error
        let later = Instant::now() + Duration::from_secs(60);
        session.check_heartbeat(later);
        assert!(session.take_events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_battery_traffic_keeps_heartbeat_alive() {
        let device = SimulatedDevice::one_putt("OnePutt-1");
        let mut session = ready_session(&device).await;

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(15)).await;
            device.notify(UUID_BATTERY_LEVEL, 80u16.to_le_bytes().to_vec());
            drain(&mut session).await;
            session.check_heartbeat(Instant::now());
        }
        assert_eq!(session.phase(), ConnectionPhase::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_moves_to_error() {
        let device = SimulatedDevice::one_putt("OnePutt-1");
        let mut session = ready_session(&device).await;

        device.drop_link();
        let events = pump_until(&mut session, |s, _| s.phase() == ConnectionPhase::Error).await;
        assert!(matches!(
            events.as_slice(),
            [DeviceEvent::Error(msg)] if msg.contains("Lost the Bluetooth connection")
        ));

        // recovering takes an explicit disconnect/connect cycle
        assert!(session.connect().is_err());
        session.disconnect().await;
        session.connect().unwrap();
        pump_until(&mut session, |s, _| s.phase() == ConnectionPhase::Ready).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_gating_discovery_failure_is_fatal() {
        let device = SimulatedDevice::one_putt("OnePutt-1");
        device.remove_service(UUID_BATTERY_SERVICE);
        let mut session = new_session(&device);
        session.connect().unwrap();

        let events = pump_until(&mut session, |s, _| s.phase() == ConnectionPhase::Error).await;
        assert!(matches!(
            events.as_slice(),
            [DeviceEvent::Error(msg)] if msg.contains("discovery failed")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_info_failure_does_not_block_ready() {
        let device = SimulatedDevice::one_putt("OnePutt-1");
        device.remove_service(UUID_DEVICE_INFO_SERVICE);
        let mut session = new_session(&device);
        session.connect().unwrap();

        let events = pump_until(&mut session, |s, _| s.phase() == ConnectionPhase::Ready).await;
        assert_eq!(events, vec![DeviceEvent::Connected("connected".into())]);
        assert_eq!(session.identity().serial_number, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_link_reports_connection_failure() {
        let device = SimulatedDevice::one_putt("OnePutt-1");
        device.refuse_connections(true);
        let mut session = new_session(&device);
        session.connect().unwrap();

        let events = pump_until(&mut session, |s, _| s.phase() == ConnectionPhase::Error).await;
        assert!(matches!(
            events.as_slice(),
            [DeviceEvent::Error(msg)] if msg.contains("Could not connect")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_clears_state_and_ignores_stale_completions() {
        let device = SimulatedDevice::one_putt("OnePutt-1");
        let mut session = ready_session(&device).await;
        device.notify(UUID_MEASUREMENT, measurement(9, 3000.0));
        drain(&mut session).await;
        assert_eq!(session.state().watermark, 9);

        // queued but not yet applied when the disconnect happens
        device.notify(UUID_MEASUREMENT, measurement(10, 3000.0));
        tokio::task::yield_now().await;
        session.disconnect().await;

        assert_eq!(session.phase(), ConnectionPhase::Disconnected);
        assert_eq!(session.state().watermark, 0);
        assert_eq!(session.identity().serial_number, None);
        assert!(!session.heartbeat().is_armed());
        assert!(drain(&mut session).await.is_empty());
        assert_eq!(device.calls().last(), Some(&SimCall::Disconnect));

        // idempotent
        let calls = device.calls().len();
        session.disconnect().await;
        assert_eq!(device.calls().len(), calls);
    }
}
