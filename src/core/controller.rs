//! Putting device controller
//! Owns the scanners and at most one device session, applies collaborator
//! commands and forwards session output as [`DeviceEvent`]s.
//!
//! Everything runs on one loop ([`PuttingDeviceController::run`]); scans,
//! RSSI reads and the session's own I/O report back through channels.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::core::bluetooth::{
    BleError, ConnectionPhase, DeviceClass, DeviceScanner, DeviceSession, FoundDevice, PUTTER_CLUB,
    RSSI_SCAN_INTERVAL, RssiScanner, ScannerEvent, SessionWake, report,
};
use crate::core::events::DeviceEvent;

/// Commands the collaborator can send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCommand {
    Start,
    Stop,
    Pause,
    Resume,
    ClubSelected(String),
    Shutdown,
}

/// Cloneable sender side of a running controller
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<ControllerCommand>,
}

impl ControllerHandle {
    pub fn send(&self, command: ControllerCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|e| anyhow!("Controller is not running, dropped {:?}", e.0))
    }

    pub fn start(&self) -> Result<()> {
        self.send(ControllerCommand::Start)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(ControllerCommand::Stop)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(ControllerCommand::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(ControllerCommand::Resume)
    }

    pub fn club_selected(&self, club: impl Into<String>) -> Result<()> {
        self.send(ControllerCommand::ClubSelected(club.into()))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(ControllerCommand::Shutdown)
    }
}

enum Wake {
    Command(Option<ControllerCommand>),
    Scanner(ScannerEvent),
    Session(SessionWake),
    RssiTick,
}

pub struct PuttingDeviceController {
    class: DeviceClass,
    scanner: Arc<dyn DeviceScanner>,
    rssi_scanner: Arc<dyn RssiScanner>,
    session: Option<DeviceSession>,
    club: String,
    paused: bool,
    rssi_interval: Duration,
    rssi_timer: Option<Interval>,
    scan_task: Option<JoinHandle<()>>,
    rssi_task: Option<JoinHandle<()>>,
    scanner_tx: mpsc::UnboundedSender<ScannerEvent>,
    scanner_rx: mpsc::UnboundedReceiver<ScannerEvent>,
    commands: mpsc::UnboundedReceiver<ControllerCommand>,
    events: mpsc::UnboundedSender<DeviceEvent>,
}

impl PuttingDeviceController {
    pub fn new(
        class: DeviceClass,
        scanner: Arc<dyn DeviceScanner>,
        rssi_scanner: Arc<dyn RssiScanner>,
        events: mpsc::UnboundedSender<DeviceEvent>,
    ) -> (Self, ControllerHandle) {
        let (tx, commands) = mpsc::unbounded_channel();
        let (scanner_tx, scanner_rx) = mpsc::unbounded_channel();
        let controller = Self {
            class,
            scanner,
            rssi_scanner,
            session: None,
            club: PUTTER_CLUB.to_string(),
            paused: false,
            rssi_interval: RSSI_SCAN_INTERVAL,
            rssi_timer: None,
            scan_task: None,
            rssi_task: None,
            scanner_tx,
            scanner_rx,
            commands,
            events,
        };
        (controller, ControllerHandle { tx })
    }

    pub fn with_rssi_interval(mut self, interval: Duration) -> Self {
        self.rssi_interval = interval;
        self
    }

    /// Club used for shots until the collaborator selects one
    pub fn with_club(mut self, club: impl Into<String>) -> Self {
        self.club = club.into();
        self
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn session(&self) -> Option<&DeviceSession> {
        self.session.as_ref()
    }

    /// Runs until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        info!(
            "Putting device controller started for {} ('{}')",
            self.class.name, self.class.name_prefix
        );
        while self.step().await {}
        info!("Putting device controller stopped");
    }

    /// Waits for and applies one input. Returns `false` once shut down.
    pub async fn step(&mut self) -> bool {
        match self.next_wake().await {
            Wake::Command(None) | Wake::Command(Some(ControllerCommand::Shutdown)) => {
                self.shutdown().await;
                false
            }
            Wake::Command(Some(command)) => {
                self.handle_command(command).await;
                true
            }
            Wake::Scanner(event) => {
                self.handle_scanner_event(event).await;
                true
            }
            Wake::Session(wake) => {
                if let Some(session) = self.session.as_mut() {
                    session.handle_wake(wake);
                }
                self.dispatch_session_events().await;
                true
            }
            Wake::RssiTick => {
                self.request_rssi();
                true
            }
        }
    }

    async fn next_wake(&mut self) -> Wake {
        let commands = &mut self.commands;
        let scanner_rx = &mut self.scanner_rx;
        let session = self.session.as_mut();
        let rssi_timer = self.rssi_timer.as_mut();

        tokio::select! {
            command = commands.recv() => Wake::Command(command),
            Some(event) = scanner_rx.recv() => Wake::Scanner(event),
            wake = session_wake(session) => Wake::Session(wake),
            () = rssi_tick(rssi_timer) => Wake::RssiTick,
        }
    }

    pub async fn handle_command(&mut self, command: ControllerCommand) {
        debug!("Controller command: {:?}", command);
        match command {
            ControllerCommand::Start => self.start(),
            ControllerCommand::Stop => self.stop().await,
            ControllerCommand::Pause => self.set_paused(true),
            ControllerCommand::Resume => self.set_paused(false),
            ControllerCommand::ClubSelected(club) => self.club_selected(&club),
            ControllerCommand::Shutdown => self.shutdown().await,
        }
    }

    /// Starts a scan unless a session exists or a scan is already running
    pub fn start(&mut self) {
        if self.session.is_some() {
            debug!("Start ignored, a putting device is already attached");
            return;
        }
        if self.scan_task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Start ignored, scan already running");
            return;
        }

        info!("Scanning for '{}' devices", self.class.name_prefix);
        let scanner = self.scanner.clone();
        let events = self.scanner_tx.clone();
        let prefix = self.class.name_prefix.clone();
        self.scan_task = Some(tokio::spawn(async move {
            if let Err(e) = scanner.scan(&prefix, events.clone()).await {
                report(&events, ScannerEvent::Error(e.to_string()));
            }
        }));
    }

    pub async fn stop(&mut self) {
        self.cancel_scan();
        self.discard_session().await;
        self.reset_background();
        self.emit(DeviceEvent::Disconnected);
    }

    pub async fn shutdown(&mut self) {
        self.cancel_scan();
        self.discard_session().await;
        self.reset_background();
    }

    pub fn club_selected(&mut self, club: &str) {
        debug!("Club selected: {}", club);
        self.club = club.to_string();
        if let Some(session) = self.session.as_mut() {
            session.select_club(club);
        }
        self.set_paused(club != PUTTER_CLUB);
    }

    fn set_paused(&mut self, paused: bool) {
        if let Some(session) = self.session.as_mut() {
            if paused {
                session.pause();
            } else {
                session.resume();
            }
        }
        if self.paused != paused {
            self.paused = paused;
            info!("Shot forwarding {}", if paused { "paused" } else { "resumed" });
            self.emit(DeviceEvent::Forwarding { paused });
        }
    }

    async fn handle_scanner_event(&mut self, event: ScannerEvent) {
        match event {
            ScannerEvent::DeviceFound(found) => self.device_found(found).await,
            ScannerEvent::DeviceNotFound => {
                let err = BleError::DeviceNotFound {
                    prefix: self.class.name_prefix.clone(),
                };
                warn!("{}", err);
                let message = format!("No device found.\n\n{}", self.class.start_message);
                self.emit(DeviceEvent::DeviceNotFound(message));
            }
            ScannerEvent::StatusUpdate(message) => self.emit(DeviceEvent::Scanning(message)),
            ScannerEvent::Error(error) => {
                warn!("Scan failed: {}", error);
                let message = format!(
                    "The following error occurred while scanning for a putting device:\n\n{}",
                    error
                );
                self.emit(DeviceEvent::ScanError(message));
            }
            ScannerEvent::Rssi(rssi) => self.emit(DeviceEvent::Rssi(rssi)),
        }
    }

    /// Replaces any existing session with one for `found` and connects it.
    /// Devices whose name does not carry the class prefix are ignored.
    pub async fn device_found(&mut self, found: FoundDevice) {
        if !found.info.matches_prefix(&self.class.name_prefix) {
            warn!(
                "Ignoring {:?}, not a {} device",
                found.info.name, self.class.name
            );
            return;
        }
        if let Some(rssi) = found.info.rssi {
            self.emit(DeviceEvent::Rssi(rssi));
        }
        self.discard_session().await;

        let mut session = DeviceSession::new(found.device, self.class.clone(), self.club.clone());
        if self.paused {
            session.pause();
        }
        match session.connect() {
            Ok(()) => self.session = Some(session),
            Err(e) => warn!("Could not start connecting to {:?}: {}", found.info.name, e),
        }
    }

    async fn dispatch_session_events(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let mut failed = false;
        for event in session.take_events() {
            match &event {
                DeviceEvent::Connected(_) => self.start_rssi_timer(),
                DeviceEvent::Error(_) => failed = true,
                _ => {}
            }
            self.emit(event);
        }
        // no automatic retry, the collaborator decides
        if failed {
            self.discard_session().await;
        }
    }

    async fn discard_session(&mut self) {
        self.stop_rssi_timer();
        if let Some(mut session) = self.session.take() {
            debug!("Discarding session in phase {}", session.phase());
            if session.phase() != ConnectionPhase::Disconnected {
                session.disconnect().await;
            }
        }
    }

    fn start_rssi_timer(&mut self) {
        let mut timer =
            tokio::time::interval_at(Instant::now() + self.rssi_interval, self.rssi_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.rssi_timer = Some(timer);
    }

    fn stop_rssi_timer(&mut self) {
        self.rssi_timer = None;
        if let Some(task) = self.rssi_task.take() {
            task.abort();
        }
    }

    fn request_rssi(&mut self) {
        if self.rssi_task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let scanner = self.rssi_scanner.clone();
        let events = self.scanner_tx.clone();
        let prefix = self.class.name_prefix.clone();
        self.rssi_task = Some(tokio::spawn(async move {
            match scanner.scan(&prefix).await {
                Ok(Some(rssi)) => report(&events, ScannerEvent::Rssi(rssi)),
                Ok(None) => debug!("No RSSI reading"),
                Err(e) => debug!("RSSI scan failed: {}", e),
            }
        }));
    }

    fn cancel_scan(&mut self) {
        if let Some(task) = self.scan_task.take() {
            self.scanner.cancel();
            task.abort();
        }
    }

    /// Drops results of scans and RSSI reads that were still in flight
    fn reset_background(&mut self) {
        let (scanner_tx, scanner_rx) = mpsc::unbounded_channel();
        self.scanner_tx = scanner_tx;
        self.scanner_rx = scanner_rx;
    }

    fn emit(&self, event: DeviceEvent) {
        if self.events.send(event).is_err() {
            debug!("No one is listening for device events");
        }
    }
}

async fn session_wake(session: Option<&mut DeviceSession>) -> SessionWake {
    match session {
        Some(session) => session.next_wake().await,
        None => std::future::pending().await,
    }
}

async fn rssi_tick(timer: Option<&mut Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
