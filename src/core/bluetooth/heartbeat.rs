//! Heartbeat watchdog
//! Detects a silently dropped link from the absence of traffic.

use std::time::Duration;

use tokio::time::Instant;

/// Fires once when no activity was recorded for a full interval.
#[derive(Debug, Clone)]
pub struct HeartbeatWatchdog {
    interval: Duration,
    last_activity: Instant,
    armed: bool,
}

impl HeartbeatWatchdog {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_activity: Instant::now(),
            armed: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Starts watching, counting `now` as the last activity
    pub fn arm(&mut self, now: Instant) {
        self.armed = true;
        self.last_activity = now;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn record_activity(&mut self, now: Instant) {
        if self.armed {
            self.last_activity = now;
        }
    }

    /// When the watchdog will fire if nothing else happens
    pub fn deadline(&self) -> Option<Instant> {
        self.armed.then(|| self.last_activity + self.interval)
    }

    /// Returns `true` exactly once per silent interval, then stays disarmed until re-armed.
    pub fn poll_expired(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.armed = false;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(20);

    #[test]
    fn test_disarmed_never_fires() {
        let start = Instant::now();
        let mut watchdog = HeartbeatWatchdog::new(INTERVAL);
        assert_eq!(watchdog.deadline(), None);
        assert!(!watchdog.poll_expired(start + INTERVAL * 10));
    }

    #[test]
    fn test_fires_once_then_disarms() {
        let start = Instant::now();
        let mut watchdog = HeartbeatWatchdog::new(INTERVAL);
        watchdog.arm(start);

        assert!(!watchdog.poll_expired(start + INTERVAL - Duration::from_millis(1)));
        assert!(watchdog.poll_expired(start + INTERVAL));
        assert!(!watchdog.is_armed());
        assert!(!watchdog.poll_expired(start + INTERVAL * 2));
        assert!(!watchdog.poll_expired(start + INTERVAL * 3));

        watchdog.arm(start + INTERVAL * 3);
        assert!(watchdog.poll_expired(start + INTERVAL * 4));
    }

    #[test]
    fn test_activity_pushes_deadline() {
        let start = Instant::now();
        let mut watchdog = HeartbeatWatchdog::new(INTERVAL);
        watchdog.arm(start);
        watchdog.record_activity(start + Duration::from_secs(15));

        assert_eq!(
            watchdog.deadline(),
            Some(start + Duration::from_secs(35))
        );
        assert!(!watchdog.poll_expired(start + Duration::from_secs(25)));
        assert!(watchdog.poll_expired(start + Duration::from_secs(35)));
    }

    #[test]
    fn test_activity_while_disarmed_is_ignored() {
        let start = Instant::now();
        let mut watchdog = HeartbeatWatchdog::new(INTERVAL);
        watchdog.record_activity(start + Duration::from_secs(5));
        assert!(!watchdog.is_armed());
        assert_eq!(watchdog.deadline(), None);
    }
}
