//! Heartbeat-based liveness detection
//!
//! Pure timer state: the owner asks for the next deadline, wakes up at it and
//! calls [`HeartbeatMonitor::poll`], which says whether to send a ping or to
//! give up on the connection. Any inbound frame counts as a heartbeat ack.

use core::time::Duration;

use tracing::{debug, warn};

use crate::config::HeartbeatConfig;
use crate::types::Timestamp;

/// What the owner must do after a timer tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// The interval elapsed; send a heartbeat ping
    SendPing,
    /// A ping went unanswered for the ack timeout; reset the connection
    ConnectionTimedOut,
}

#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    interval: Duration,
    ack_timeout: Duration,
    running: bool,
    waiting_for_ack: bool,
    deadline: Option<Timestamp>,
}

impl HeartbeatMonitor {
    pub fn new(config: &HeartbeatConfig) -> Self {
        Self {
            interval: config.interval(),
            ack_timeout: config.ack_timeout(),
            running: false,
            waiting_for_ack: false,
            deadline: None,
        }
    }

    /// Arm the interval timer for a freshly logged-in connection
    pub fn start(&mut self, now: Timestamp) {
        self.running = true;
        self.waiting_for_ack = false;
        self.deadline = Some(now.saturating_add(self.interval));
        debug!("Heartbeat monitor started, interval {:?}", self.interval);
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.waiting_for_ack = false;
        self.deadline = None;
    }

    /// Treat inbound traffic as proof the connection is alive
    pub fn on_activity(&mut self, now: Timestamp) {
        if !self.running {
            return;
        }
        self.waiting_for_ack = false;
        self.deadline = Some(now.saturating_add(self.interval));
    }

    /// Apply the interval pushed by the server in its login response
    pub fn update_interval(&mut self, interval_ms: u64) {
        if interval_ms == 0 {
            warn!("Ignoring zero heartbeat interval from server");
            return;
        }
        self.interval = Duration::from_millis(interval_ms);
        debug!("Heartbeat interval updated to {:?}", self.interval);
    }

    pub fn poll(&mut self, now: Timestamp) -> Option<HeartbeatAction> {
        let deadline = self.deadline?;
        if !self.running || now < deadline {
            return None;
        }

        if self.waiting_for_ack {
            warn!("Heartbeat ack not received within {:?}", self.ack_timeout);
            self.stop();
            return Some(HeartbeatAction::ConnectionTimedOut);
        }

        self.waiting_for_ack = true;
        self.deadline = Some(now.saturating_add(self.ack_timeout));
        Some(HeartbeatAction::SendPing)
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.deadline
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_waiting_for_ack(&self) -> bool {
        self.waiting_for_ack
    }
}
