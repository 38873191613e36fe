//! MCS Protocol Module
//!
//! This module contains the protocol state the client drives:
//! - `client_state`: Client lifecycle state machine
//! - `ack_tracker`: Stream sequencing and acknowledgment reconciliation
//! - `heartbeat`: Connection liveness detection

pub mod ack_tracker;
pub mod client_state;
pub mod heartbeat;

pub use ack_tracker::{AckOutcome, AckTracker, ReconnectOutcome};
pub use client_state::ClientState;
pub use heartbeat::{HeartbeatAction, HeartbeatMonitor};
