//! Connection abstraction
//!
//! The physical connection (socket, TLS, framing, backoff) is owned by a
//! [`ConnectionFactory`]. The client only asks it to connect, to write a
//! frame, or to tear the connection down; the factory reports back through
//! `MessageClient::on_connection_opening`, `on_packet_received` and
//! `on_reachability_changed`.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::packet::McsPacket;

// ----------------------------------------------------------------------------
// Connection Factory Trait
// ----------------------------------------------------------------------------

pub trait ConnectionFactory {
    /// Start connecting; the factory calls back for the login request once
    /// the socket is up
    fn connect(&mut self);

    /// Whether frames can currently be written
    fn is_endpoint_reachable(&self) -> bool;

    /// Write one frame to the connection
    fn send(&mut self, packet: McsPacket);

    /// Tear down the current connection and schedule a reconnect
    fn signal_connection_reset(&mut self, reason: ConnectionResetReason);
}

impl<C: ConnectionFactory + ?Sized> ConnectionFactory for Box<C> {
    fn connect(&mut self) {
        (**self).connect()
    }

    fn is_endpoint_reachable(&self) -> bool {
        (**self).is_endpoint_reachable()
    }

    fn send(&mut self, packet: McsPacket) {
        (**self).send(packet)
    }

    fn signal_connection_reset(&mut self, reason: ConnectionResetReason) {
        (**self).signal_connection_reset(reason)
    }
}

// ----------------------------------------------------------------------------
// Reset Reasons
// ----------------------------------------------------------------------------

/// Why the client asked for the connection to be reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionResetReason {
    /// The server sent a Close frame
    CloseCommand,
    /// A heartbeat ping went unanswered
    HeartbeatFailure,
}

impl fmt::Display for ConnectionResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionResetReason::CloseCommand => f.write_str("close command"),
            ConnectionResetReason::HeartbeatFailure => f.write_str("heartbeat failure"),
        }
    }
}
