//! Client lifecycle state machine
//!
//! `Uninitialized → Loaded → Connecting → Connected`. A `Close` from the
//! server drops a connected client back to `Loaded`; a rejected login drops
//! it to `Uninitialized`.

use core::fmt;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Client State
// ----------------------------------------------------------------------------

/// Lifecycle state of a [`crate::MessageClient`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientState {
    /// Persisted state not loaded yet (or login was rejected)
    #[default]
    Uninitialized,
    /// Persisted state loaded, no connection requested
    Loaded,
    /// Login request produced, waiting for the login response
    Connecting,
    /// Logged in; outbound traffic may flow
    Connected,
}

impl ClientState {
    /// Whether `initialize` has completed at some point
    pub fn is_loaded(&self) -> bool {
        !matches!(self, ClientState::Uninitialized)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ClientState::Connected)
    }

    /// Whether a move from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: ClientState) -> bool {
        use ClientState::*;
        matches!(
            (self, next),
            (Uninitialized, Loaded)
                | (Loaded, Connecting)
                | (Connecting, Connecting)
                | (Connected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Uninitialized)
                | (Connected, Loaded)
                | (Connecting, Loaded)
        )
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientState::Uninitialized => "Uninitialized",
            ClientState::Loaded => "Loaded",
            ClientState::Connecting => "Connecting",
            ClientState::Connected => "Connected",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ClientState::Loaded.to_string(), "Loaded");
        assert_eq!(ClientState::default(), ClientState::Uninitialized);
    }

    #[test]
    fn test_transitions() {
        assert!(ClientState::Uninitialized.can_transition_to(ClientState::Loaded));
        assert!(ClientState::Connected.can_transition_to(ClientState::Loaded));
        assert!(ClientState::Connecting.can_transition_to(ClientState::Uninitialized));
        assert!(!ClientState::Uninitialized.can_transition_to(ClientState::Connected));
        assert!(!ClientState::Loaded.can_transition_to(ClientState::Connected));
    }
}
