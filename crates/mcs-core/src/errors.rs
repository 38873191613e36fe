//! Error types for the MCS client
//!
//! This module contains the error types used throughout the MCS client core:
//! state machine contract violations, login rejections, corrupt persisted
//! state, and the channel/configuration failures the runtime reports through
//! the same type.

use crate::protocol::ClientState;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Failures reported by a durable store backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Per-app outgoing quota reached for {app_id} (limit: {limit})")]
    AppQuotaExceeded { app_id: String, limit: usize },
    #[error("Store backend unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("Store write failed: {reason}")]
    WriteFailed { reason: String },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error type for the MCS client
#[derive(Debug, thiserror::Error)]
pub enum McsError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Invalid client state: expected {expected}, got {actual}")]
    InvalidState {
        expected: ClientState,
        actual: ClientState,
    },

    #[error("Client already initialized")]
    AlreadyInitialized,

    /// Login attempted with credentials that only partially match the loaded ones
    #[error("Device credentials do not match the loaded identity")]
    CredentialMismatch,

    /// Reconnect attempted before any device credentials were known
    #[error("Device credentials missing")]
    MissingCredentials,

    #[error("Login rejected by server (code {code}): {message}")]
    LoginRejected { code: i32, message: String },

    #[error("Restored outgoing message has an unreadable key: {key}")]
    CorruptRestoredMessage { key: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Channel communication error (runtime task plumbing)
    #[error("Channel error: {message}")]
    Channel { message: String },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl McsError {
    /// Create an invalid state error
    pub fn invalid_state(expected: ClientState, actual: ClientState) -> Self {
        McsError::InvalidState { expected, actual }
    }

    /// Create a login rejected error from the server supplied error details
    pub fn login_rejected<T: Into<String>>(code: i32, message: T) -> Self {
        McsError::LoginRejected {
            code,
            message: message.into(),
        }
    }

    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        McsError::Channel {
            message: message.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        McsError::Configuration {
            reason: reason.into(),
        }
    }

    /// Whether the error leaves the client unusable until it is rebuilt from the store
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            McsError::LoginRejected { .. } | McsError::CorruptRestoredMessage { .. }
        )
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, McsError>;
pub type McsResult<T> = Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = McsError::invalid_state(ClientState::Loaded, ClientState::Connected);
        assert_eq!(
            err.to_string(),
            "Invalid client state: expected Loaded, got Connected"
        );

        let err = McsError::login_rejected(3, "bad token");
        assert!(err.to_string().contains("code 3"));
        assert!(err.is_fatal());
        assert!(!McsError::CredentialMismatch.is_fatal());
    }

    #[test]
    fn test_store_error_conversion() {
        let err: McsError = StoreError::AppQuotaExceeded {
            app_id: "com.example".into(),
            limit: 20,
        }
        .into();
        assert!(matches!(err, McsError::Store(StoreError::AppQuotaExceeded { .. })));
    }
}
