//! Delivery outcomes reported to the application
//!
//! The client never calls back into the application. Everything it has to
//! say (received messages, send status changes, fatal errors) is queued as a
//! [`ClientEvent`] and drained by the owner.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::errors::McsError;
use crate::packet::{DataMessageStanza, McsPacket};

// ----------------------------------------------------------------------------
// Send Status
// ----------------------------------------------------------------------------

/// Result of admitting or delivering an outgoing message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageSendStatus {
    /// Accepted into the send queue
    Queued,
    /// Acknowledged by the server
    Sent,
    /// The send queue is full
    QueueSizeLimitReached,
    /// The per-application persistent quota is full
    AppQueueSizeLimitReached,
    /// The encoded message exceeds the size limit
    MessageTooLarge,
    /// A TTL 0 message was offered while the endpoint was unreachable
    NoConnectionOnZeroTtl,
    /// The message expired before it could be delivered
    TtlExceeded,
}

impl MessageSendStatus {
    /// Whether the message is no longer tracked by the client
    pub fn is_final(&self) -> bool {
        !matches!(self, MessageSendStatus::Queued)
    }

    pub fn is_admission_failure(&self) -> bool {
        matches!(
            self,
            MessageSendStatus::QueueSizeLimitReached
                | MessageSendStatus::AppQueueSizeLimitReached
                | MessageSendStatus::MessageTooLarge
                | MessageSendStatus::NoConnectionOnZeroTtl
        )
    }
}

impl fmt::Display for MessageSendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageSendStatus::Queued => "QUEUED",
            MessageSendStatus::Sent => "SENT",
            MessageSendStatus::QueueSizeLimitReached => "QUEUE_SIZE_LIMIT_REACHED",
            MessageSendStatus::AppQueueSizeLimitReached => "APP_QUEUE_SIZE_LIMIT_REACHED",
            MessageSendStatus::MessageTooLarge => "MESSAGE_TOO_LARGE",
            MessageSendStatus::NoConnectionOnZeroTtl => "NO_CONNECTION_ON_ZERO_TTL",
            MessageSendStatus::TtlExceeded => "TTL_EXCEEDED",
        };
        f.write_str(name)
    }
}

/// Status change of one outgoing data message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendStatusReport {
    pub device_user_id: i64,
    /// Application id (the data message category)
    pub app_id: String,
    /// Application-level message id
    pub message_id: String,
    pub status: MessageSendStatus,
}

impl SendStatusReport {
    pub fn for_data_message(message: &DataMessageStanza, status: MessageSendStatus) -> Self {
        Self {
            device_user_id: message.device_user_id,
            app_id: message.category.clone(),
            message_id: message.id.clone(),
            status,
        }
    }

    /// Only data messages produce status reports
    pub fn for_packet(packet: &McsPacket, status: MessageSendStatus) -> Option<Self> {
        packet
            .as_data_message()
            .map(|message| Self::for_data_message(message, status))
    }
}

// ----------------------------------------------------------------------------
// Client Events
// ----------------------------------------------------------------------------

/// Output of the client destined for the application
#[derive(Debug)]
pub enum ClientEvent {
    /// A frame delivered upward (login responses and data messages)
    MessageReceived(McsPacket),
    SendStatus(SendStatusReport),
    /// The client stopped; the owner must log in again
    Error(McsError),
}

impl ClientEvent {
    pub fn as_send_status(&self) -> Option<&SendStatusReport> {
        match self {
            ClientEvent::SendStatus(report) => Some(report),
            _ => None,
        }
    }
}
