//! MCS frame structures
//!
//! Every frame exchanged with the connection server is a variant of the
//! closed [`McsPacket`] enum. Byte-level framing belongs to the transport;
//! the core only needs the typed frames plus a size estimate for admission
//! control, which is taken from the bincode encoding.

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::types::{DeviceCredentials, PersistentId, StreamId, Timestamp};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Category of data messages addressed to the client itself
pub const MCS_CATEGORY: &str = "com.google.android.gsf.gtalkservice";

/// Sender used for data messages the client generates on its own
pub const GCM_FROM_FIELD: &str = "gcm@android.com";

/// App data key of the server's idle notification
pub const IDLE_NOTIFICATION_KEY: &str = "IdleNotification";

/// Domain announced in the login request
pub const LOGIN_DOMAIN: &str = "mcs.android.com";

/// Client identifier announced in the login request
pub const CLIENT_ID: &str = concat!("mcs-rs-", env!("CARGO_PKG_VERSION"));

// ----------------------------------------------------------------------------
// Packet Tags
// ----------------------------------------------------------------------------

/// Frame type tags, numbered as on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketTag {
    HeartbeatPing = 0,
    HeartbeatAck = 1,
    LoginRequest = 2,
    LoginResponse = 3,
    Close = 4,
    IqStanza = 7,
    DataMessage = 8,
}

impl PacketTag {
    /// Convert from u8, returning None for unknown values
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::HeartbeatPing),
            1 => Some(Self::HeartbeatAck),
            2 => Some(Self::LoginRequest),
            3 => Some(Self::LoginResponse),
            4 => Some(Self::Close),
            7 => Some(Self::IqStanza),
            8 => Some(Self::DataMessage),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

// ----------------------------------------------------------------------------
// Login
// ----------------------------------------------------------------------------

/// First frame of every connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub id: String,
    pub domain: String,
    /// Android id, decimal
    pub user: String,
    pub resource: String,
    /// Security token, decimal
    pub auth_token: String,
    pub device_id: String,
    pub last_stream_id_received: StreamId,
    /// Inbound persistent ids the client has received but not yet had
    /// confirmed by the server
    pub received_persistent_ids: Vec<PersistentId>,
    pub user_serial_numbers: Vec<i64>,
    pub use_rmq2: bool,
}

impl LoginRequest {
    pub fn new(credentials: &DeviceCredentials, user_serial_numbers: &[i64]) -> Self {
        let android_id = credentials.android_id.to_string();
        Self {
            id: CLIENT_ID.to_string(),
            domain: LOGIN_DOMAIN.to_string(),
            user: android_id.clone(),
            resource: android_id,
            auth_token: credentials.security_token.to_string(),
            device_id: format!("android-{:x}", credentials.android_id),
            last_stream_id_received: 0,
            received_persistent_ids: Vec::new(),
            user_serial_numbers: user_serial_numbers.to_vec(),
            use_rmq2: true,
        }
    }
}

/// Error details of a rejected login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginError {
    pub code: i32,
    pub message: String,
}

/// Heartbeat parameters pushed by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHeartbeatConfig {
    pub interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub id: String,
    pub error: Option<LoginError>,
    pub heartbeat_config: Option<ServerHeartbeatConfig>,
    pub last_stream_id_received: StreamId,
    pub server_timestamp: u64,
}

impl LoginResponse {
    /// Error code ≠ 0 means the server refused the login
    pub fn rejection(&self) -> Option<&LoginError> {
        self.error.as_ref().filter(|error| error.code != 0)
    }
}

// ----------------------------------------------------------------------------
// Heartbeats
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPing {
    pub last_stream_id_received: StreamId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatAck {
    pub last_stream_id_received: StreamId,
}

// ----------------------------------------------------------------------------
// Iq Stanza
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IqType {
    Get,
    Set,
    Result,
    Error,
}

/// Control extensions carried by an iq stanza
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IqExtension {
    /// Acknowledges everything up to the frame's `last_stream_id_received`
    StreamAck,
    /// Acknowledges the listed outgoing persistent ids
    SelectiveAck(Vec<PersistentId>),
    /// Extension this client does not understand
    Unknown { id: i32, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IqStanza {
    pub id: String,
    pub iq_type: IqType,
    pub persistent_id: Option<PersistentId>,
    pub last_stream_id_received: StreamId,
    pub extension: Option<IqExtension>,
}

impl IqStanza {
    /// Stanza used to acknowledge inbound traffic
    pub fn stream_ack() -> Self {
        Self {
            id: String::new(),
            iq_type: IqType::Set,
            persistent_id: None,
            last_stream_id_received: 0,
            extension: Some(IqExtension::StreamAck),
        }
    }

    pub fn selective_ack(ids: Vec<PersistentId>) -> Self {
        Self {
            extension: Some(IqExtension::SelectiveAck(ids)),
            ..Self::stream_ack()
        }
    }
}

// ----------------------------------------------------------------------------
// Data Message
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppData {
    pub key: String,
    pub value: String,
}

impl AppData {
    pub fn new<K: Into<String>, V: Into<String>>(key: K, value: V) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Application payload frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMessageStanza {
    /// Application-level message id, echoed in send status reports
    pub id: String,
    pub from: String,
    pub to: String,
    /// Application id the message belongs to
    pub category: String,
    pub app_data: Vec<AppData>,
    pub persistent_id: Option<PersistentId>,
    /// Time to live in seconds; 0 means "deliver now or never"
    pub ttl: u32,
    /// Creation time in seconds since the epoch
    pub sent: u64,
    /// Seconds the message spent queued on the device
    pub queued: u32,
    pub device_user_id: i64,
    pub last_stream_id_received: StreamId,
}

impl DataMessageStanza {
    pub fn app_data_value(&self, key: &str) -> Option<&str> {
        self.app_data
            .iter()
            .find(|data| data.key == key)
            .map(|data| data.value.as_str())
    }
}

// ----------------------------------------------------------------------------
// Packet Enum
// ----------------------------------------------------------------------------

/// One MCS protocol frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum McsPacket {
    LoginRequest(LoginRequest),
    LoginResponse(LoginResponse),
    HeartbeatPing(HeartbeatPing),
    HeartbeatAck(HeartbeatAck),
    Close,
    IqStanza(IqStanza),
    DataMessage(DataMessageStanza),
}

impl McsPacket {
    pub fn tag(&self) -> PacketTag {
        match self {
            McsPacket::LoginRequest(_) => PacketTag::LoginRequest,
            McsPacket::LoginResponse(_) => PacketTag::LoginResponse,
            McsPacket::HeartbeatPing(_) => PacketTag::HeartbeatPing,
            McsPacket::HeartbeatAck(_) => PacketTag::HeartbeatAck,
            McsPacket::Close => PacketTag::Close,
            McsPacket::IqStanza(_) => PacketTag::IqStanza,
            McsPacket::DataMessage(_) => PacketTag::DataMessage,
        }
    }

    pub fn persistent_id(&self) -> Option<&PersistentId> {
        match self {
            McsPacket::IqStanza(iq) => iq.persistent_id.as_ref(),
            McsPacket::DataMessage(data) => data.persistent_id.as_ref(),
            _ => None,
        }
    }

    /// Stamp a persistent id; frames that cannot carry one ignore it
    pub fn set_persistent_id(&mut self, id: PersistentId) {
        match self {
            McsPacket::IqStanza(iq) => iq.persistent_id = Some(id),
            McsPacket::DataMessage(data) => data.persistent_id = Some(id),
            _ => {}
        }
    }

    pub fn last_stream_id_received(&self) -> StreamId {
        match self {
            McsPacket::LoginRequest(p) => p.last_stream_id_received,
            McsPacket::LoginResponse(p) => p.last_stream_id_received,
            McsPacket::HeartbeatPing(p) => p.last_stream_id_received,
            McsPacket::HeartbeatAck(p) => p.last_stream_id_received,
            McsPacket::Close => 0,
            McsPacket::IqStanza(p) => p.last_stream_id_received,
            McsPacket::DataMessage(p) => p.last_stream_id_received,
        }
    }

    pub fn set_last_stream_id_received(&mut self, stream_id: StreamId) {
        match self {
            McsPacket::LoginRequest(p) => p.last_stream_id_received = stream_id,
            McsPacket::LoginResponse(p) => p.last_stream_id_received = stream_id,
            McsPacket::HeartbeatPing(p) => p.last_stream_id_received = stream_id,
            McsPacket::HeartbeatAck(p) => p.last_stream_id_received = stream_id,
            McsPacket::Close => {}
            McsPacket::IqStanza(p) => p.last_stream_id_received = stream_id,
            McsPacket::DataMessage(p) => p.last_stream_id_received = stream_id,
        }
    }

    /// Time to live in seconds; only data messages carry one
    pub fn ttl(&self) -> u32 {
        match self {
            McsPacket::DataMessage(data) => data.ttl,
            _ => 0,
        }
    }

    /// A message expires strictly after `sent + ttl`
    pub fn has_ttl_expired(&self, now: Timestamp) -> bool {
        match self {
            McsPacket::DataMessage(data) if data.ttl > 0 => {
                let deadline = Timestamp::from_secs(data.sent.saturating_add(u64::from(data.ttl)));
                now > deadline
            }
            _ => false,
        }
    }

    /// Encoded size used for admission control
    pub fn serialized_size(&self) -> Result<u64> {
        Ok(bincode::serialized_size(self)?)
    }

    pub fn as_data_message(&self) -> Option<&DataMessageStanza> {
        match self {
            McsPacket::DataMessage(data) => Some(data),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Outgoing Envelope
// ----------------------------------------------------------------------------

/// An outbound frame together with its delivery bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingPacket {
    /// Assigned when the frame is written to the wire; 0 until then
    pub stream_id: StreamId,
    /// Present only for frames with TTL > 0
    pub persistent_id: Option<PersistentId>,
    pub tag: PacketTag,
    pub packet: McsPacket,
}

impl OutgoingPacket {
    pub fn new(packet: McsPacket) -> Self {
        Self {
            stream_id: 0,
            persistent_id: packet.persistent_id().cloned(),
            tag: packet.tag(),
            packet,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent_id.is_some()
    }
}
