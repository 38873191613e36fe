//! MCS Client Core
//!
//! Sans-io core of the Mobile Connection Server client: a reliable, ordered,
//! store-and-forward message delivery engine that rides on an externally
//! managed persistent connection. It covers stream sequencing, cumulative
//! and selective acknowledgment, persistence-backed retry, TTL expiry,
//! queue admission control and heartbeat liveness detection.
//!
//! The connection, the durable store and the clock are injected through the
//! [`ConnectionFactory`], [`McsStore`] and [`TimeSource`] traits; the tokio
//! hosting lives in the `mcs-runtime` crate.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod client;
pub mod config;
pub mod delivery;
pub mod errors;
pub mod packet;
pub mod persistence;
pub mod protocol;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use client::{ClientStats, DeferredTask, MessageClient};
pub use config::{
    ChannelConfig, ClientConfig, ConfigBuilderError, HeartbeatConfig, McsConfig, McsConfigBuilder,
    StoreConfig,
};
pub use delivery::{ClientEvent, MessageSendStatus, SendStatusReport};
pub use errors::{McsError, McsResult, Result, StoreError};
pub use packet::{
    AppData, DataMessageStanza, HeartbeatAck, HeartbeatPing, IqExtension, IqStanza, IqType,
    LoginError, LoginRequest, LoginResponse, McsPacket, OutgoingPacket, PacketTag,
    ServerHeartbeatConfig, MCS_CATEGORY,
};
pub use persistence::{restore_outgoing, LoadResult, McsStore, MemoryStore, StoreResult};
pub use protocol::{AckOutcome, AckTracker, ClientState, HeartbeatAction, HeartbeatMonitor};
pub use transport::{ConnectionFactory, ConnectionResetReason};
pub use types::{
    DeviceCredentials, PersistentId, PersistentIdGenerator, StreamId, SystemTimeSource,
    TimeSource, Timestamp,
};
