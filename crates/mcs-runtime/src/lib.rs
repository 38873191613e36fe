//! MCS Runtime
//!
//! Hosts one `mcs-core` [`MessageClient`](mcs_core::MessageClient) inside a
//! tokio runtime:
//! - `ClientTask`: the single task that owns the client and serialises every
//!   input to it
//! - `ChannelConnection`: connection factory that talks to a transport
//!   through effects and events
//! - `ChannelStore` / `StorageTask`: store writes handed to a separate task
//! - `RuntimeBuilder` / `RuntimeHandle`: construction and control
//!
//! The transport (socket, TLS, framing) is supplied by the consumer through
//! a [`TransportHandle`].

pub mod builder;
pub mod channel;
pub mod config_file;
pub mod connection;
pub mod logging;
pub mod storage;
pub mod task;

pub use builder::{create_test_runtime, RuntimeBuilder, RuntimeHandle, TransportHandle};
pub use channel::{
    AppEvent, AppEventReceiver, AppEventSender, Command, CommandReceiver, CommandSender, Effect,
    EffectReceiver, EffectSender, Event, EventReceiver, EventSender, StorageRequest,
};
pub use config_file::{load_config, parse_config};
pub use connection::ChannelConnection;
pub use logging::{init_logging, init_test_logging};
pub use storage::{ChannelStore, StorageTask};
pub use task::{ClientTask, RuntimeClient};

// Re-export core types for convenience
pub use mcs_core::{
    ClientStats, DeviceCredentials, McsConfig, McsError, McsPacket, MemoryStore,
    MessageSendStatus, Result, SendStatusReport,
};
