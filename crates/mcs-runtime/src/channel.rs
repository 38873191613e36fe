//! Messages exchanged between the client task and its surroundings
//!
//! - [`Command`]: application → client task
//! - [`Event`]: transport and storage → client task
//! - [`Effect`]: client task → transport (broadcast)
//! - [`AppEvent`]: client task → application
//! - [`StorageRequest`]: client task → storage task

use mcs_core::{
    ChannelConfig, ClientEvent, ClientStats, ConnectionResetReason, DeviceCredentials,
    LoginRequest, McsPacket, PersistentId, SendStatusReport,
};
use tokio::sync::{broadcast, mpsc};

// ----------------------------------------------------------------------------
// Message Types
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Command {
    Login {
        credentials: DeviceCredentials,
        user_serial_numbers: Vec<i64>,
    },
    SendMessage(McsPacket),
    GetStats,
    Destroy,
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum Event {
    /// The transport is (re)connecting and needs a login frame
    ConnectionOpening,
    /// A decoded frame arrived from the server
    PacketReceived(McsPacket),
    ReachabilityChanged { reachable: bool },
    /// An earlier storage request completed
    StoreUpdateFinished { success: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start establishing the connection
    Connect,
    SendLogin(LoginRequest),
    SendPacket(McsPacket),
    ResetConnection(ConnectionResetReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    MessageReceived(McsPacket),
    SendStatus(SendStatusReport),
    Error { message: String },
    Stats(ClientStats),
}

impl From<ClientEvent> for AppEvent {
    fn from(event: ClientEvent) -> Self {
        match event {
            ClientEvent::MessageReceived(packet) => AppEvent::MessageReceived(packet),
            ClientEvent::SendStatus(report) => AppEvent::SendStatus(report),
            ClientEvent::Error(err) => AppEvent::Error {
                message: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub enum StorageRequest {
    AddOutgoing { id: PersistentId, packet: McsPacket },
    RemoveOutgoing(Vec<PersistentId>),
    AddIncoming(PersistentId),
    RemoveIncoming(Vec<PersistentId>),
    Destroy,
}

// ----------------------------------------------------------------------------
// Channel Types
// ----------------------------------------------------------------------------

pub type CommandSender = mpsc::Sender<Command>;
pub type CommandReceiver = mpsc::Receiver<Command>;
pub type EventSender = mpsc::Sender<Event>;
pub type EventReceiver = mpsc::Receiver<Event>;
pub type EffectSender = broadcast::Sender<Effect>;
pub type EffectReceiver = broadcast::Receiver<Effect>;
pub type AppEventSender = mpsc::Sender<AppEvent>;
pub type AppEventReceiver = mpsc::Receiver<AppEvent>;
pub type StorageSender = mpsc::Sender<StorageRequest>;
pub type StorageReceiver = mpsc::Receiver<StorageRequest>;

// ----------------------------------------------------------------------------
// Channel Creation
// ----------------------------------------------------------------------------

pub fn create_command_channel(config: &ChannelConfig) -> (CommandSender, CommandReceiver) {
    mpsc::channel(config.command_buffer_size)
}

pub fn create_event_channel(config: &ChannelConfig) -> (EventSender, EventReceiver) {
    mpsc::channel(config.event_buffer_size)
}

/// Effects fan out to every subscribed transport; receivers come from
/// [`broadcast::Sender::subscribe`]
pub fn create_effect_channel(config: &ChannelConfig) -> EffectSender {
    let (sender, _) = broadcast::channel(config.effect_buffer_size);
    sender
}

pub fn create_app_event_channel(config: &ChannelConfig) -> (AppEventSender, AppEventReceiver) {
    mpsc::channel(config.app_event_buffer_size)
}

pub fn create_storage_channel(config: &ChannelConfig) -> (StorageSender, StorageReceiver) {
    mpsc::channel(config.storage_buffer_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcs_core::{McsError, MessageSendStatus};

    #[test]
    fn test_client_events_map_to_app_events() {
        let report = SendStatusReport {
            device_user_id: 0,
            app_id: "app".to_string(),
            message_id: "m1".to_string(),
            status: MessageSendStatus::Sent,
        };
        assert_eq!(
            AppEvent::from(ClientEvent::SendStatus(report.clone())),
            AppEvent::SendStatus(report)
        );

        let err = ClientEvent::Error(McsError::login_rejected(3, "bad token"));
        assert!(matches!(AppEvent::from(err), AppEvent::Error { message } if message.contains("bad token")));
    }

    #[tokio::test]
    async fn test_effect_channel_fans_out() {
        let sender = create_effect_channel(&ChannelConfig::testing());
        let mut first = sender.subscribe();
        let mut second = sender.subscribe();

        sender.send(Effect::Connect).unwrap();
        assert_eq!(first.recv().await.unwrap(), Effect::Connect);
        assert_eq!(second.recv().await.unwrap(), Effect::Connect);
    }
}
