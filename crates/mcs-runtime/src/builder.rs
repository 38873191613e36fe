//! Runtime Builder API
//!
//! Wires a [`MessageClient`] to its channels, restores it from the store and
//! spawns the client and storage tasks. Consumers get a [`RuntimeHandle`]
//! for commands and app events, and transports attach through
//! [`RuntimeHandle::transport_handle`].

use mcs_core::{
    ClientStats, DeviceCredentials, McsConfig, McsError, McsPacket, MemoryStore, MessageClient,
    Result, SystemTimeSource,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::channel::{
    create_app_event_channel, create_command_channel, create_effect_channel, create_event_channel,
    create_storage_channel, AppEventReceiver, Command, CommandSender, Effect, EffectReceiver,
    EffectSender, Event, EventSender,
};
use crate::connection::ChannelConnection;
use crate::storage::{ChannelStore, StorageTask};
use crate::task::ClientTask;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

// ----------------------------------------------------------------------------
// Runtime Builder
// ----------------------------------------------------------------------------

pub struct RuntimeBuilder {
    config: McsConfig,
    store: Option<MemoryStore>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config: McsConfig::default(),
            store: None,
        }
    }

    pub fn with_config(mut self, config: McsConfig) -> Self {
        self.config = config;
        self
    }

    /// Backend to restore from and persist into; defaults to an empty store
    pub fn with_store(mut self, store: MemoryStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Restore the client and spawn its tasks
    pub async fn build_and_start(self) -> Result<RuntimeHandle> {
        self.config.validate().map_err(McsError::config_error)?;
        info!("Building MCS runtime");

        let channels = &self.config.channels;
        let (command_sender, command_receiver) = create_command_channel(channels);
        let (event_sender, event_receiver) = create_event_channel(channels);
        let (app_event_sender, app_event_receiver) = create_app_event_channel(channels);
        let (storage_sender, storage_receiver) = create_storage_channel(channels);
        let effect_sender = create_effect_channel(channels);

        let store = self
            .store
            .unwrap_or_else(|| MemoryStore::new(self.config.store.max_outgoing_per_app));
        let loaded = store.load();
        let channel_store =
            ChannelStore::new(storage_sender, self.config.store.max_outgoing_per_app, &loaded);

        let mut client = MessageClient::new(
            &self.config,
            ChannelConnection::new(effect_sender.clone()),
            channel_store,
            SystemTimeSource::new(),
        );
        client.initialize(loaded)?;

        let storage_task = StorageTask::new(store, storage_receiver, event_sender.clone());
        let storage_handle = tokio::spawn(storage_task.run());

        let client_task = ClientTask::new(client, command_receiver, event_receiver, app_event_sender);
        let client_handle = tokio::spawn(client_task.run());

        info!("MCS runtime started");

        Ok(RuntimeHandle {
            command_sender,
            event_sender,
            effect_sender,
            app_event_receiver: Some(app_event_receiver),
            client_handle: Some(client_handle),
            storage_handle: Some(storage_handle),
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Runtime Handle
// ----------------------------------------------------------------------------

/// Channels a transport uses to drive the client
#[derive(Debug)]
pub struct TransportHandle {
    pub event_sender: EventSender,
    pub effect_receiver: EffectReceiver,
}

impl TransportHandle {
    /// Next effect for this transport, or `None` once the client task is gone.
    ///
    /// A transport that falls more than the effect buffer behind loses the
    /// oldest effects. The loss is logged and reading resumes at the oldest
    /// retained effect.
    pub async fn next_effect(&mut self) -> Option<Effect> {
        loop {
            match self.effect_receiver.recv().await {
                Ok(effect) => return Some(effect),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Transport lagged, {} effects dropped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Handle to a running client
pub struct RuntimeHandle {
    command_sender: CommandSender,
    event_sender: EventSender,
    effect_sender: EffectSender,
    app_event_receiver: Option<AppEventReceiver>,
    client_handle: Option<JoinHandle<Result<ClientStats>>>,
    storage_handle: Option<JoinHandle<MemoryStore>>,
}

impl RuntimeHandle {
    pub fn command_sender(&self) -> CommandSender {
        self.command_sender.clone()
    }

    /// Subscribe a transport; only effects published after this call are seen
    pub fn transport_handle(&self) -> TransportHandle {
        TransportHandle {
            event_sender: self.event_sender.clone(),
            effect_receiver: self.effect_sender.subscribe(),
        }
    }

    /// Take the app event receiver (can only be called once)
    pub fn take_app_event_receiver(&mut self) -> Option<AppEventReceiver> {
        self.app_event_receiver.take()
    }

    pub async fn send_command(&self, command: Command) -> Result<()> {
        self.command_sender
            .send(command)
            .await
            .map_err(|_| McsError::channel_error("Failed to send command to client task"))
    }

    pub async fn login(&self, credentials: DeviceCredentials, user_serial_numbers: Vec<i64>) -> Result<()> {
        self.send_command(Command::Login {
            credentials,
            user_serial_numbers,
        })
        .await
    }

    pub async fn send_message(&self, packet: McsPacket) -> Result<()> {
        self.send_command(Command::SendMessage(packet)).await
    }

    /// Inject a transport event without a subscribed [`TransportHandle`]
    pub async fn send_event(&self, event: Event) -> Result<()> {
        self.event_sender
            .send(event)
            .await
            .map_err(|_| McsError::channel_error("Failed to send event to client task"))
    }

    pub fn is_running(&self) -> bool {
        self.client_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the client task and hand back its final statistics and store
    ///
    /// The storage task drains outstanding writes before it returns.
    pub async fn shutdown(&mut self) -> Result<(ClientStats, MemoryStore)> {
        info!("Shutting down MCS runtime");
        if let Err(e) = self.send_command(Command::Shutdown).await {
            warn!("Client task already gone: {}", e);
        }

        let stats = match self.client_handle.take() {
            Some(handle) => match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(result)) => result?,
                Ok(Err(e)) => {
                    return Err(McsError::channel_error(format!("Client task panicked: {}", e)))
                }
                Err(_) => return Err(McsError::channel_error("Client task did not stop in time")),
            },
            None => return Err(McsError::channel_error("Runtime already shut down")),
        };

        let store = match self.storage_handle.take() {
            Some(handle) => match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(store)) => store,
                Ok(Err(e)) => {
                    return Err(McsError::channel_error(format!("Storage task panicked: {}", e)))
                }
                Err(_) => return Err(McsError::channel_error("Storage task did not stop in time")),
            },
            None => return Err(McsError::channel_error("Runtime already shut down")),
        };

        info!("MCS runtime shut down");
        Ok((stats, store))
    }
}

/// Runtime with testing presets and an empty store
pub async fn create_test_runtime() -> Result<RuntimeHandle> {
    RuntimeBuilder::new()
        .with_config(McsConfig::testing())
        .build_and_start()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcs_core::ConnectionResetReason;

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = McsConfig::testing();
        config.heartbeat.ack_timeout_ms = config.heartbeat.interval_ms;
        let result = RuntimeBuilder::new().with_config(config).build_and_start().await;
        assert!(matches!(result, Err(McsError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_shutdown_returns_stats_and_store() {
        let mut runtime = create_test_runtime().await.unwrap();
        assert!(runtime.is_running());
        assert!(runtime.take_app_event_receiver().is_some());
        assert!(runtime.take_app_event_receiver().is_none());

        let (stats, store) = runtime.shutdown().await.unwrap();
        assert_eq!(stats, ClientStats::default());
        assert_eq!(store.outgoing_len(), 0);
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn test_lagging_transport_skips_to_oldest_retained_effect() {
        let (effect_sender, effect_receiver) = tokio::sync::broadcast::channel(2);
        let (event_sender, _event_receiver) = tokio::sync::mpsc::channel(1);
        let mut transport = TransportHandle {
            event_sender,
            effect_receiver,
        };

        effect_sender.send(Effect::Connect).unwrap();
        effect_sender
            .send(Effect::ResetConnection(ConnectionResetReason::CloseCommand))
            .unwrap();
        effect_sender
            .send(Effect::ResetConnection(ConnectionResetReason::HeartbeatFailure))
            .unwrap();

        assert_eq!(
            transport.next_effect().await,
            Some(Effect::ResetConnection(ConnectionResetReason::CloseCommand))
        );
        assert_eq!(
            transport.next_effect().await,
            Some(Effect::ResetConnection(ConnectionResetReason::HeartbeatFailure))
        );

        drop(effect_sender);
        assert_eq!(transport.next_effect().await, None);
    }
}
