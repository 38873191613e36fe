//! MCS message client
//!
//! [`MessageClient`] is the orchestrator of the reliable delivery protocol:
//! it admits outgoing messages, drives the send queue whenever the
//! connection is reachable, rebuilds its state for every (re)connection and
//! dispatches every inbound frame. It performs no IO of its own; the
//! connection, the store and the clock are injected, and all output for the
//! application is queued as [`ClientEvent`]s.
//!
//! Work that must not run re-entrantly (delivering a frame upward, retrying
//! the send queue after an expiry) is posted to a FIFO of
//! [`DeferredTask`]s which the owner drains with
//! [`MessageClient::run_pending_tasks`] after each input.

use std::collections::VecDeque;

use tracing::{debug, error, info, trace, warn};

use crate::config::{ClientConfig, McsConfig};
use crate::delivery::{ClientEvent, MessageSendStatus, SendStatusReport};
use crate::errors::{McsError, Result, StoreError};
use crate::packet::{
    AppData, DataMessageStanza, HeartbeatAck, HeartbeatPing, IqExtension, IqStanza, LoginRequest,
    LoginResponse, McsPacket, OutgoingPacket, GCM_FROM_FIELD, IDLE_NOTIFICATION_KEY,
    MCS_CATEGORY,
};
use crate::persistence::{restore_outgoing, LoadResult, McsStore, StoreResult};
use crate::protocol::{AckOutcome, AckTracker, ClientState, HeartbeatAction, HeartbeatMonitor};
use crate::transport::{ConnectionFactory, ConnectionResetReason};
use crate::types::{DeviceCredentials, PersistentId, PersistentIdGenerator, TimeSource, Timestamp};

// ----------------------------------------------------------------------------
// Deferred Tasks
// ----------------------------------------------------------------------------

/// Work posted for later execution on the client's own context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredTask {
    MaybeSendMessage,
    DeliverMessage(McsPacket),
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Counters describing the client's activity since construction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    /// Outgoing messages confirmed by the server
    pub messages_acked: u64,
    pub messages_expired: u64,
    pub admission_failures: u64,
    pub store_failures: u64,
    pub heartbeat_pings: u64,
    pub connection_resets: u64,
}

// ----------------------------------------------------------------------------
// Message Client
// ----------------------------------------------------------------------------

pub struct MessageClient<C, S, T> {
    config: ClientConfig,
    state: ClientState,
    initialized: bool,
    credentials: DeviceCredentials,
    user_serial_numbers: Vec<i64>,
    connection: C,
    store: S,
    time_source: T,
    tracker: AckTracker,
    heartbeat: HeartbeatMonitor,
    id_generator: PersistentIdGenerator,
    pending_tasks: VecDeque<DeferredTask>,
    events: VecDeque<ClientEvent>,
    stats: ClientStats,
}

impl<C, S, T> MessageClient<C, S, T>
where
    C: ConnectionFactory,
    S: McsStore,
    T: TimeSource,
{
    pub fn new(config: &McsConfig, connection: C, store: S, time_source: T) -> Self {
        Self {
            config: config.client.clone(),
            state: ClientState::Uninitialized,
            initialized: false,
            credentials: DeviceCredentials::default(),
            user_serial_numbers: Vec::new(),
            connection,
            store,
            time_source,
            tracker: AckTracker::new(),
            heartbeat: HeartbeatMonitor::new(&config.heartbeat),
            id_generator: PersistentIdGenerator::new(),
            pending_tasks: VecDeque::new(),
            events: VecDeque::new(),
            stats: ClientStats::default(),
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Take over the persisted state loaded by the owner
    pub fn initialize(&mut self, load_result: LoadResult) -> Result<()> {
        if self.initialized {
            return Err(McsError::AlreadyInitialized);
        }
        if self.state != ClientState::Uninitialized {
            return Err(McsError::invalid_state(ClientState::Uninitialized, self.state));
        }

        // Drop whatever an earlier, rejected session left queued.
        self.tracker = AckTracker::new();
        self.heartbeat.stop();

        let credentials = load_result.credentials;
        if credentials.is_new_client() {
            debug!("No device credentials found, assuming new client");
            self.credentials = credentials;
            self.initialized = true;
            self.state = ClientState::Loaded;
            return Ok(());
        }
        if credentials.security_token == 0 {
            warn!("Loaded android id without a security token");
        }

        debug!(
            "Store load finished with {} incoming acks pending and {} outgoing messages pending",
            load_result.incoming_messages.len(),
            load_result.outgoing_messages.len()
        );

        let now = self.time_source.now();
        let restored = restore_outgoing(load_result.outgoing_messages, now)?;
        if let Some(newest) = restored.newest_timestamp {
            self.id_generator.observe(newest);
        }

        self.initialized = true;
        self.state = ClientState::Loaded;
        self.credentials = credentials;

        let mut expired_ids = Vec::with_capacity(restored.expired.len());
        for packet in &restored.expired {
            if let Some(id) = &packet.persistent_id {
                expired_ids.push(id.clone());
            }
            self.stats.messages_expired += 1;
            self.notify_send_status(&packet.packet, MessageSendStatus::TtlExceeded);
        }
        if !expired_ids.is_empty() {
            let result = self.store.remove_outgoing_messages(&expired_ids);
            self.record_store_result(result);
        }

        self.tracker
            .restore(restored.live, load_result.incoming_messages);
        Ok(())
    }

    /// Request a connection with the given device credentials
    pub fn login(&mut self, credentials: DeviceCredentials, user_serial_numbers: Vec<i64>) -> Result<()> {
        if self.state != ClientState::Loaded {
            return Err(McsError::invalid_state(ClientState::Loaded, self.state));
        }
        if !credentials.is_complete() {
            return Err(McsError::MissingCredentials);
        }

        let loaded = self.credentials;
        if loaded != credentials {
            if loaded.android_id != 0 || loaded.security_token != 0 {
                return Err(McsError::CredentialMismatch);
            }
            info!("Adopting freshly checked-in device {}", credentials.android_id);
            self.credentials = credentials;
        }
        self.user_serial_numbers = user_serial_numbers;

        self.state = ClientState::Connecting;
        self.connection.connect();
        Ok(())
    }

    /// Wipe all persisted state
    pub fn destroy(&mut self) {
        info!("Destroying persisted client state");
        let result = self.store.destroy();
        self.record_store_result(result);
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    /// Admit a message for delivery
    ///
    /// The returned status is the admission result; data messages also get
    /// it (and every later status change) as a [`ClientEvent::SendStatus`].
    pub fn send_message(&mut self, mut packet: McsPacket) -> MessageSendStatus {
        if self.tracker.send_queue_len() >= self.config.max_send_queue_size {
            return self.reject(&packet, MessageSendStatus::QueueSizeLimitReached);
        }

        let size = match packet.serialized_size() {
            Ok(size) => size,
            Err(err) => {
                error!("Unable to size outgoing message: {}", err);
                u64::MAX
            }
        };
        if size > self.config.max_message_bytes as u64 {
            return self.reject(&packet, MessageSendStatus::MessageTooLarge);
        }

        let outgoing = if packet.ttl() > 0 {
            let id = self.id_generator.next_id(self.time_source.now());
            trace!("Setting persistent id to {}", id);
            packet.set_persistent_id(id.clone());
            match self.store.add_outgoing_message(&id, &packet) {
                Ok(()) => {}
                Err(StoreError::AppQuotaExceeded { app_id, limit }) => {
                    debug!("App {} reached its outgoing quota of {}", app_id, limit);
                    return self.reject(&packet, MessageSendStatus::AppQueueSizeLimitReached);
                }
                Err(err) => self.record_store_result(Err(err)),
            }
            OutgoingPacket::new(packet)
        } else if !self.connection.is_endpoint_reachable() {
            debug!("No active connection, dropping zero TTL message");
            return self.reject(&packet, MessageSendStatus::NoConnectionOnZeroTtl);
        } else {
            let mut outgoing = OutgoingPacket::new(packet);
            outgoing.persistent_id = None;
            outgoing
        };

        self.notify_send_status(&outgoing.packet, MessageSendStatus::Queued);
        self.tracker.enqueue(outgoing);
        self.maybe_send_message();
        MessageSendStatus::Queued
    }

    /// Transmit the head of the send queue if the endpoint is reachable
    pub fn maybe_send_message(&mut self) {
        if self.tracker.send_queue_len() == 0 {
            return;
        }
        // Reconnection invokes this again.
        if !self.connection.is_endpoint_reachable() {
            return;
        }
        let Some(packet) = self.tracker.pop_next_to_send() else {
            return;
        };

        let now = self.time_source.now();
        if packet.packet.has_ttl_expired(now) {
            debug!("Dropping expired message {:?}", packet.persistent_id);
            self.stats.messages_expired += 1;
            self.notify_send_status(&packet.packet, MessageSendStatus::TtlExceeded);
            if let Some(id) = &packet.persistent_id {
                let result = self.store.remove_outgoing_message(id);
                self.record_store_result(result);
            }
            self.post_task(DeferredTask::MaybeSendMessage);
            return;
        }

        trace!("Pending output message found, sending");
        let frame = self.tracker.transmit(packet, now);
        self.stats.frames_sent += 1;
        self.connection.send(frame);

        // Stands in for the write-completion callback of the connection.
        if self.tracker.send_queue_len() > 0 {
            self.post_task(DeferredTask::MaybeSendMessage);
        }
    }

    // ------------------------------------------------------------------------
    // Connection callbacks
    // ------------------------------------------------------------------------

    /// The transport is about to (re)connect and needs the login frame
    pub fn on_connection_opening(&mut self) -> Result<LoginRequest> {
        self.reset_state_and_build_login_request()
    }

    /// A decoded frame arrived from the server
    pub fn on_packet_received(&mut self, packet: McsPacket) {
        self.handle_packet_from_wire(packet);
    }

    /// The endpoint became reachable (or stopped being so)
    pub fn on_reachability_changed(&mut self) {
        self.maybe_send_message();
    }

    /// Rebuild per-connection state and produce the login request
    pub fn reset_state_and_build_login_request(&mut self) -> Result<LoginRequest> {
        if !self.state.can_transition_to(ClientState::Connecting) {
            return Err(McsError::invalid_state(ClientState::Loaded, self.state));
        }
        if !self.credentials.is_complete() {
            return Err(McsError::MissingCredentials);
        }

        self.heartbeat.stop();

        let now = self.time_source.now();
        let outcome = self
            .tracker
            .reset_for_login(&self.credentials, &self.user_serial_numbers, now);

        let mut expired_ids = Vec::new();
        for packet in &outcome.dropped {
            // TTL 0 messages were never persisted
            if let Some(id) = &packet.persistent_id {
                expired_ids.push(id.clone());
            }
            self.stats.messages_expired += 1;
            self.notify_send_status(&packet.packet, MessageSendStatus::TtlExceeded);
        }
        if !expired_ids.is_empty() {
            debug!("Connection reset, {} messages expired", expired_ids.len());
            let result = self.store.remove_outgoing_messages(&expired_ids);
            self.record_store_result(result);
        }

        self.state = ClientState::Connecting;
        Ok(outcome.login)
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    /// Single entry point for every frame received from the server
    pub fn handle_packet_from_wire(&mut self, packet: McsPacket) {
        let persistent_id = packet.persistent_id().cloned();
        let last_stream_id_received = packet.last_stream_id_received();

        if last_stream_id_received != 0 {
            let outcome = self.tracker.handle_stream_ack(last_stream_id_received);
            self.apply_ack_outcome(outcome);
        }

        let stream_id = self.tracker.record_incoming(persistent_id.clone());
        self.stats.frames_received += 1;
        if let Some(id) = &persistent_id {
            let result = self.store.add_incoming_message(id);
            self.record_store_result(result);
        }

        trace!(
            "Received {:?} with persistent id {:?}, stream id {} and last stream id received {}",
            packet.tag(),
            persistent_id,
            stream_id,
            last_stream_id_received
        );

        let unacked = self.tracker.unacked_server_count();
        if unacked > 0 && unacked % self.config.unacked_before_stream_ack.max(1) == 0 {
            self.send_message(McsPacket::IqStanza(IqStanza::stream_ack()));
        }

        // Any frame proves the connection is alive.
        self.heartbeat.on_activity(self.time_source.now());

        match packet {
            McsPacket::LoginResponse(response) => self.handle_login_response(response),
            McsPacket::HeartbeatPing(_) => {
                trace!("Received heartbeat ping, sending ack");
                self.send_message(McsPacket::HeartbeatAck(HeartbeatAck::default()));
            }
            McsPacket::HeartbeatAck(_) => {
                trace!("Received heartbeat ack");
            }
            McsPacket::Close => {
                error!("Received close command, resetting connection");
                self.state = ClientState::Loaded;
                self.stats.connection_resets += 1;
                self.connection
                    .signal_connection_reset(ConnectionResetReason::CloseCommand);
            }
            McsPacket::IqStanza(iq) => match iq.extension {
                Some(IqExtension::SelectiveAck(ids)) => {
                    let outcome = self.tracker.handle_selective_ack(&ids);
                    self.apply_ack_outcome(outcome);
                }
                // The last received stream id was already processed above.
                Some(IqExtension::StreamAck) => {}
                Some(IqExtension::Unknown { id, .. }) => {
                    warn!("Received invalid iq stanza extension {}", id);
                }
                None => warn!("Received iq stanza without extension"),
            },
            McsPacket::DataMessage(message) => {
                if message.category == MCS_CATEGORY {
                    self.handle_mcs_data_message(&message);
                } else {
                    self.post_task(DeferredTask::DeliverMessage(McsPacket::DataMessage(message)));
                }
            }
            McsPacket::LoginRequest(_) => {
                error!("Received unexpected login request from server");
            }
        }
    }

    fn handle_login_response(&mut self, response: LoginResponse) {
        if self.state != ClientState::Connecting {
            warn!("Dropping login response received while {}", self.state);
            return;
        }
        debug!(
            "Received login response {} at server time {}",
            response.id, response.server_timestamp
        );

        if let Some(rejection) = response.rejection() {
            warn!(
                "Login rejected with code {}: {}",
                rejection.code, rejection.message
            );
            let err = McsError::login_rejected(rejection.code, rejection.message.clone());
            // The owner re-initializes from the store before logging in again.
            self.state = ClientState::Uninitialized;
            self.initialized = false;
            self.events.push_back(ClientEvent::Error(err));
            return;
        }

        if let Some(heartbeat_config) = response.heartbeat_config {
            self.heartbeat.update_interval(heartbeat_config.interval_ms);
        }

        info!("Logged in as {}", self.credentials.android_id);
        self.state = ClientState::Connected;
        self.tracker.on_login_accepted();

        self.post_task(DeferredTask::DeliverMessage(McsPacket::LoginResponse(response)));
        if self.tracker.send_queue_len() > 0 {
            self.post_task(DeferredTask::MaybeSendMessage);
        }

        self.heartbeat.start(self.time_source.now());
    }

    /// Answer control messages addressed to the client itself
    fn handle_mcs_data_message(&mut self, message: &DataMessageStanza) {
        let mut response = DataMessageStanza {
            from: GCM_FROM_FIELD.to_string(),
            sent: self.time_source.now().as_secs(),
            ttl: 0,
            ..DataMessageStanza::default()
        };

        for data in &message.app_data {
            if data.key == IDLE_NOTIFICATION_KEY {
                // The client is never idle while connected.
                response.app_data.push(AppData::new(IDLE_NOTIFICATION_KEY, "false"));
                response.category = MCS_CATEGORY.to_string();
            }
        }

        if !response.app_data.is_empty() {
            self.send_message(McsPacket::DataMessage(response));
        }
    }

    fn apply_ack_outcome(&mut self, outcome: AckOutcome) {
        for packet in &outcome.acked {
            self.stats.messages_acked += 1;
            self.notify_send_status(&packet.packet, MessageSendStatus::Sent);
        }
        if !outcome.outgoing_ids_to_remove.is_empty() {
            let result = self.store.remove_outgoing_messages(&outcome.outgoing_ids_to_remove);
            self.record_store_result(result);
        }
        if !outcome.incoming_ids_to_remove.is_empty() {
            let result = self.store.remove_incoming_messages(&outcome.incoming_ids_to_remove);
            self.record_store_result(result);
        }
    }

    // ------------------------------------------------------------------------
    // Timers and deferred work
    // ------------------------------------------------------------------------

    /// Wake-up for the heartbeat deadline
    pub fn on_heartbeat_timer(&mut self) -> Option<HeartbeatAction> {
        let action = self.heartbeat.poll(self.time_source.now())?;
        match action {
            HeartbeatAction::SendPing => {
                self.stats.heartbeat_pings += 1;
                self.send_message(McsPacket::HeartbeatPing(HeartbeatPing::default()));
            }
            HeartbeatAction::ConnectionTimedOut => {
                self.stats.connection_resets += 1;
                self.connection
                    .signal_connection_reset(ConnectionResetReason::HeartbeatFailure);
            }
        }
        Some(action)
    }

    pub fn next_heartbeat_deadline(&self) -> Option<Timestamp> {
        self.heartbeat.next_deadline()
    }

    /// Execute posted work until none is left; returns the number of tasks run
    pub fn run_pending_tasks(&mut self) -> usize {
        let mut executed = 0;
        while let Some(task) = self.pending_tasks.pop_front() {
            executed += 1;
            match task {
                DeferredTask::MaybeSendMessage => self.maybe_send_message(),
                DeferredTask::DeliverMessage(packet) => {
                    self.events.push_back(ClientEvent::MessageReceived(packet));
                }
            }
        }
        executed
    }

    pub fn has_pending_tasks(&self) -> bool {
        !self.pending_tasks.is_empty()
    }

    /// Completion of an asynchronous store write
    pub fn on_store_update_finished(&mut self, success: bool) {
        if !success {
            error!("Store update failed");
            self.stats.store_failures += 1;
        }
    }

    // ------------------------------------------------------------------------
    // Outputs and accessors
    // ------------------------------------------------------------------------

    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        self.events.drain(..).collect()
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn credentials(&self) -> DeviceCredentials {
        self.credentials
    }

    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    pub fn tracker(&self) -> &AckTracker {
        &self.tracker
    }

    pub fn send_queue_len(&self) -> usize {
        self.tracker.send_queue_len()
    }

    pub fn resend_queue_len(&self) -> usize {
        self.tracker.resend_queue_len()
    }

    /// Persistent ids of queued (not yet transmitted) messages, in order
    pub fn queued_ids(&self) -> Vec<PersistentId> {
        self.tracker
            .send_queue()
            .filter_map(|packet| packet.persistent_id.clone())
            .collect()
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn time_source(&self) -> &T {
        &self.time_source
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn post_task(&mut self, task: DeferredTask) {
        self.pending_tasks.push_back(task);
    }

    fn reject(&mut self, packet: &McsPacket, status: MessageSendStatus) -> MessageSendStatus {
        self.stats.admission_failures += 1;
        self.notify_send_status(packet, status);
        status
    }

    fn notify_send_status(&mut self, packet: &McsPacket, status: MessageSendStatus) {
        if let Some(report) = SendStatusReport::for_packet(packet, status) {
            self.events.push_back(ClientEvent::SendStatus(report));
        }
    }

    fn record_store_result(&mut self, result: StoreResult) {
        if let Err(err) = result {
            error!("Store write failed: {}", err);
            self.stats.store_failures += 1;
        }
    }
}

impl<C, S, T> core::fmt::Debug for MessageClient<C, S, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MessageClient")
            .field("state", &self.state)
            .field("credentials", &self.credentials)
            .field("tracker", &self.tracker)
            .field("pending_tasks", &self.pending_tasks.len())
            .field("stats", &self.stats)
            .finish()
    }
}
