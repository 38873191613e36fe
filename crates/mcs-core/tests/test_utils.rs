//! Test utilities for deterministic testing of the MCS client
//!
//! Mock clock, an in-memory fake connection and fixtures that drive a client
//! through login so individual tests can start from a known state.

#![allow(dead_code)]

use mcs_core::{
    AppData, ConnectionFactory, ConnectionResetReason, DataMessageStanza, DeviceCredentials,
    IqStanza, LoginResponse, McsConfig, McsPacket, MemoryStore, MessageClient, PersistentId,
    TimeSource, Timestamp,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ----------------------------------------------------------------------------
// Mock Time Source
// ----------------------------------------------------------------------------

/// Mock time source for deterministic testing
///
/// Clones share the same clock, so a test can keep a handle while the client
/// owns another.
#[derive(Debug, Clone)]
pub struct MockTimeSource {
    current_time: Arc<AtomicU64>,
}

impl MockTimeSource {
    /// Create a new mock time source starting at a specific time (ms)
    pub fn new_at(start_time: u64) -> Self {
        Self {
            current_time: Arc::new(AtomicU64::new(start_time)),
        }
    }

    /// Advance time by the specified number of milliseconds
    pub fn advance(&self, millis: u64) {
        self.current_time.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the time to a specific value
    pub fn set_time(&self, millis: u64) {
        self.current_time.store(millis, Ordering::SeqCst);
    }
}

impl Default for MockTimeSource {
    fn default() -> Self {
        Self::new_at(START_TIME_MS)
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current_time.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Fake Connection
// ----------------------------------------------------------------------------

/// Records everything the client asks of the connection
#[derive(Debug, Default)]
pub struct FakeConnection {
    pub reachable: bool,
    pub connect_calls: usize,
    pub sent: Vec<McsPacket>,
    pub resets: Vec<ConnectionResetReason>,
}

impl FakeConnection {
    pub fn take_sent(&mut self) -> Vec<McsPacket> {
        std::mem::take(&mut self.sent)
    }

    pub fn sent_data_ids(&self) -> Vec<String> {
        self.sent
            .iter()
            .filter_map(|packet| packet.as_data_message().map(|m| m.id.clone()))
            .collect()
    }
}

impl ConnectionFactory for FakeConnection {
    fn connect(&mut self) {
        self.connect_calls += 1;
    }

    fn is_endpoint_reachable(&self) -> bool {
        self.reachable
    }

    fn send(&mut self, packet: McsPacket) {
        self.sent.push(packet);
    }

    fn signal_connection_reset(&mut self, reason: ConnectionResetReason) {
        self.reachable = false;
        self.resets.push(reason);
    }
}

// ----------------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------------

pub type TestClient = MessageClient<FakeConnection, MemoryStore, MockTimeSource>;

pub const START_TIME_MS: u64 = 1_000_000;
pub const CREDENTIALS: DeviceCredentials = DeviceCredentials {
    android_id: 4242,
    security_token: 9999,
};

/// Outgoing data message created "now"
pub fn data_message(id: &str, app: &str, ttl: u32, time: &MockTimeSource) -> McsPacket {
    McsPacket::DataMessage(DataMessageStanza {
        id: id.to_string(),
        to: "server".to_string(),
        category: app.to_string(),
        app_data: vec![AppData::new("payload", id)],
        ttl,
        sent: time.now().as_secs(),
        ..Default::default()
    })
}

/// Inbound data message carrying a server persistent id
pub fn inbound_data(persistent_id: &str, app: &str) -> McsPacket {
    McsPacket::DataMessage(DataMessageStanza {
        id: format!("in-{persistent_id}"),
        from: "server".to_string(),
        category: app.to_string(),
        persistent_id: Some(PersistentId::from(persistent_id)),
        ..Default::default()
    })
}

pub fn login_ok() -> McsPacket {
    McsPacket::LoginResponse(LoginResponse {
        id: "login".to_string(),
        error: None,
        heartbeat_config: None,
        last_stream_id_received: 1,
        server_timestamp: 0,
    })
}

pub fn selective_ack(ids: Vec<PersistentId>) -> McsPacket {
    McsPacket::IqStanza(IqStanza::selective_ack(ids))
}

pub fn client_with_store(store: MemoryStore, time: &MockTimeSource) -> TestClient {
    MessageClient::new(
        &McsConfig::testing(),
        FakeConnection::default(),
        store,
        time.clone(),
    )
}

/// Initialized client whose store knows the test credentials
pub fn loaded_client(time: &MockTimeSource) -> TestClient {
    let mut store = MemoryStore::new(1000);
    store.set_device_credentials(CREDENTIALS);
    let load = store.load();
    let mut client = client_with_store(store, time);
    client.initialize(load).unwrap();
    client
}

/// Run the transport side of a successful (re)connection
pub fn connect(client: &mut TestClient) {
    client.on_connection_opening().unwrap();
    client.connection_mut().reachable = true;
    client.on_packet_received(login_ok());
    client.run_pending_tasks();
}

/// Logged-in client with an empty outbox
pub fn connected_client(time: &MockTimeSource) -> TestClient {
    let mut client = loaded_client(time);
    client.login(CREDENTIALS, vec![]).unwrap();
    connect(&mut client);
    client.drain_events();
    client.connection_mut().take_sent();
    client
}

/// Persistent ids of the messages currently awaiting acknowledgment
pub fn in_flight_ids(client: &TestClient) -> Vec<PersistentId> {
    client
        .tracker()
        .resend_queue()
        .filter_map(|packet| packet.persistent_id.clone())
        .collect()
}
