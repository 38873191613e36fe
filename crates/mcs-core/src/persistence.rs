//! Durable store interface and persisted-state restoration
//!
//! The client only issues write intents through [`McsStore`]; loading is done
//! by the owner before the client exists and handed over as a
//! [`LoadResult`]. [`MemoryStore`] is the in-process reference backend.

use hashbrown::HashMap;
use tracing::{debug, warn};

use crate::errors::{McsError, Result, StoreError};
use crate::packet::{McsPacket, OutgoingPacket};
use crate::types::{DeviceCredentials, PersistentId, Timestamp};

// ----------------------------------------------------------------------------
// Store Trait
// ----------------------------------------------------------------------------

/// Outcome of a store write
///
/// `Ok` means the write was applied or handed to a backend that reports its
/// completion later; `Err` means it failed immediately.
pub type StoreResult = core::result::Result<(), StoreError>;

/// Write side of the durable message store
pub trait McsStore {
    /// Persist an outgoing message; refused with
    /// [`StoreError::AppQuotaExceeded`] when its application is over quota
    fn add_outgoing_message(&mut self, id: &PersistentId, packet: &McsPacket) -> StoreResult;

    fn remove_outgoing_message(&mut self, id: &PersistentId) -> StoreResult {
        self.remove_outgoing_messages(core::slice::from_ref(id))
    }

    fn remove_outgoing_messages(&mut self, ids: &[PersistentId]) -> StoreResult;

    fn add_incoming_message(&mut self, id: &PersistentId) -> StoreResult;

    fn remove_incoming_messages(&mut self, ids: &[PersistentId]) -> StoreResult;

    /// Wipe every persisted record
    fn destroy(&mut self) -> StoreResult;
}

impl<S: McsStore + ?Sized> McsStore for Box<S> {
    fn add_outgoing_message(&mut self, id: &PersistentId, packet: &McsPacket) -> StoreResult {
        (**self).add_outgoing_message(id, packet)
    }

    fn remove_outgoing_messages(&mut self, ids: &[PersistentId]) -> StoreResult {
        (**self).remove_outgoing_messages(ids)
    }

    fn add_incoming_message(&mut self, id: &PersistentId) -> StoreResult {
        (**self).add_incoming_message(id)
    }

    fn remove_incoming_messages(&mut self, ids: &[PersistentId]) -> StoreResult {
        (**self).remove_incoming_messages(ids)
    }

    fn destroy(&mut self) -> StoreResult {
        (**self).destroy()
    }
}

/// Everything the store held at startup
#[derive(Debug, Clone, Default)]
pub struct LoadResult {
    pub credentials: DeviceCredentials,
    /// Inbound persistent ids received but not confirmed as acknowledged
    pub incoming_messages: Vec<PersistentId>,
    /// Store key → outgoing packet; keys are decimal timestamps
    pub outgoing_messages: HashMap<String, McsPacket>,
}

impl LoadResult {
    /// Load result of a device that never checked in
    pub fn new_client() -> Self {
        Self::default()
    }
}

// ----------------------------------------------------------------------------
// Restoration
// ----------------------------------------------------------------------------

/// Outgoing messages restored from the store, split by TTL state
#[derive(Debug, Default)]
pub struct RestoredOutgoing {
    /// Live messages, oldest first
    pub live: Vec<OutgoingPacket>,
    pub expired: Vec<OutgoingPacket>,
    /// Largest restored timestamp, so new ids sort after every restored one
    pub newest_timestamp: Option<u64>,
}

/// Order restored outgoing messages by their persistent-id timestamp and
/// separate the ones whose TTL already elapsed
pub fn restore_outgoing<I>(messages: I, now: Timestamp) -> Result<RestoredOutgoing>
where
    I: IntoIterator<Item = (String, McsPacket)>,
{
    let mut ordered = Vec::new();
    for (key, mut packet) in messages {
        let Ok(timestamp) = key.parse::<u64>() else {
            warn!("Restored outgoing message has unreadable key {:?}", key);
            return Err(McsError::CorruptRestoredMessage { key });
        };
        let id = PersistentId::new(key);
        packet.set_persistent_id(id.clone());
        let mut outgoing = OutgoingPacket::new(packet);
        outgoing.persistent_id = Some(id);
        ordered.push((timestamp, outgoing));
    }
    ordered.sort_by_key(|(timestamp, _)| *timestamp);

    let mut restored = RestoredOutgoing {
        newest_timestamp: ordered.last().map(|(timestamp, _)| *timestamp),
        ..RestoredOutgoing::default()
    };
    for (_, packet) in ordered {
        if packet.packet.has_ttl_expired(now) {
            restored.expired.push(packet);
        } else {
            restored.live.push(packet);
        }
    }

    debug!(
        "Restored {} outgoing messages, {} expired",
        restored.live.len(),
        restored.expired.len()
    );
    Ok(restored)
}

// ----------------------------------------------------------------------------
// In-Memory Store
// ----------------------------------------------------------------------------

/// Reference store keeping everything in memory
///
/// Enforces a per-application quota on outgoing messages, keyed by the data
/// message category.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    credentials: DeviceCredentials,
    outgoing: HashMap<PersistentId, McsPacket>,
    per_app_counts: HashMap<String, usize>,
    incoming: Vec<PersistentId>,
    max_outgoing_per_app: usize,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new(max_outgoing_per_app: usize) -> Self {
        Self {
            credentials: DeviceCredentials::default(),
            outgoing: HashMap::new(),
            per_app_counts: HashMap::new(),
            incoming: Vec::new(),
            max_outgoing_per_app,
            fail_writes: false,
        }
    }

    pub fn set_device_credentials(&mut self, credentials: DeviceCredentials) {
        self.credentials = credentials;
    }

    /// Make every following write fail, to exercise error paths
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Snapshot the store the way it would be read back after a restart
    pub fn load(&self) -> LoadResult {
        LoadResult {
            credentials: self.credentials,
            incoming_messages: self.incoming.clone(),
            outgoing_messages: self
                .outgoing
                .iter()
                .map(|(id, packet)| (id.as_str().to_string(), packet.clone()))
                .collect(),
        }
    }

    pub fn outgoing_len(&self) -> usize {
        self.outgoing.len()
    }

    pub fn contains_outgoing(&self, id: &PersistentId) -> bool {
        self.outgoing.contains_key(id)
    }

    pub fn incoming(&self) -> &[PersistentId] {
        &self.incoming
    }

    pub fn app_count(&self, app_id: &str) -> usize {
        self.per_app_counts.get(app_id).copied().unwrap_or(0)
    }

    fn check_writable(&self) -> StoreResult {
        if self.fail_writes {
            return Err(StoreError::WriteFailed {
                reason: "writes disabled".into(),
            });
        }
        Ok(())
    }
}

fn app_id_of(packet: &McsPacket) -> String {
    packet
        .as_data_message()
        .map(|message| message.category.clone())
        .unwrap_or_default()
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(crate::config::StoreConfig::default().max_outgoing_per_app)
    }
}

impl McsStore for MemoryStore {
    fn add_outgoing_message(&mut self, id: &PersistentId, packet: &McsPacket) -> StoreResult {
        self.check_writable()?;
        let app_id = app_id_of(packet);
        let count = self.app_count(&app_id);
        if count >= self.max_outgoing_per_app {
            return Err(StoreError::AppQuotaExceeded {
                app_id,
                limit: self.max_outgoing_per_app,
            });
        }
        if self.outgoing.insert(id.clone(), packet.clone()).is_none() {
            *self.per_app_counts.entry(app_id).or_insert(0) += 1;
        }
        Ok(())
    }

    fn remove_outgoing_messages(&mut self, ids: &[PersistentId]) -> StoreResult {
        self.check_writable()?;
        for id in ids {
            if let Some(packet) = self.outgoing.remove(id) {
                let app_id = app_id_of(&packet);
                if let Some(count) = self.per_app_counts.get_mut(&app_id) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        self.per_app_counts.remove(&app_id);
                    }
                }
            }
        }
        Ok(())
    }

    fn add_incoming_message(&mut self, id: &PersistentId) -> StoreResult {
        self.check_writable()?;
        if !self.incoming.contains(id) {
            self.incoming.push(id.clone());
        }
        Ok(())
    }

    fn remove_incoming_messages(&mut self, ids: &[PersistentId]) -> StoreResult {
        self.check_writable()?;
        self.incoming.retain(|id| !ids.contains(id));
        Ok(())
    }

    fn destroy(&mut self) -> StoreResult {
        self.check_writable()?;
        self.credentials = DeviceCredentials::default();
        self.outgoing.clear();
        self.per_app_counts.clear();
        self.incoming.clear();
        Ok(())
    }
}
