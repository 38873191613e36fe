//! Store plumbing for the runtime
//!
//! [`ChannelStore`] is the [`McsStore`] the client task sees. It answers the
//! per-app quota question on the spot and forwards every write to the
//! [`StorageTask`], which owns the actual backend and reports each completion
//! back to the client task as [`Event::StoreUpdateFinished`].

use hashbrown::HashMap;
use mcs_core::{LoadResult, McsPacket, McsStore, MemoryStore, PersistentId, StoreError, StoreResult};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::channel::{Event, EventSender, StorageReceiver, StorageRequest, StorageSender};

// ----------------------------------------------------------------------------
// Channel Store
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct ChannelStore {
    sender: StorageSender,
    max_outgoing_per_app: usize,
    app_of: HashMap<PersistentId, String>,
    per_app_counts: HashMap<String, usize>,
}

impl ChannelStore {
    /// Seed the quota bookkeeping with what the backend already holds
    pub fn new(sender: StorageSender, max_outgoing_per_app: usize, loaded: &LoadResult) -> Self {
        let mut store = Self {
            sender,
            max_outgoing_per_app,
            app_of: HashMap::new(),
            per_app_counts: HashMap::new(),
        };
        for (key, packet) in &loaded.outgoing_messages {
            store.track(PersistentId::new(key.as_str()), packet);
        }
        store
    }

    pub fn app_count(&self, app_id: &str) -> usize {
        self.per_app_counts.get(app_id).copied().unwrap_or(0)
    }

    fn track(&mut self, id: PersistentId, packet: &McsPacket) {
        let app_id = app_id_of(packet);
        if self.app_of.insert(id, app_id.clone()).is_none() {
            *self.per_app_counts.entry(app_id).or_insert(0) += 1;
        }
    }

    fn untrack(&mut self, id: &PersistentId) {
        let Some(app_id) = self.app_of.remove(id) else {
            return;
        };
        if let Some(count) = self.per_app_counts.get_mut(&app_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.per_app_counts.remove(&app_id);
            }
        }
    }

    fn forward(&self, request: StorageRequest) -> StoreResult {
        self.sender.try_send(request).map_err(|err| match err {
            TrySendError::Full(_) => StoreError::Unavailable {
                reason: "storage queue full".into(),
            },
            TrySendError::Closed(_) => StoreError::Unavailable {
                reason: "storage task stopped".into(),
            },
        })
    }
}

fn app_id_of(packet: &McsPacket) -> String {
    packet
        .as_data_message()
        .map(|message| message.category.clone())
        .unwrap_or_default()
}

impl McsStore for ChannelStore {
    fn add_outgoing_message(&mut self, id: &PersistentId, packet: &McsPacket) -> StoreResult {
        let app_id = app_id_of(packet);
        if self.app_count(&app_id) >= self.max_outgoing_per_app {
            return Err(StoreError::AppQuotaExceeded {
                app_id,
                limit: self.max_outgoing_per_app,
            });
        }
        self.forward(StorageRequest::AddOutgoing {
            id: id.clone(),
            packet: packet.clone(),
        })?;
        self.track(id.clone(), packet);
        Ok(())
    }

    fn remove_outgoing_messages(&mut self, ids: &[PersistentId]) -> StoreResult {
        for id in ids {
            self.untrack(id);
        }
        self.forward(StorageRequest::RemoveOutgoing(ids.to_vec()))
    }

    fn add_incoming_message(&mut self, id: &PersistentId) -> StoreResult {
        self.forward(StorageRequest::AddIncoming(id.clone()))
    }

    fn remove_incoming_messages(&mut self, ids: &[PersistentId]) -> StoreResult {
        self.forward(StorageRequest::RemoveIncoming(ids.to_vec()))
    }

    fn destroy(&mut self) -> StoreResult {
        self.app_of.clear();
        self.per_app_counts.clear();
        self.forward(StorageRequest::Destroy)
    }
}

// ----------------------------------------------------------------------------
// Storage Task
// ----------------------------------------------------------------------------

/// Applies storage requests to the backend one at a time
pub struct StorageTask {
    store: MemoryStore,
    receiver: StorageReceiver,
    event_sender: EventSender,
}

impl StorageTask {
    pub fn new(store: MemoryStore, receiver: StorageReceiver, event_sender: EventSender) -> Self {
        Self {
            store,
            receiver,
            event_sender,
        }
    }

    /// Run until every request sender is gone; returns the backend
    pub async fn run(mut self) -> MemoryStore {
        info!("Storage task starting");
        while let Some(request) = self.receiver.recv().await {
            let success = match self.apply(request) {
                Ok(()) => true,
                Err(err) => {
                    warn!("Storage request failed: {}", err);
                    false
                }
            };
            if self
                .event_sender
                .send(Event::StoreUpdateFinished { success })
                .await
                .is_err()
            {
                debug!("Client task gone, no longer reporting store completions");
            }
        }
        info!("Storage task stopped");
        self.store
    }

    fn apply(&mut self, request: StorageRequest) -> StoreResult {
        match request {
            StorageRequest::AddOutgoing { id, packet } => self.store.add_outgoing_message(&id, &packet),
            StorageRequest::RemoveOutgoing(ids) => self.store.remove_outgoing_messages(&ids),
            StorageRequest::AddIncoming(id) => self.store.add_incoming_message(&id),
            StorageRequest::RemoveIncoming(ids) => self.store.remove_incoming_messages(&ids),
            StorageRequest::Destroy => self.store.destroy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{create_event_channel, create_storage_channel};
    use mcs_core::{ChannelConfig, DataMessageStanza};

    fn message(app: &str) -> McsPacket {
        McsPacket::DataMessage(DataMessageStanza {
            id: "m".to_string(),
            category: app.to_string(),
            ttl: 60,
            ..Default::default()
        })
    }

    #[test]
    fn test_quota_checked_without_backend_round_trip() {
        let (sender, mut receiver) = create_storage_channel(&ChannelConfig::testing());
        let mut store = ChannelStore::new(sender, 2, &LoadResult::new_client());

        assert!(store.add_outgoing_message(&PersistentId::new("1"), &message("a")).is_ok());
        assert!(store.add_outgoing_message(&PersistentId::new("2"), &message("a")).is_ok());
        assert_eq!(
            store.add_outgoing_message(&PersistentId::new("3"), &message("a")),
            Err(StoreError::AppQuotaExceeded {
                app_id: "a".to_string(),
                limit: 2,
            })
        );
        assert!(store.add_outgoing_message(&PersistentId::new("4"), &message("b")).is_ok());

        store.remove_outgoing_messages(&[PersistentId::new("1")]).unwrap();
        assert_eq!(store.app_count("a"), 1);

        let mut forwarded = 0;
        while receiver.try_recv().is_ok() {
            forwarded += 1;
        }
        assert_eq!(forwarded, 4);
    }

    #[test]
    fn test_quota_seeded_from_load() {
        let (sender, _receiver) = create_storage_channel(&ChannelConfig::testing());
        let mut loaded = LoadResult::new_client();
        loaded.outgoing_messages.insert("10".to_string(), message("a"));
        let store = ChannelStore::new(sender, 2, &loaded);
        assert_eq!(store.app_count("a"), 1);
    }

    #[test]
    fn test_closed_backend_is_unavailable() {
        let (sender, receiver) = create_storage_channel(&ChannelConfig::testing());
        drop(receiver);
        let mut store = ChannelStore::new(sender, 2, &LoadResult::new_client());
        assert!(matches!(
            store.add_incoming_message(&PersistentId::new("s1")),
            Err(StoreError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_storage_task_reports_completions() {
        let config = ChannelConfig::testing();
        let (sender, receiver) = create_storage_channel(&config);
        let (event_sender, mut events) = create_event_channel(&config);
        let task = tokio::spawn(StorageTask::new(MemoryStore::new(5), receiver, event_sender).run());

        sender
            .send(StorageRequest::AddIncoming(PersistentId::new("s1")))
            .await
            .unwrap();
        assert!(matches!(
            events.recv().await,
            Some(Event::StoreUpdateFinished { success: true })
        ));

        drop(sender);
        let store = task.await.unwrap();
        assert_eq!(store.incoming(), &[PersistentId::new("s1")]);
    }
}
