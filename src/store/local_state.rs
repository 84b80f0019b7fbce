// SPDX-License-Identifier: GPL-3.0-only
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::catalog::EntryKey;
use crate::store::error::StoreError;
use crate::store::models::{EntryState, Snapshot, StateBlob};
use crate::store::traits::KeyValueStore;

const STATE_PREFIX: &str = "anime_va.state.";

/// Durable per-profile snapshot of entry states
///
/// Read-modify-write sequences are not synchronized here; the sync
/// orchestrator serializes all local writes.
#[derive(Clone)]
pub struct LocalStateStore {
    kv: Arc<dyn KeyValueStore>,
}

impl LocalStateStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    fn storage_key(profile_id: &str) -> String {
        format!("{STATE_PREFIX}{profile_id}")
    }

    /// Last persisted snapshot for the profile
    ///
    /// Missing, unreadable or corrupt data all yield an empty snapshot so the
    /// caller always has something to render.
    pub async fn load(&self, profile_id: &str) -> Snapshot {
        self.try_load(profile_id).await.unwrap_or_else(|e| {
            error!(profile = %profile_id, error = %e, "Failed to read local state");
            Snapshot::new()
        })
    }

    /// Like `load`, but a storage failure is an error
    ///
    /// Only a missing or corrupt payload reads as empty. Anything that writes
    /// back what it loaded must use this, or a failed read would overwrite
    /// the persisted snapshot with a partial one.
    pub async fn try_load(&self, profile_id: &str) -> Result<Snapshot, StoreError> {
        let Some(raw) = self.kv.get(&Self::storage_key(profile_id)).await? else {
            return Ok(Snapshot::new());
        };

        match StateBlob::decode(&raw) {
            Ok(entries) => {
                debug!(profile = %profile_id, count = entries.len(), "Loaded local state");
                Ok(entries)
            }
            Err(e) => {
                warn!(profile = %profile_id, error = %e, "Discarding unreadable local state");
                Ok(Snapshot::new())
            }
        }
    }

    /// Overwrite the persisted snapshot for the profile
    pub async fn save(&self, profile_id: &str, entries: &Snapshot) -> Result<(), StoreError> {
        let raw = StateBlob::encode(entries)?;
        self.kv.set(&Self::storage_key(profile_id), &raw).await
    }

    /// Insert or replace one entry in the persisted snapshot
    pub async fn merge_entry(
        &self,
        profile_id: &str,
        key: &EntryKey,
        state: &EntryState,
    ) -> Result<(), StoreError> {
        let mut entries = self.try_load(profile_id).await?;
        entries.insert(key.clone(), state.clone());
        self.save(profile_id, &entries).await
    }

    /// Profiles with a persisted snapshot on this device
    pub async fn profiles(&self) -> Result<Vec<String>, StoreError> {
        let keys = self.kv.keys_with_prefix(STATE_PREFIX).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(STATE_PREFIX).map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{entry_state, setup_test_kv, FlakyStore};

    #[tokio::test]
    async fn test_load_unknown_profile_is_empty() {
        let store = LocalStateStore::new(setup_test_kv().await);
        assert!(store.load("alice").await.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let store = LocalStateStore::new(setup_test_kv().await);
        let mut entries = Snapshot::new();
        entries.insert(EntryKey::from("ENG-42"), entry_state(true, false, "2024-03-01T10:00:00.000Z"));

        store.save("alice", &entries).await.unwrap();
        assert_eq!(store.load("alice").await, entries);
        assert!(store.load("bob").await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_payload_loads_empty() {
        let kv = setup_test_kv().await;
        kv.set("anime_va.state.alice", "{\"entries\": [oops").await.unwrap();

        let store = LocalStateStore::new(kv);
        assert!(store.load("alice").await.is_empty());
    }

    #[tokio::test]
    async fn test_merge_entry_keeps_other_keys() {
        let store = LocalStateStore::new(setup_test_kv().await);
        let mut entries = Snapshot::new();
        entries.insert(EntryKey::from("ENG-1"), entry_state(true, false, "2024-01-01T00:00:00.000Z"));
        store.save("alice", &entries).await.unwrap();

        let key = EntryKey::from("JPN-2");
        store
            .merge_entry("alice", &key, &entry_state(false, true, "2024-01-02T00:00:00.000Z"))
            .await
            .unwrap();

        let loaded = store.load("alice").await;
        assert_eq!(loaded.len(), 2);
        assert!(loaded[&key].tbr);
    }

    #[tokio::test]
    async fn test_merge_entry_after_failed_read_keeps_persisted_entries() {
        let kv = FlakyStore::new().await;
        let store = LocalStateStore::new(kv.clone());
        let mut entries = Snapshot::new();
        for id in 1..=5 {
            entries.insert(
                EntryKey::from(format!("ENG-{id}").as_str()),
                entry_state(true, false, "2024-01-01T00:00:00.000Z"),
            );
        }
        store.save("alice", &entries).await.unwrap();

        kv.fail_next_read();
        let result = store
            .merge_entry("alice", &EntryKey::from("ENG-99"), &entry_state(true, false, "2024-02-01T00:00:00.000Z"))
            .await;

        assert!(result.is_err());
        assert_eq!(store.load("alice").await, entries);
    }

    #[tokio::test]
    async fn test_try_load_reads_corrupt_payload_as_empty() {
        let kv = setup_test_kv().await;
        kv.set("anime_va.state.alice", "not json").await.unwrap();

        let store = LocalStateStore::new(kv);
        assert!(store.try_load("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_profiles_lists_saved_profiles() {
        let store = LocalStateStore::new(setup_test_kv().await);
        store.save("bob", &Snapshot::new()).await.unwrap();
        store.save("alice", &Snapshot::new()).await.unwrap();

        assert_eq!(store.profiles().await.unwrap(), vec!["alice", "bob"]);
    }
}
