// SPDX-License-Identifier: GPL-3.0-only
use std::sync::Arc;
use tracing::{debug, warn};

use crate::store::error::StoreError;
use crate::store::models::{QueueBlob, QueueRecord};
use crate::store::traits::KeyValueStore;

const QUEUE_PREFIX: &str = "anime_va.queue.";

/// Durable FIFO of mutations not yet acknowledged by the remote store
///
/// Records are only appended at the tail and only removed from the head, in
/// the exact prefix the remote store accepted. No de-duplication is done: two
/// toggles of the same key produce two records.
#[derive(Clone)]
pub struct PendingQueue {
    kv: Arc<dyn KeyValueStore>,
}

impl PendingQueue {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    fn storage_key(profile_id: &str) -> String {
        format!("{QUEUE_PREFIX}{profile_id}")
    }

    /// All pending records, oldest first
    ///
    /// A corrupt queue blob reads as empty; storage failures are errors.
    pub async fn records(&self, profile_id: &str) -> Result<Vec<QueueRecord>, StoreError> {
        let Some(raw) = self.kv.get(&Self::storage_key(profile_id)).await? else {
            return Ok(Vec::new());
        };

        match QueueBlob::decode(&raw) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!(profile = %profile_id, error = %e, "Discarding unreadable pending queue");
                Ok(Vec::new())
            }
        }
    }

    async fn write(&self, profile_id: &str, records: &[QueueRecord]) -> Result<(), StoreError> {
        let key = Self::storage_key(profile_id);
        if records.is_empty() {
            return self.kv.remove(&key).await;
        }
        self.kv.set(&key, &QueueBlob::encode(records)?).await
    }

    /// Append one record at the tail
    pub async fn enqueue(&self, profile_id: &str, record: QueueRecord) -> Result<(), StoreError> {
        let mut records = self.records(profile_id).await?;
        records.push(record);
        self.write(profile_id, &records).await?;

        debug!(profile = %profile_id, pending = records.len(), "Queued update");
        Ok(())
    }

    /// Up to `max_size` oldest records, left in place
    pub async fn peek_batch(
        &self,
        profile_id: &str,
        max_size: usize,
    ) -> Result<Vec<QueueRecord>, StoreError> {
        let mut records = self.records(profile_id).await?;
        records.truncate(max_size);
        Ok(records)
    }

    /// Drop the `count` oldest records after the remote store accepted them
    pub async fn commit(&self, profile_id: &str, count: usize) -> Result<(), StoreError> {
        let mut records = self.records(profile_id).await?;
        let count = count.min(records.len());
        records.drain(..count);
        self.write(profile_id, &records).await?;

        debug!(profile = %profile_id, committed = count, pending = records.len(), "Committed updates");
        Ok(())
    }

    pub async fn len(&self, profile_id: &str) -> Result<usize, StoreError> {
        Ok(self.records(profile_id).await?.len())
    }
}
