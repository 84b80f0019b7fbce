// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use crate::catalog::EntryKey;
use crate::config::Config;
use crate::store::{EntryState, KeyValueStore, QueueRecord, Snapshot, SqliteKeyValueStore, StoreError};
use crate::sync::{RemoteStateClient, SyncError};

/// Fresh in-memory key-value store
pub async fn setup_test_kv() -> Arc<dyn KeyValueStore> {
    Arc::new(
        SqliteKeyValueStore::in_memory()
            .await
            .expect("Failed to open in-memory store"),
    )
}

pub fn entry_state(seen: bool, tbr: bool, updated: &str) -> EntryState {
    EntryState {
        seen,
        tbr,
        updated: updated.to_string(),
        updated_by: None,
    }
}

/// Queue record whose timestamp increases with `seq`
pub fn queue_record(key: &str, seen: bool, seq: u32) -> QueueRecord {
    QueueRecord {
        key: EntryKey::from(key),
        seen,
        tbr: false,
        updated: format!("2024-01-01T00:00:{:02}.{:03}Z", seq / 1000 % 60, seq % 1000),
    }
}

/// Create a test configuration with temporary paths
pub fn create_test_config() -> Config {
    use std::net::SocketAddr;
    use std::str::FromStr;

    let temp_dir = std::env::temp_dir().join(format!("anime-va-test-{}", uuid::Uuid::new_v4()));

    Config {
        state_db_path: temp_dir.join("state.db"),
        sync_api_url: "http://localhost:3000/api".to_string(),
        sync_api_key: None,
        device_id: Some("test-device".to_string()),
        catalog_dir: temp_dir,
        default_language: "ENG".to_string(),
        image_base_url: "http://localhost:3000/images".to_string(),
        image_version: None,
        local_api_bind: SocketAddr::from_str("127.0.0.1:0").unwrap(), // Use port 0 to auto-assign
        flush_batch_size: 50,
        sync_interval_secs: 0,
        request_timeout_secs: 5,
        log_level: "error".to_string(), // Reduce log noise in tests
        log_format: "pretty".to_string(),
    }
}

/// Create a temporary directory for tests
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::TempDir::new().expect("Failed to create temp directory")
}

/// Key-value store whose writes can be switched off, like a browser store
/// that hit its quota, and whose next read can be made to fail
pub struct FlakyStore {
    inner: Arc<dyn KeyValueStore>,
    reject_writes: AtomicBool,
    fail_next_read: AtomicBool,
}

impl FlakyStore {
    pub async fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: setup_test_kv().await,
            reject_writes: AtomicBool::new(false),
            fail_next_read: AtomicBool::new(false),
        })
    }

    pub fn fail_next_read(&self) {
        self.fail_next_read.store(true, Ordering::SeqCst);
    }

    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("quota exceeded".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.fail_next_read.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Rejected("read failed".to_string()));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.remove(key).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.keys_with_prefix(prefix).await
    }
}

#[derive(Default)]
struct Script {
    remote: Option<Snapshot>,
    fail_pushes: bool,
    /// Pushes wait for a permit while set
    gate: Option<Arc<Semaphore>>,
    pushed: Vec<(String, Vec<QueueRecord>)>,
    push_attempts: usize,
    fetches: usize,
}

/// Remote state service double driven by the test
///
/// Starts unreachable. Accepted pushes are recorded and also folded into the
/// remote snapshot, so a later fetch sees them.
#[derive(Default)]
pub struct ScriptedRemote {
    script: Mutex<Script>,
}

impl ScriptedRemote {
    pub fn offline() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn online(remote: Snapshot) -> Arc<Self> {
        let scripted = Self::default();
        scripted.set_remote(Some(remote));
        Arc::new(scripted)
    }

    /// `None` makes fetches fail
    pub fn set_remote(&self, remote: Option<Snapshot>) {
        self.script.lock().unwrap().remote = remote;
    }

    pub fn fail_pushes(&self, fail: bool) {
        self.script.lock().unwrap().fail_pushes = fail;
    }

    /// Hold every push until the returned semaphore hands out a permit
    pub fn gate_pushes(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.script.lock().unwrap().gate = Some(Arc::clone(&gate));
        gate
    }

    pub fn pushed_batches(&self) -> Vec<Vec<QueueRecord>> {
        self.script
            .lock()
            .unwrap()
            .pushed
            .iter()
            .map(|(_, batch)| batch.clone())
            .collect()
    }

    /// Profiles of the accepted pushes, in order
    pub fn pushed_profiles(&self) -> Vec<String> {
        self.script
            .lock()
            .unwrap()
            .pushed
            .iter()
            .map(|(profile, _)| profile.clone())
            .collect()
    }

    /// Pushes started, including ones still waiting on the gate
    pub fn push_attempts(&self) -> usize {
        self.script.lock().unwrap().push_attempts
    }

    pub fn fetch_count(&self) -> usize {
        self.script.lock().unwrap().fetches
    }
}

fn unavailable() -> SyncError {
    SyncError::Status {
        status: StatusCode::SERVICE_UNAVAILABLE,
        body: "scripted outage".to_string(),
    }
}

#[async_trait]
impl RemoteStateClient for ScriptedRemote {
    async fn fetch_state(&self, _profile_id: &str) -> Result<Snapshot, SyncError> {
        let mut script = self.script.lock().unwrap();
        script.fetches += 1;
        script.remote.clone().ok_or_else(unavailable)
    }

    async fn push_updates(&self, profile_id: &str, batch: &[QueueRecord]) -> Result<(), SyncError> {
        let gate = {
            let mut script = self.script.lock().unwrap();
            script.push_attempts += 1;
            script.gate.clone()
        };
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        let mut script = self.script.lock().unwrap();
        if script.fail_pushes || script.remote.is_none() {
            return Err(unavailable());
        }

        let remote = script.remote.get_or_insert_with(Snapshot::new);
        for record in batch {
            remote.insert(
                record.key.clone(),
                EntryState {
                    seen: record.seen,
                    tbr: record.tbr,
                    updated: record.updated.clone(),
                    updated_by: None,
                },
            );
        }
        script.pushed.push((profile_id.to_string(), batch.to_vec()));
        Ok(())
    }
}
