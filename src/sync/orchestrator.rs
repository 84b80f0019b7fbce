// SPDX-License-Identifier: GPL-3.0-only
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, MutexGuard, PoisonError};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::catalog::{CatalogEntry, EntryKey, LanguageSelection};
use crate::store::{
    ActiveProfile, EntryState, KeyValueStore, LocalStateStore, PendingQueue, Preferences,
    QueueRecord, Snapshot,
};
use crate::sync::error::SyncError;
use crate::sync::reconcile::merge_with_report;
use crate::sync::session::{normalize_profile_id, Session, SessionInfo, GUEST_PROFILE_ID};
use crate::sync::traits::RemoteStateClient;
use crate::utils::now_timestamp;

pub struct SyncSettings {
    /// Tag written into `updated_by` and sent with every push
    pub device_id: String,
    pub batch_size: usize,
    /// Catalog language when none was persisted
    pub default_language: LanguageSelection,
}

/// Requested seen / TBR values for one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryChange {
    #[serde(default)]
    pub seen: bool,
    #[serde(default)]
    pub tbr: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "state", rename_all = "snake_case")]
pub enum UpdateOutcome {
    Applied(EntryState),
    /// Guest profile; nothing was changed
    ReadOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FlushOutcome {
    /// Queue is empty; `pushed` records went out in `batches` requests
    Drained { pushed: usize, batches: usize },
    /// Stopped at the first rejected batch, which stays queued
    Failed { pushed: usize, batches: usize, error: String },
    /// A flush for the same profile was running; it runs again before exiting
    InFlight,
    ReadOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeOutcome {
    Merged { added: usize, replaced: usize, kept: usize },
    /// Fetch failed; local state untouched
    Skipped { error: String },
    /// The session moved to another profile while the fetch was in flight
    Discarded,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub profile_id: String,
    pub merge: MergeOutcome,
    pub flush: FlushOutcome,
}

/// Handles for the fetch and flush started after a profile load
///
/// Dropping them detaches the tasks.
pub struct BackgroundSync {
    pub refresh: JoinHandle<MergeOutcome>,
    pub flush: JoinHandle<FlushOutcome>,
}

/// Profiles with a flush in progress, and those triggered again meanwhile
#[derive(Default)]
struct FlushGates {
    running: HashSet<String>,
    rerun: HashSet<String>,
}

/// Exclusive right to flush one profile, released on drop
struct FlushClaim<'a> {
    gates: &'a std::sync::Mutex<FlushGates>,
    profile_id: String,
    released: bool,
}

impl FlushClaim<'_> {
    /// Release the claim unless a trigger arrived since the last call.
    /// Returns `false` when the caller must drain once more.
    fn release_unless_rerun(&mut self) -> bool {
        let mut gates = lock_gates(self.gates);
        if gates.rerun.remove(&self.profile_id) {
            return false;
        }
        gates.running.remove(&self.profile_id);
        self.released = true;
        true
    }
}

impl Drop for FlushClaim<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mut gates = lock_gates(self.gates);
        gates.running.remove(&self.profile_id);
        gates.rerun.remove(&self.profile_id);
    }
}

fn lock_gates(gates: &std::sync::Mutex<FlushGates>) -> MutexGuard<'_, FlushGates> {
    gates.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sequences the local-first write path and background reconciliation
///
/// All read-modify-write cycles on the persisted snapshot and queue go through
/// `local_writes`. The session lock is never held across a network call.
pub struct SyncOrchestrator {
    local: LocalStateStore,
    queue: PendingQueue,
    preferences: Preferences,
    remote: Arc<dyn RemoteStateClient>,
    device_id: String,
    batch_size: usize,
    default_language: LanguageSelection,
    session: RwLock<Option<Session>>,
    local_writes: Mutex<()>,
    flushes: std::sync::Mutex<FlushGates>,
    revision: watch::Sender<u64>,
}

impl SyncOrchestrator {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteStateClient>,
        settings: SyncSettings,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            local: LocalStateStore::new(Arc::clone(&kv)),
            queue: PendingQueue::new(Arc::clone(&kv)),
            preferences: Preferences::new(kv),
            remote,
            device_id: settings.device_id,
            batch_size: settings.batch_size.max(1),
            default_language: settings.default_language,
            session: RwLock::new(None),
            local_writes: Mutex::new(()),
            flushes: std::sync::Mutex::new(FlushGates::default()),
            revision,
        }
    }

    /// Ticks whenever the visible state changes and views should re-render
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    pub async fn active_profile(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.profile_id.clone())
    }

    pub async fn session_info(&self) -> Option<SessionInfo> {
        let mut info = self.session.read().await.as_ref().map(|s| SessionInfo {
            profile_id: s.profile_id.clone(),
            label: s.label.clone(),
            language: s.language,
            read_only: s.is_read_only(),
            entries: s.state.len(),
            pending: 0,
        })?;
        info.pending = self.pending_count(&info.profile_id).await;
        Some(info)
    }

    /// Language of the session, else the persisted preference, else the default
    pub async fn language(&self) -> LanguageSelection {
        if let Some(session) = self.session.read().await.as_ref() {
            return session.language;
        }
        self.preferences.language().await.unwrap_or(self.default_language)
    }

    /// Run `f` against the active in-memory state (empty without a session)
    pub async fn read_state<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> R {
        let guard = self.session.read().await;
        match guard.as_ref() {
            Some(session) => f(&session.state),
            None => f(&Snapshot::new()),
        }
    }

    pub async fn entry_state(&self, key: &EntryKey) -> Option<EntryState> {
        self.read_state(|state| state.get(key).cloned()).await
    }

    pub async fn pending_count(&self, profile_id: &str) -> usize {
        self.queue.len(profile_id).await.unwrap_or_else(|e| {
            error!(profile = %profile_id, error = %e, "Failed to read pending queue");
            0
        })
    }

    /// Profiles with local data on this device, plus the active one
    pub async fn known_profiles(&self) -> Result<Vec<String>, SyncError> {
        let mut profiles = self.local.profiles().await?;
        if let Some(active) = self.active_profile().await {
            if !profiles.contains(&active) {
                profiles.push(active);
                profiles.sort();
            }
        }
        Ok(profiles)
    }

    /// Reopen the profile that was active when the daemon last ran
    pub async fn restore(self: &Arc<Self>) -> Option<BackgroundSync> {
        let active = self.preferences.active_profile().await?;
        let profile_id = normalize_profile_id(&active.id)?;
        let language = self.language().await;

        info!(profile = %profile_id, "Restoring last active profile");
        Some(self.open_session(profile_id, active.label, language).await)
    }

    /// Make `profile_id` the active profile and load its data
    pub async fn select_profile(
        self: &Arc<Self>,
        profile_id: &str,
        label: Option<String>,
    ) -> Result<BackgroundSync, SyncError> {
        let profile_id = normalize_profile_id(profile_id)
            .ok_or_else(|| SyncError::InvalidProfile(profile_id.to_string()))?;
        let language = self.language().await;

        let active = ActiveProfile {
            id: profile_id.clone(),
            label: label.clone(),
        };
        if let Err(e) = self.preferences.set_active_profile(&active).await {
            error!(profile = %profile_id, error = %e, "Failed to persist active profile");
        }

        Ok(self.open_session(profile_id, label, language).await)
    }

    async fn open_session(
        self: &Arc<Self>,
        profile_id: String,
        label: Option<String>,
        language: LanguageSelection,
    ) -> BackgroundSync {
        {
            let _writes = self.local_writes.lock().await;
            let mut session = Session::new(profile_id.clone(), label, language);
            session.state = self.local.load(&profile_id).await;
            *self.session.write().await = Some(session);
        }

        info!(profile = %profile_id, language = %language, "Profile selected");
        self.bump_revision();
        self.spawn_background_sync(&profile_id)
    }

    /// Re-apply the persisted snapshot of the active profile, then fetch and
    /// flush in the background
    pub async fn load_profile_data(self: &Arc<Self>) -> Result<BackgroundSync, SyncError> {
        let profile_id = {
            let _writes = self.local_writes.lock().await;
            let profile_id = self.active_profile().await.ok_or(SyncError::NoActiveProfile)?;
            let state = self.local.load(&profile_id).await;

            let mut guard = self.session.write().await;
            match guard.as_mut() {
                Some(session) if session.profile_id == profile_id => session.state = state,
                _ => return Err(SyncError::NoActiveProfile),
            }
            profile_id
        };

        self.bump_revision();
        Ok(self.spawn_background_sync(&profile_id))
    }

    /// Switch the catalog language. Reloads profile data when signed in.
    pub async fn set_language(
        self: &Arc<Self>,
        language: LanguageSelection,
    ) -> Result<Option<BackgroundSync>, SyncError> {
        if let Err(e) = self.preferences.set_language(language).await {
            error!(language = %language, error = %e, "Failed to persist language");
        }

        let signed_in = match self.session.write().await.as_mut() {
            Some(session) => {
                session.language = language;
                true
            }
            None => false,
        };

        info!(language = %language, "Catalog language changed");
        if signed_in {
            Ok(Some(self.load_profile_data().await?))
        } else {
            self.bump_revision();
            Ok(None)
        }
    }

    pub async fn sign_out(&self) {
        let previous = {
            let _writes = self.local_writes.lock().await;
            self.session.write().await.take()
        };

        if let Err(e) = self.preferences.clear_active_profile().await {
            error!(error = %e, "Failed to clear active profile");
        }

        if let Some(session) = previous {
            info!(profile = %session.profile_id, "Signed out");
            self.bump_revision();
        }
    }

    /// Set the seen / TBR state of a catalog entry for the active profile
    ///
    /// The new state is in memory, persisted and queued when this returns. The
    /// push to the remote store happens in the background.
    pub async fn update_entry(
        self: &Arc<Self>,
        entry: &CatalogEntry,
        change: EntryChange,
    ) -> Result<UpdateOutcome, SyncError> {
        match self.apply_local(entry, change).await? {
            Some((profile_id, state)) => {
                drop(self.spawn_flush(profile_id));
                Ok(UpdateOutcome::Applied(state))
            }
            None => Ok(UpdateOutcome::ReadOnly),
        }
    }

    /// Guard, apply, persist and queue. `None` for the read-only profile.
    async fn apply_local(
        &self,
        entry: &CatalogEntry,
        change: EntryChange,
    ) -> Result<Option<(String, EntryState)>, SyncError> {
        let key = entry.key();
        let _writes = self.local_writes.lock().await;

        let (profile_id, state) = {
            let mut guard = self.session.write().await;
            let session = guard.as_mut().ok_or(SyncError::NoActiveProfile)?;

            if session.is_read_only() {
                info!(key = %key, "Ignoring change on read-only guest profile");
                return Ok(None);
            }

            let state = EntryState {
                seen: change.seen,
                tbr: change.tbr,
                updated: now_timestamp(),
                updated_by: Some(self.device_id.clone()),
            };
            session.state.insert(key.clone(), state.clone());
            (session.profile_id.clone(), state)
        };
        self.bump_revision();

        if let Err(e) = self.local.merge_entry(&profile_id, &key, &state).await {
            warn!(profile = %profile_id, key = %key, error = %e, "Failed to persist entry state, saving full snapshot");
            self.persist_session(&profile_id).await;
        }
        let record = QueueRecord::from_state(key.clone(), &state);
        if let Err(e) = self.queue.enqueue(&profile_id, record).await {
            error!(profile = %profile_id, key = %key, error = %e, "Failed to queue entry update");
        }

        debug!(profile = %profile_id, key = %key, seen = state.seen, tbr = state.tbr, "Entry updated");
        Ok(Some((profile_id, state)))
    }

    /// Overwrite the persisted snapshot with the in-memory one.
    /// Caller holds `local_writes`.
    async fn persist_session(&self, profile_id: &str) {
        let snapshot = self
            .session
            .read()
            .await
            .as_ref()
            .filter(|s| s.profile_id == profile_id)
            .map(|s| s.state.clone());
        let Some(snapshot) = snapshot else {
            return;
        };
        if let Err(e) = self.local.save(profile_id, &snapshot).await {
            error!(profile = %profile_id, error = %e, "Failed to persist entry state");
        }
    }

    /// Fetch the remote snapshot and merge it into the session
    pub async fn refresh_remote(&self, profile_id: &str) -> MergeOutcome {
        let remote = match self.remote.fetch_state(profile_id).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(profile = %profile_id, error = %e, "Remote fetch failed, keeping local state");
                return MergeOutcome::Skipped { error: e.to_string() };
            }
        };

        let _writes = self.local_writes.lock().await;
        let (merged, report) = {
            let mut guard = self.session.write().await;
            let Some(session) = guard.as_mut().filter(|s| s.profile_id == profile_id) else {
                debug!(profile = %profile_id, "Discarding remote state for inactive profile");
                return MergeOutcome::Discarded;
            };

            let (merged, report) = merge_with_report(&session.state, &remote);
            if report.changed() {
                session.state = merged.clone();
            }
            (merged, report)
        };

        if report.changed() {
            self.bump_revision();
            if let Err(e) = self.local.save(profile_id, &merged).await {
                error!(profile = %profile_id, error = %e, "Failed to persist merged state");
            }
        }

        info!(
            profile = %profile_id,
            added = report.added,
            replaced = report.replaced,
            kept = report.kept,
            "Merged remote state"
        );
        MergeOutcome::Merged {
            added: report.added,
            replaced: report.replaced,
            kept: report.kept,
        }
    }

    /// Push queued updates in batches until the queue is empty or a push fails
    pub async fn flush(&self, profile_id: &str) -> FlushOutcome {
        if profile_id == GUEST_PROFILE_ID {
            return FlushOutcome::ReadOnly;
        }
        let Some(mut claim) = self.try_begin_flush(profile_id) else {
            debug!(profile = %profile_id, "Flush already running");
            return FlushOutcome::InFlight;
        };

        let mut pushed = 0;
        let mut batches = 0;
        loop {
            let batch = match self.queue.peek_batch(profile_id, self.batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(profile = %profile_id, error = %e, "Failed to read pending queue");
                    return FlushOutcome::Failed { pushed, batches, error: e.to_string() };
                }
            };
            if batch.is_empty() {
                if claim.release_unless_rerun() {
                    break;
                }
                continue;
            }

            if let Err(e) = self.remote.push_updates(profile_id, &batch).await {
                warn!(
                    profile = %profile_id,
                    count = batch.len(),
                    transient = e.is_transient(),
                    error = %e,
                    "Push failed, updates stay queued"
                );
                return FlushOutcome::Failed { pushed, batches, error: e.to_string() };
            }

            let _writes = self.local_writes.lock().await;
            if let Err(e) = self.queue.commit(profile_id, batch.len()).await {
                error!(profile = %profile_id, error = %e, "Failed to commit pushed updates");
                return FlushOutcome::Failed { pushed, batches, error: e.to_string() };
            }
            pushed += batch.len();
            batches += 1;
        }

        if pushed > 0 {
            info!(profile = %profile_id, pushed, batches, "Flushed pending updates");
        }
        FlushOutcome::Drained { pushed, batches }
    }

    /// Claim the flush for `profile_id`. When one is already running, ask it
    /// to drain once more instead.
    fn try_begin_flush(&self, profile_id: &str) -> Option<FlushClaim<'_>> {
        let mut gates = lock_gates(&self.flushes);
        if !gates.running.insert(profile_id.to_string()) {
            gates.rerun.insert(profile_id.to_string());
            return None;
        }
        Some(FlushClaim {
            gates: &self.flushes,
            profile_id: profile_id.to_string(),
            released: false,
        })
    }

    /// Fetch and flush for the active profile right away
    pub async fn sync_now(&self) -> Result<SyncReport, SyncError> {
        let profile_id = self.active_profile().await.ok_or(SyncError::NoActiveProfile)?;
        let merge = self.refresh_remote(&profile_id).await;
        let flush = self.flush(&profile_id).await;
        Ok(SyncReport { profile_id, merge, flush })
    }

    fn spawn_flush(self: &Arc<Self>, profile_id: String) -> JoinHandle<FlushOutcome> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.flush(&profile_id).await })
    }

    fn spawn_background_sync(self: &Arc<Self>, profile_id: &str) -> BackgroundSync {
        let this = Arc::clone(self);
        let id = profile_id.to_string();
        let refresh = tokio::spawn(async move { this.refresh_remote(&id).await });

        BackgroundSync {
            refresh,
            flush: self.spawn_flush(profile_id.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{entry_state, queue_record, setup_test_kv, FlakyStore, ScriptedRemote};
    use serde_json::json;
    use std::time::Duration;

    fn settings() -> SyncSettings {
        SyncSettings {
            device_id: "device-a".to_string(),
            batch_size: 50,
            default_language: LanguageSelection::Eng,
        }
    }

    fn orchestrator(
        kv: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteStateClient>,
    ) -> Arc<SyncOrchestrator> {
        Arc::new(SyncOrchestrator::new(kv, remote, settings()))
    }

    fn eng(id: u64) -> CatalogEntry {
        CatalogEntry::reference(Some("ENG"), Some(json!(id)))
    }

    const SEEN: EntryChange = EntryChange { seen: true, tbr: false };

    async fn settle(background: BackgroundSync) -> (MergeOutcome, FlushOutcome) {
        (background.refresh.await.unwrap(), background.flush.await.unwrap())
    }

    #[tokio::test]
    async fn test_update_without_profile_is_rejected() {
        let orch = orchestrator(setup_test_kv().await, ScriptedRemote::offline());
        let result = orch.update_entry(&eng(1), SEEN).await;
        assert!(matches!(result, Err(SyncError::NoActiveProfile)));
    }

    #[tokio::test]
    async fn test_select_profile_rejects_blank_id() {
        let orch = orchestrator(setup_test_kv().await, ScriptedRemote::offline());
        assert!(matches!(
            orch.select_profile("  ", None).await,
            Err(SyncError::InvalidProfile(_))
        ));
    }

    #[tokio::test]
    async fn test_update_survives_restart() {
        let kv = setup_test_kv().await;
        let orch = orchestrator(Arc::clone(&kv), ScriptedRemote::offline());
        settle(orch.select_profile("alice", None).await.unwrap()).await;

        orch.apply_local(&eng(7), SEEN).await.unwrap();

        let reopened = LocalStateStore::new(kv);
        let stored = reopened.load("alice").await;
        assert!(stored[&EntryKey::from("ENG-7")].seen);
    }

    #[tokio::test]
    async fn test_end_to_end_local_wins_over_older_remote() {
        let kv = setup_test_kv().await;
        let remote = ScriptedRemote::offline();
        let orch = orchestrator(Arc::clone(&kv), remote.clone());
        settle(orch.select_profile("alice", None).await.unwrap()).await;

        let outcome = orch.update_entry(&eng(42), SEEN).await.unwrap();
        let UpdateOutcome::Applied(applied) = outcome else {
            panic!("expected an applied update");
        };
        assert_eq!(applied.updated_by.as_deref(), Some("device-a"));

        let key = EntryKey::from("ENG-42");
        assert!(orch.entry_state(&key).await.unwrap().seen);
        assert!(LocalStateStore::new(Arc::clone(&kv)).load("alice").await[&key].seen);

        // The background push fails while offline, so the record stays queued
        let records = PendingQueue::new(Arc::clone(&kv)).records("alice").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, key);
        assert!(records[0].seen);

        let mut stale = Snapshot::new();
        stale.insert(key.clone(), entry_state(false, false, "2020-01-01T00:00:00.000Z"));
        remote.set_remote(Some(stale));

        let merge = orch.refresh_remote("alice").await;
        assert_eq!(merge, MergeOutcome::Merged { added: 0, replaced: 0, kept: 1 });
        assert!(orch.entry_state(&key).await.unwrap().seen);
        assert!(LocalStateStore::new(kv).load("alice").await[&key].seen);
    }

    #[tokio::test]
    async fn test_guest_profile_is_immutable() {
        let kv = setup_test_kv().await;
        let orch = orchestrator(Arc::clone(&kv), ScriptedRemote::offline());
        settle(orch.select_profile(GUEST_PROFILE_ID, None).await.unwrap()).await;
        let revision = orch.revision();

        let outcome = orch.update_entry(&eng(1), SEEN).await.unwrap();

        assert_eq!(outcome, UpdateOutcome::ReadOnly);
        assert!(orch.read_state(|s| s.is_empty()).await);
        assert_eq!(orch.revision(), revision);
        assert!(LocalStateStore::new(Arc::clone(&kv)).load(GUEST_PROFILE_ID).await.is_empty());
        assert_eq!(orch.pending_count(GUEST_PROFILE_ID).await, 0);
        assert_eq!(orch.flush(GUEST_PROFILE_ID).await, FlushOutcome::ReadOnly);
    }

    #[tokio::test]
    async fn test_failed_flush_leaves_queue_untouched() {
        let kv = setup_test_kv().await;
        let remote = ScriptedRemote::offline();
        let orch = orchestrator(Arc::clone(&kv), remote.clone());
        settle(orch.select_profile("alice", None).await.unwrap()).await;

        for id in 1..=3 {
            orch.apply_local(&eng(id), SEEN).await.unwrap();
        }
        let queue = PendingQueue::new(kv);
        let before = queue.records("alice").await.unwrap();

        let outcome = orch.flush("alice").await;
        assert!(matches!(outcome, FlushOutcome::Failed { pushed: 0, batches: 0, .. }));
        assert_eq!(queue.records("alice").await.unwrap(), before);

        // Next trigger after the service comes back delivers everything in order
        remote.set_remote(Some(Snapshot::new()));
        assert_eq!(orch.flush("alice").await, FlushOutcome::Drained { pushed: 3, batches: 1 });
        assert_eq!(remote.pushed_batches()[0], before);
        assert_eq!(queue.len("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_flush_drains_in_batches() {
        let kv = setup_test_kv().await;
        let remote = ScriptedRemote::online(Snapshot::new());
        let orch = orchestrator(Arc::clone(&kv), remote.clone());

        let queue = PendingQueue::new(kv);
        for i in 0..120 {
            queue.enqueue("alice", queue_record(&format!("ENG-{i}"), true, i)).await.unwrap();
        }

        let outcome = orch.flush("alice").await;

        assert_eq!(outcome, FlushOutcome::Drained { pushed: 120, batches: 3 });
        let batches = remote.pushed_batches();
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![50, 50, 20]);
        assert_eq!(batches[1][0].key, EntryKey::from("ENG-50"));
        assert_eq!(batches[2][19].key, EntryKey::from("ENG-119"));
        assert_eq!(queue.len("alice").await.unwrap(), 0);
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_concurrent_flush_is_coalesced() {
        let kv = setup_test_kv().await;
        let remote = ScriptedRemote::online(Snapshot::new());
        let orch = orchestrator(Arc::clone(&kv), remote.clone());
        let queue = PendingQueue::new(kv);
        queue.enqueue("alice", queue_record("ENG-1", true, 1)).await.unwrap();
        let gate = remote.gate_pushes();

        let running = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.flush("alice").await })
        };
        wait_until(|| remote.push_attempts() == 1).await;

        queue.enqueue("alice", queue_record("ENG-2", true, 2)).await.unwrap();
        assert_eq!(orch.flush("alice").await, FlushOutcome::InFlight);

        gate.add_permits(10);
        assert_eq!(running.await.unwrap(), FlushOutcome::Drained { pushed: 2, batches: 2 });
        assert_eq!(queue.len("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_trigger_after_last_peek_runs_flush_again() {
        let orch = orchestrator(setup_test_kv().await, ScriptedRemote::offline());

        let mut claim = orch.try_begin_flush("alice").unwrap();
        assert!(orch.try_begin_flush("alice").is_none());
        assert!(orch.try_begin_flush("bob").is_some());

        assert!(!claim.release_unless_rerun());
        assert!(claim.release_unless_rerun());
        drop(claim);
        assert!(orch.try_begin_flush("alice").is_some());
    }

    #[tokio::test]
    async fn test_flush_for_other_profile_is_not_coalesced() {
        let remote = ScriptedRemote::online(Snapshot::new());
        let orch = orchestrator(setup_test_kv().await, remote.clone());
        settle(orch.select_profile("alice", None).await.unwrap()).await;
        let gate = remote.gate_pushes();

        orch.update_entry(&eng(1), SEEN).await.unwrap();
        wait_until(|| remote.push_attempts() == 1).await;

        // Alice's push is stuck; bob's toggle must start a flush of its own
        settle(orch.select_profile("bob", None).await.unwrap()).await;
        orch.update_entry(&eng(2), SEEN).await.unwrap();
        wait_until(|| remote.push_attempts() == 2).await;

        gate.add_permits(10);
        tokio::time::timeout(Duration::from_secs(5), async {
            while orch.pending_count("alice").await + orch.pending_count("bob").await > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queues were not drained");

        let mut profiles = remote.pushed_profiles();
        profiles.sort();
        assert_eq!(profiles, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_push_rejection_keeps_queue_while_fetch_succeeds() {
        let remote = ScriptedRemote::online(Snapshot::new());
        let orch = orchestrator(setup_test_kv().await, remote.clone());
        settle(orch.select_profile("alice", None).await.unwrap()).await;
        remote.fail_pushes(true);
        orch.apply_local(&eng(4), SEEN).await.unwrap();

        let report = orch.sync_now().await.unwrap();

        assert!(matches!(report.merge, MergeOutcome::Merged { .. }));
        assert!(matches!(report.flush, FlushOutcome::Failed { pushed: 0, batches: 0, .. }));
        assert_eq!(orch.pending_count("alice").await, 1);
        assert!(orch.entry_state(&EntryKey::from("ENG-4")).await.unwrap().seen);

        remote.fail_pushes(false);
        assert_eq!(orch.flush("alice").await, FlushOutcome::Drained { pushed: 1, batches: 1 });
    }

    #[tokio::test]
    async fn test_update_entry_flushes_in_background() {
        let remote = ScriptedRemote::online(Snapshot::new());
        let orch = orchestrator(setup_test_kv().await, remote.clone());
        settle(orch.select_profile("alice", None).await.unwrap()).await;

        orch.update_entry(&eng(5), SEEN).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while orch.pending_count("alice").await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queue was not drained");
        assert_eq!(remote.pushed_batches().concat()[0].key, EntryKey::from("ENG-5"));
    }

    #[tokio::test]
    async fn test_profile_load_merges_newer_remote() {
        let kv = setup_test_kv().await;
        let mut local = Snapshot::new();
        local.insert(EntryKey::from("ENG-1"), entry_state(true, false, "2024-01-01T00:00:00.000Z"));
        local.insert(EntryKey::from("ENG-2"), entry_state(true, false, "2024-06-01T00:00:00.000Z"));
        LocalStateStore::new(Arc::clone(&kv)).save("alice", &local).await.unwrap();

        let mut remote_state = Snapshot::new();
        remote_state.insert(EntryKey::from("ENG-1"), entry_state(false, true, "2024-02-01T00:00:00.000Z"));
        remote_state.insert(EntryKey::from("ENG-2"), entry_state(false, false, "2024-01-01T00:00:00.000Z"));
        remote_state.insert(EntryKey::from("JPN-3"), entry_state(true, false, "2024-03-01T00:00:00.000Z"));
        let orch = orchestrator(Arc::clone(&kv), ScriptedRemote::online(remote_state));

        let revisions = orch.subscribe();
        let background = orch.select_profile("alice", None).await.unwrap();
        assert!(orch.read_state(|s| s.contains_key(&EntryKey::from("ENG-2"))).await);

        let (merge, _) = settle(background).await;
        assert_eq!(merge, MergeOutcome::Merged { added: 1, replaced: 1, kept: 1 });
        // One render for the local load, one for the merge
        assert_eq!(*revisions.borrow(), 2);

        let expected = |state: &Snapshot| {
            assert!(state[&EntryKey::from("ENG-1")].tbr);
            assert!(state[&EntryKey::from("ENG-2")].seen);
            assert!(state[&EntryKey::from("JPN-3")].seen);
        };
        orch.read_state(expected).await;
        expected(&LocalStateStore::new(kv).load("alice").await);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_local_state() {
        let kv = setup_test_kv().await;
        let mut local = Snapshot::new();
        local.insert(EntryKey::from("ENG-1"), entry_state(true, false, "2024-01-01T00:00:00.000Z"));
        LocalStateStore::new(Arc::clone(&kv)).save("alice", &local).await.unwrap();

        let orch = orchestrator(kv, ScriptedRemote::offline());
        let (merge, _) = settle(orch.select_profile("alice", None).await.unwrap()).await;

        assert!(matches!(merge, MergeOutcome::Skipped { .. }));
        assert_eq!(orch.read_state(Clone::clone).await, local);
    }

    #[tokio::test]
    async fn test_stale_profile_merge_is_discarded() {
        let mut remote_state = Snapshot::new();
        remote_state.insert(EntryKey::from("ENG-9"), entry_state(true, false, "2024-01-01T00:00:00.000Z"));
        let kv = setup_test_kv().await;
        let orch = orchestrator(Arc::clone(&kv), ScriptedRemote::online(remote_state));

        settle(orch.select_profile("bob", None).await.unwrap()).await;
        orch.sign_out().await;
        settle(orch.select_profile("carol", None).await.unwrap()).await;
        orch.read_state(|s| assert!(s.contains_key(&EntryKey::from("ENG-9")))).await;

        // A fetch for bob finishing after the switch must not touch carol
        orch.update_entry(&eng(1), EntryChange { seen: false, tbr: true }).await.unwrap();
        let before = orch.read_state(Clone::clone).await;
        assert_eq!(orch.refresh_remote("bob").await, MergeOutcome::Discarded);
        assert_eq!(orch.read_state(Clone::clone).await, before);
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_session_state() {
        let store = FlakyStore::new().await;
        let orch = orchestrator(store.clone(), ScriptedRemote::offline());
        settle(orch.select_profile("alice", None).await.unwrap()).await;
        store.reject_writes(true);

        let outcome = orch.apply_local(&eng(3), SEEN).await.unwrap();

        assert!(outcome.is_some());
        assert!(orch.entry_state(&EntryKey::from("ENG-3")).await.unwrap().seen);
        assert!(LocalStateStore::new(store.clone()).load("alice").await.is_empty());
        assert_eq!(orch.pending_count("alice").await, 0);
    }

    #[tokio::test]
    async fn test_failed_state_read_keeps_earlier_entries_persisted() {
        let store = FlakyStore::new().await;
        let orch = orchestrator(store.clone(), ScriptedRemote::offline());
        settle(orch.select_profile("alice", None).await.unwrap()).await;
        for id in 1..=5 {
            orch.apply_local(&eng(id), SEEN).await.unwrap();
        }

        store.fail_next_read();
        orch.apply_local(&eng(99), SEEN).await.unwrap();

        assert_eq!(orch.read_state(|s| s.len()).await, 6);
        let persisted = LocalStateStore::new(store.clone()).load("alice").await;
        assert_eq!(persisted, orch.read_state(Clone::clone).await);
        assert_eq!(orch.pending_count("alice").await, 6);
    }

    #[tokio::test]
    async fn test_restore_reopens_last_profile() {
        let kv = setup_test_kv().await;
        let first = orchestrator(Arc::clone(&kv), ScriptedRemote::offline());
        settle(first.select_profile("alice", Some("Alice".to_string())).await.unwrap()).await;
        first.set_language(LanguageSelection::Both).await.unwrap();
        first.apply_local(&eng(42), SEEN).await.unwrap();

        let second = orchestrator(kv, ScriptedRemote::offline());
        settle(second.restore().await.expect("profile restored")).await;

        let info = second.session_info().await.unwrap();
        assert_eq!(info.profile_id, "alice");
        assert_eq!(info.label.as_deref(), Some("Alice"));
        assert_eq!(info.language, LanguageSelection::Both);
        assert_eq!(info.entries, 1);
        assert_eq!(info.pending, 1);
    }

    #[tokio::test]
    async fn test_restore_without_profile() {
        let orch = orchestrator(setup_test_kv().await, ScriptedRemote::offline());
        assert!(orch.restore().await.is_none());
        assert_eq!(orch.language().await, LanguageSelection::Eng);
    }

    #[tokio::test]
    async fn test_sign_out_clears_session() {
        let kv = setup_test_kv().await;
        let orch = orchestrator(Arc::clone(&kv), ScriptedRemote::offline());
        settle(orch.select_profile("alice", None).await.unwrap()).await;

        orch.sign_out().await;

        assert!(orch.session_info().await.is_none());
        assert!(Preferences::new(kv).active_profile().await.is_none());
        assert!(matches!(orch.sync_now().await, Err(SyncError::NoActiveProfile)));
    }

    #[tokio::test]
    async fn test_set_language_without_session() {
        let kv = setup_test_kv().await;
        let orch = orchestrator(Arc::clone(&kv), ScriptedRemote::offline());

        assert!(orch.set_language(LanguageSelection::Jpn).await.unwrap().is_none());
        assert_eq!(orch.language().await, LanguageSelection::Jpn);
        assert_eq!(Preferences::new(kv).language().await, Some(LanguageSelection::Jpn));
    }

    #[tokio::test]
    async fn test_sync_now_reports_both_steps() {
        let remote = ScriptedRemote::online(Snapshot::new());
        let orch = orchestrator(setup_test_kv().await, remote.clone());
        settle(orch.select_profile("alice", None).await.unwrap()).await;
        orch.apply_local(&eng(1), SEEN).await.unwrap();

        let report = orch.sync_now().await.unwrap();

        assert_eq!(report.profile_id, "alice");
        assert_eq!(report.merge, MergeOutcome::Merged { added: 0, replaced: 0, kept: 0 });
        assert_eq!(report.flush, FlushOutcome::Drained { pushed: 1, batches: 1 });
        // One fetch on profile load, one for the manual sync
        assert_eq!(remote.fetch_count(), 2);
    }
}
