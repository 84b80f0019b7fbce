// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;

use crate::store::{QueueRecord, Snapshot};
use crate::sync::error::SyncError;

/// Request/response access to the remote per-profile state service
///
/// Implementations never touch local state; callers apply the results.
#[async_trait]
pub trait RemoteStateClient: Send + Sync {
    /// Remote snapshot for the profile
    async fn fetch_state(&self, profile_id: &str) -> Result<Snapshot, SyncError>;

    /// Deliver a batch of queued updates. The batch is accepted or rejected as
    /// a whole.
    async fn push_updates(&self, profile_id: &str, batch: &[QueueRecord]) -> Result<(), SyncError>;
}
