// SPDX-License-Identifier: GPL-3.0-only
use crate::store::{EntryState, Snapshot};

/// Counts describing what a merge took from each side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Keys only the remote side knew
    pub added: usize,
    /// Keys where the remote record replaced the local one
    pub replaced: usize,
    /// Keys where the local record was kept over a remote one
    pub kept: usize,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        self.added + self.replaced > 0
    }
}

/// Whether `remote` beats `local` under last-write-wins
///
/// Timestamps compare as strings; they are fixed-width UTC ISO-8601 so the
/// ordering is chronological. An empty remote timestamp never wins, an empty
/// local one always loses to a non-empty remote one, and ties keep local.
pub fn remote_wins(local: &EntryState, remote: &EntryState) -> bool {
    !remote.updated.is_empty() && (local.updated.is_empty() || remote.updated > local.updated)
}

/// Union of both snapshots, taking the newer record per key
pub fn merge(local: &Snapshot, remote: &Snapshot) -> Snapshot {
    merge_with_report(local, remote).0
}

pub fn merge_with_report(local: &Snapshot, remote: &Snapshot) -> (Snapshot, MergeReport) {
    let mut merged = local.clone();
    let mut report = MergeReport::default();

    for (key, remote_state) in remote {
        match local.get(key) {
            None => report.added += 1,
            Some(local_state) if remote_wins(local_state, remote_state) => report.replaced += 1,
            Some(_) => {
                report.kept += 1;
                continue;
            }
        }
        merged.insert(key.clone(), remote_state.clone());
    }

    (merged, report)
}
