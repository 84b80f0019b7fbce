// SPDX-License-Identifier: GPL-3.0-only
use serde::Serialize;

use crate::catalog::LanguageSelection;
use crate::store::Snapshot;

/// Shared demo profile. Anyone may browse it, nobody may change it.
pub const GUEST_PROFILE_ID: &str = "guest";

/// The signed-in profile and its in-memory entry states
#[derive(Debug, Clone)]
pub struct Session {
    pub profile_id: String,
    pub label: Option<String>,
    pub language: LanguageSelection,
    pub state: Snapshot,
}

impl Session {
    pub fn new(profile_id: String, label: Option<String>, language: LanguageSelection) -> Self {
        Self {
            profile_id,
            label,
            language,
            state: Snapshot::new(),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.profile_id == GUEST_PROFILE_ID
    }
}

/// Serializable view of the session for API responses
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub profile_id: String,
    pub label: Option<String>,
    pub language: LanguageSelection,
    pub read_only: bool,
    pub entries: usize,
    pub pending: usize,
}

/// Normalize a user supplied profile id. Blank ids are rejected.
pub fn normalize_profile_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
