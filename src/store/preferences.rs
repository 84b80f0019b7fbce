// SPDX-License-Identifier: GPL-3.0-only
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::LanguageSelection;
use crate::store::error::StoreError;
use crate::store::traits::KeyValueStore;

const ACTIVE_PROFILE_KEY: &str = "anime_va.active_profile";
const LANGUAGE_KEY: &str = "anime_va.language";
const DEVICE_ID_KEY: &str = "anime_va.device_id";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveProfile {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// Small process-wide settings restored across sessions
#[derive(Clone)]
pub struct Preferences {
    kv: Arc<dyn KeyValueStore>,
}

impl Preferences {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.kv.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key, error = %e, "Ignoring unreadable preference");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "Failed to read preference");
                None
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.kv.set(key, &serde_json::to_string(value)?).await
    }

    pub async fn active_profile(&self) -> Option<ActiveProfile> {
        self.read(ACTIVE_PROFILE_KEY).await
    }

    pub async fn set_active_profile(&self, profile: &ActiveProfile) -> Result<(), StoreError> {
        self.write(ACTIVE_PROFILE_KEY, profile).await
    }

    pub async fn clear_active_profile(&self) -> Result<(), StoreError> {
        self.kv.remove(ACTIVE_PROFILE_KEY).await
    }

    pub async fn language(&self) -> Option<LanguageSelection> {
        self.read(LANGUAGE_KEY).await
    }

    pub async fn set_language(&self, language: LanguageSelection) -> Result<(), StoreError> {
        self.write(LANGUAGE_KEY, &language).await
    }

    /// Device tag for this installation, generated on first use
    ///
    /// If the generated tag cannot be persisted it is still returned; the next
    /// start will simply generate another one.
    pub async fn device_id(&self) -> String {
        if let Some(existing) = self.read::<String>(DEVICE_ID_KEY).await {
            return existing;
        }

        let generated = format!("daemon-{}", Uuid::new_v4());
        match self.write(DEVICE_ID_KEY, &generated).await {
            Ok(()) => info!(device_id = %generated, "Generated device id"),
            Err(e) => warn!(error = %e, "Failed to persist generated device id"),
        }
        generated
    }
}
