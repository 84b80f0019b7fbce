// SPDX-License-Identifier: GPL-3.0-only
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::catalog::EntryKey;
use crate::store::error::StoreError;

/// Version written into every persisted record blob
pub const SCHEMA_VERSION: u32 = 1;

/// Synchronized seen / TBR state of one entry key
///
/// The whole record travels as a unit: reconciliation adopts one side's
/// record wholesale and never mixes fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryState {
    #[serde(default, deserialize_with = "null_as_default")]
    pub seen: bool,

    /// "To be read", i.e. plan to watch
    #[serde(default, deserialize_with = "null_as_default")]
    pub tbr: bool,

    /// ISO-8601 UTC timestamp, fixed width, empty when unknown
    #[serde(default, deserialize_with = "null_as_default")]
    pub updated: String,

    /// Device that made the change. Diagnostic only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

/// Entry key -> state mapping for one profile
pub type Snapshot = BTreeMap<EntryKey, EntryState>;

/// One not-yet-acknowledged mutation, as sent to the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub key: EntryKey,
    pub seen: bool,
    pub tbr: bool,
    pub updated: String,
}

impl QueueRecord {
    pub fn from_state(key: EntryKey, state: &EntryState) -> Self {
        Self {
            key,
            seen: state.seen,
            tbr: state.tbr,
            updated: state.updated.clone(),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn legacy_version() -> u32 {
    SCHEMA_VERSION
}

fn check_version(found: u32) -> Result<(), StoreError> {
    if found > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedVersion {
            found,
            supported: SCHEMA_VERSION,
        });
    }
    Ok(())
}

/// Persisted per-profile state: `{"version": 1, "entries": {...}}`
///
/// Blobs written before versioning (`{"entries": {...}}`) read as version 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateBlob {
    #[serde(default = "legacy_version")]
    pub version: u32,
    #[serde(default)]
    pub entries: Snapshot,
}

impl StateBlob {
    pub fn encode(entries: &Snapshot) -> Result<String, StoreError> {
        #[derive(Serialize)]
        struct Borrowed<'a> {
            version: u32,
            entries: &'a Snapshot,
        }

        Ok(serde_json::to_string(&Borrowed {
            version: SCHEMA_VERSION,
            entries,
        })?)
    }

    pub fn decode(raw: &str) -> Result<Snapshot, StoreError> {
        let blob: StateBlob = serde_json::from_str(raw)?;
        check_version(blob.version)?;
        Ok(blob.entries)
    }
}

/// Persisted per-profile pending queue: `{"version": 1, "records": [...]}`
///
/// A bare JSON array of records is the pre-versioning form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueBlob {
    #[serde(default = "legacy_version")]
    pub version: u32,
    #[serde(default)]
    pub records: Vec<QueueRecord>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QueueRepr {
    Versioned(QueueBlob),
    Legacy(Vec<QueueRecord>),
}

impl QueueBlob {
    pub fn encode(records: &[QueueRecord]) -> Result<String, StoreError> {
        #[derive(Serialize)]
        struct Borrowed<'a> {
            version: u32,
            records: &'a [QueueRecord],
        }

        Ok(serde_json::to_string(&Borrowed {
            version: SCHEMA_VERSION,
            records,
        })?)
    }

    pub fn decode(raw: &str) -> Result<Vec<QueueRecord>, StoreError> {
        match serde_json::from_str::<QueueRepr>(raw)? {
            QueueRepr::Versioned(blob) => {
                check_version(blob.version)?;
                Ok(blob.records)
            }
            QueueRepr::Legacy(records) => Ok(records),
        }
    }
}
