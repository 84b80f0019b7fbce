// SPDX-License-Identifier: GPL-3.0-only
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;

/// Language code used when an entry carries no language tag
pub const PRIMARY_LANGUAGE: &str = "ENG";

/// Stable identifier of one catalog record's user-state slot: `{LANGUAGE}-{ID}`
///
/// This is the join key between catalog data and synchronized state, so every
/// call site must build it through [`EntryKey::derive`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryKey(String);

impl EntryKey {
    /// Derive the key for a (language, identifier) pair.
    ///
    /// The language is upper-cased and falls back to [`PRIMARY_LANGUAGE`] when
    /// absent or empty. A missing identifier yields a degenerate key such as
    /// `"ENG-"`; that is accepted rather than rejected.
    pub fn derive(language: Option<&str>, id: Option<&Value>) -> Self {
        let language = language
            .map(str::to_uppercase)
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| PRIMARY_LANGUAGE.to_string());
        let id = id.map(scalar_to_string).unwrap_or_default();

        EntryKey(format!("{}-{}", language, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for EntryKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntryKey {
    fn from(raw: &str) -> Self {
        EntryKey(raw.to_string())
    }
}

impl From<String> for EntryKey {
    fn from(raw: String) -> Self {
        EntryKey(raw)
    }
}

/// String form of a JSON scalar as the catalog feeds present it.
///
/// `null` becomes empty, strings pass through unquoted, integral floats drop
/// their fraction (`42.0` -> `"42"`).
pub fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                n.as_f64().map(|f| f.to_string()).unwrap_or_else(|| n.to_string())
            }
        }
        other => other.to_string(),
    }
}
