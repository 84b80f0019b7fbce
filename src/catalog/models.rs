// SPDX-License-Identifier: GPL-3.0-only
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::catalog::key::{scalar_to_string, EntryKey};

pub const ANIME_FIELDS: &[&str] = &["anime"];
pub const CHARACTER_FIELDS: &[&str] = &["character"];
pub const VOICE_ACTOR_FIELDS: &[&str] = &["voiceActor", "voice_actor", "va"];
pub const YEAR_FIELDS: &[&str] = &["year"];
pub const MEDIA_TYPE_FIELDS: &[&str] = &["media_type", "type", "format"];
pub const CHARACTER_IMAGE_FIELDS: &[&str] = &["characterImage"];
pub const VOICE_ACTOR_IMAGE_FIELDS: &[&str] = &["voiceActorImage"];

/// Catalog languages with a data file of their own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Language {
    Eng,
    Jpn,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::Eng => "ENG",
            Language::Jpn => "JPN",
        }
    }

    /// Name of the catalog file holding this language's entries
    pub fn file_name(self) -> &'static str {
        match self {
            Language::Eng => "anime_va_eng.json",
            Language::Jpn => "anime_va_jpn.json",
        }
    }
}

/// Which catalog files are loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LanguageSelection {
    Eng,
    Jpn,
    Both,
}

impl LanguageSelection {
    pub fn languages(self) -> &'static [Language] {
        match self {
            LanguageSelection::Eng => &[Language::Eng],
            LanguageSelection::Jpn => &[Language::Jpn],
            LanguageSelection::Both => &[Language::Eng, Language::Jpn],
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            LanguageSelection::Eng => "ENG",
            LanguageSelection::Jpn => "JPN",
            LanguageSelection::Both => "BOTH",
        }
    }
}

impl fmt::Display for LanguageSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for LanguageSelection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ENG" => Ok(LanguageSelection::Eng),
            "JPN" => Ok(LanguageSelection::Jpn),
            "BOTH" => Ok(LanguageSelection::Both),
            other => Err(anyhow::anyhow!("Unknown catalog language: {}", other)),
        }
    }
}

/// One character / voice actor record from a catalog file
///
/// Only the fields the sync engine relies on are typed. Display fields stay in
/// `fields` under whatever name the feed used and are read through the
/// accessor methods, which accept the known aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Seen value baked into the feed, used when the profile has no state for the entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seen: Option<Value>,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CatalogEntry {
    /// Minimal entry carrying only what keying needs
    pub fn reference(language: Option<&str>, id: Option<Value>) -> Self {
        Self {
            id,
            language: language.map(str::to_string),
            seen: None,
            fields: Map::new(),
        }
    }

    pub fn key(&self) -> EntryKey {
        EntryKey::derive(self.language.as_deref(), self.id.as_ref())
    }

    /// First non-null value among `names`, as a string
    pub fn field(&self, names: &[&str]) -> Option<String> {
        names
            .iter()
            .filter_map(|name| self.fields.get(*name))
            .find(|value| !value.is_null())
            .map(scalar_to_string)
    }

    fn text(&self, names: &[&str]) -> String {
        self.field(names).unwrap_or_default()
    }

    pub fn anime(&self) -> String {
        self.text(ANIME_FIELDS)
    }

    pub fn character(&self) -> String {
        self.text(CHARACTER_FIELDS)
    }

    pub fn voice_actor(&self) -> String {
        self.text(VOICE_ACTOR_FIELDS)
    }

    pub fn year(&self) -> String {
        self.text(YEAR_FIELDS)
    }

    pub fn media_type(&self) -> String {
        self.text(MEDIA_TYPE_FIELDS)
    }

    pub fn character_image(&self) -> String {
        self.text(CHARACTER_IMAGE_FIELDS).trim().to_string()
    }

    pub fn voice_actor_image(&self) -> String {
        self.text(VOICE_ACTOR_IMAGE_FIELDS).trim().to_string()
    }
}
