// SPDX-License-Identifier: GPL-3.0-only
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

use crate::catalog::models::{CatalogEntry, Language, LanguageSelection};

/// Catalog files are either a bare array or wrapped as `{ "data": [...] }`
#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Entries(Vec<CatalogEntry>),
    Wrapped {
        #[serde(default)]
        data: Vec<CatalogEntry>,
    },
}

impl CatalogFile {
    fn into_entries(self) -> Vec<CatalogEntry> {
        match self {
            CatalogFile::Entries(entries) => entries,
            CatalogFile::Wrapped { data } => data,
        }
    }
}

/// In-memory catalog for the selected language(s)
#[derive(Debug, Clone)]
pub struct Catalog {
    pub selection: LanguageSelection,
    pub entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Load every file of `selection` from `dir`
    ///
    /// A missing or unparseable file is logged and contributes no entries, so
    /// the catalog stays usable with whatever did load.
    pub async fn load(dir: &Path, selection: LanguageSelection) -> Self {
        let mut entries = Vec::new();

        for language in selection.languages() {
            let path = dir.join(language.file_name());
            match load_file(&path, *language).await {
                Ok(mut loaded) => {
                    info!(path = %path.display(), count = loaded.len(), "Loaded catalog file");
                    entries.append(&mut loaded);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping catalog file");
                }
            }
        }

        Self { selection, entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

async fn load_file(path: &Path, language: Language) -> anyhow::Result<Vec<CatalogEntry>> {
    let contents = tokio::fs::read_to_string(path).await?;
    let file: CatalogFile = serde_json::from_str(&contents)?;

    Ok(tag_language(file.into_entries(), language))
}

/// Tag entries that carry no language with the language of their source file
pub fn tag_language(entries: Vec<CatalogEntry>, language: Language) -> Vec<CatalogEntry> {
    entries
        .into_iter()
        .map(|mut entry| {
            if entry.language.as_deref().is_none_or(str::is_empty) {
                entry.language = Some(language.code().to_string());
            }
            entry
        })
        .collect()
}
