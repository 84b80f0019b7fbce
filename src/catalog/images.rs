// SPDX-License-Identifier: GPL-3.0-only
use url::form_urlencoded;

use crate::catalog::models::CatalogEntry;

/// Resolves catalog image references against the image host
#[derive(Debug, Clone)]
pub struct ImageResolver {
    base_url: String,
    version: Option<String>,
}

impl ImageResolver {
    pub fn new(base_url: impl Into<String>, version: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            version,
        }
    }

    pub fn character_image(&self, entry: &CatalogEntry) -> Option<String> {
        self.resolve(&entry.character_image(), entry.language.as_deref())
    }

    pub fn voice_actor_image(&self, entry: &CatalogEntry) -> Option<String> {
        self.resolve(&entry.voice_actor_image(), entry.language.as_deref())
    }

    /// Absolute and explicitly relative references pass through. Bare file
    /// names, including legacy `images/eng/...` paths, are placed under the
    /// language folder of the image host.
    pub fn resolve(&self, raw: &str, language: Option<&str>) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        if ["http://", "https://", "./", "../"]
            .iter()
            .any(|prefix| trimmed.starts_with(prefix))
        {
            return Some(trimmed.to_string());
        }

        let mut file_name = trimmed;
        for prefix in ["images/", "eng/", "jpn/"] {
            file_name = strip_prefix_ignore_case(file_name, prefix);
        }

        let language = language.unwrap_or_default().to_lowercase();
        let folder = if language.contains("jpn") || language == "jp" {
            "jpn"
        } else {
            "eng"
        };

        let mut url = format!("{}/{}/{}", self.base_url, folder, file_name);
        if let Some(version) = &self.version {
            let encoded: String = form_urlencoded::byte_serialize(version.as_bytes()).collect();
            url.push_str("?v=");
            url.push_str(&encoded);
        }
        Some(url)
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> &'a str {
    match value.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => &value[prefix.len()..],
        _ => value,
    }
}
