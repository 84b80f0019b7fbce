// SPDX-License-Identifier: GPL-3.0-only
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::catalog::models::{CatalogEntry, ANIME_FIELDS};
use crate::store::models::{EntryState, Snapshot};

pub const DEFAULT_PAGE_SIZE: usize = 50;
/// Hard cap on rows returned for one page
pub const MAX_PAGE_SIZE: usize = 100;
/// Unfiltered browsing is limited to this many leading entries
pub const CLAMP_LIMIT: usize = 250;
pub const MAX_SUGGESTIONS: usize = 8;

const UNKNOWN_ANIME: &str = "Unknown anime";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeenStatus {
    Seen,
    Unseen,
    Planning,
    Unknown,
}

/// Interpret a free-form seen value from a catalog feed
pub fn normalize_seen(raw: Option<&Value>) -> SeenStatus {
    let text = match raw {
        None | Some(Value::Null) => return SeenStatus::Unknown,
        Some(Value::Bool(true)) => return SeenStatus::Seen,
        Some(Value::Bool(false)) => return SeenStatus::Unseen,
        Some(Value::String(s)) => s.to_lowercase(),
        Some(other) => other.to_string().to_lowercase(),
    };

    if text.is_empty() {
        SeenStatus::Unknown
    } else if text == "true" || text.starts_with("seen") || text == "y" || text == "yes" {
        SeenStatus::Seen
    } else if text == "false" || text.starts_with("unseen") || text == "n" || text == "no" {
        SeenStatus::Unseen
    } else if text.contains("plan") || text.contains("hold") {
        SeenStatus::Planning
    } else {
        SeenStatus::Unknown
    }
}

/// Profile state wins over the value baked into the catalog
pub fn effective_seen(entry: &CatalogEntry, state: Option<&EntryState>) -> SeenStatus {
    match state {
        Some(state) if state.seen => SeenStatus::Seen,
        Some(_) => SeenStatus::Unseen,
        None => normalize_seen(entry.seen.as_ref()),
    }
}

/// Fold text for matching: lowercase, strip accents and romaji long vowels,
/// collapse whitespace.
pub fn normalize_search_text(text: &str) -> String {
    let folded: String = text
        .to_lowercase()
        .chars()
        .filter(|c| !is_combining_mark(*c))
        .map(fold_accent)
        .collect();

    let collapsed = collapse_long_vowels(&folded);
    collapsed.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_combining_mark(c: char) -> bool {
    ('\u{0300}'..='\u{036f}').contains(&c)
}

fn fold_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
        'ç' | 'ć' | 'č' => 'c',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ė' | 'ę' | 'ě' => 'e',
        'ì' | 'í' | 'î' | 'ï' | 'ī' | 'į' => 'i',
        'ñ' | 'ń' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ō' | 'ő' => 'o',
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' => 'u',
        'ý' | 'ÿ' => 'y',
        _ => c,
    }
}

/// `ou` -> `o`, `uu` -> `u`, then runs of `o` or `u` -> one
fn collapse_long_vowels(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut pairs = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        pairs.push(c);
        if matches!(c, 'o' | 'u') && chars.get(i + 1) == Some(&'u') {
            i += 2;
        } else {
            i += 1;
        }
    }

    let mut out = String::with_capacity(pairs.len());
    let mut last: Option<char> = None;
    for c in pairs.chars() {
        if matches!(c, 'o' | 'u') && last == Some(c) {
            continue;
        }
        out.push(c);
        last = Some(c);
    }
    out
}

/// Single token: substring match. Several tokens: every token must be a whole
/// word of the haystack, in any order.
fn matches_tokens(haystack: &str, tokens: &[&str]) -> bool {
    match tokens {
        [] => true,
        [single] => haystack.contains(single),
        many => {
            let words: HashSet<&str> = haystack.split(' ').collect();
            many.iter().all(|t| words.contains(t))
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeenFilter {
    #[default]
    All,
    Seen,
    Unseen,
    Planning,
    /// Entries the profile marked "to be read / plan to watch"
    Tbr,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Anime,
    Character,
    #[serde(alias = "va")]
    VoiceActor,
    Year,
    /// Catalog order
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogQuery {
    #[serde(rename = "q")]
    pub text: Option<String>,
    pub seen: SeenFilter,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    #[serde(rename = "image")]
    pub with_image_only: bool,
    pub sort: SortKey,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    /// Page through every match instead of the leading `CLAMP_LIMIT`
    #[serde(rename = "all")]
    pub show_all: bool,
}

impl CatalogQuery {
    fn media_type_filter(&self) -> Option<String> {
        self.media_type
            .as_deref()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty() && t != "all")
    }

    fn has_default_filters(&self) -> bool {
        self.seen == SeenFilter::All && self.media_type_filter().is_none() && !self.with_image_only
    }
}

#[derive(Debug, Clone)]
pub struct SearchPage<'a> {
    pub total_in_catalog: usize,
    /// Matches before clamping
    pub total_matches: usize,
    pub clamped: bool,
    pub page: usize,
    pub total_pages: usize,
    pub page_size: usize,
    pub entries: Vec<&'a CatalogEntry>,
}

/// Filter, sort and page catalog entries against the active profile state
pub fn search<'a>(entries: &'a [CatalogEntry], state: &Snapshot, query: &CatalogQuery) -> SearchPage<'a> {
    let query_norm = normalize_search_text(query.text.as_deref().unwrap_or_default());
    let tokens: Vec<&str> = if query_norm.is_empty() {
        Vec::new()
    } else {
        query_norm.split(' ').collect()
    };
    let media_type = query.media_type_filter();

    let mut results: Vec<&CatalogEntry> = entries
        .iter()
        .filter(|entry| {
            if tokens.is_empty() {
                return true;
            }
            let haystack = normalize_search_text(&format!(
                "{} {} {}",
                entry.anime(),
                entry.character(),
                entry.voice_actor()
            ));
            matches_tokens(&haystack, &tokens)
        })
        .filter(|entry| {
            let entry_state = state.get(&entry.key());
            match query.seen {
                SeenFilter::All => true,
                SeenFilter::Seen => effective_seen(entry, entry_state) == SeenStatus::Seen,
                SeenFilter::Unseen => effective_seen(entry, entry_state) == SeenStatus::Unseen,
                SeenFilter::Planning => effective_seen(entry, entry_state) == SeenStatus::Planning,
                SeenFilter::Tbr => entry_state.is_some_and(|s| s.tbr),
            }
        })
        .filter(|entry| match &media_type {
            Some(wanted) => entry.media_type().trim().to_lowercase() == *wanted,
            None => true,
        })
        .filter(|entry| {
            !query.with_image_only
                || !entry.character_image().is_empty()
                || !entry.voice_actor_image().is_empty()
        })
        .collect();

    sort_entries(&mut results, query.sort);

    let total_matches = results.len();
    let clamped = !query.show_all
        && tokens.is_empty()
        && query.has_default_filters()
        && total_matches > CLAMP_LIMIT;
    if clamped {
        results.truncate(CLAMP_LIMIT);
    }

    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let total_pages = results.len().div_ceil(page_size).max(1);
    let page = query.page.unwrap_or(1).clamp(1, total_pages);
    let start = (page - 1) * page_size;
    let end = (start + page_size).min(results.len());
    let page_entries = results.get(start..end).map(<[_]>::to_vec).unwrap_or_default();

    SearchPage {
        total_in_catalog: entries.len(),
        total_matches,
        clamped,
        page,
        total_pages,
        page_size,
        entries: page_entries,
    }
}

fn sort_entries(results: &mut [&CatalogEntry], sort: SortKey) {
    let key_of: fn(&CatalogEntry) -> String = match sort {
        SortKey::Anime => CatalogEntry::anime,
        SortKey::Character => CatalogEntry::character,
        SortKey::VoiceActor => CatalogEntry::voice_actor,
        SortKey::Year => CatalogEntry::year,
        SortKey::None => return,
    };
    results.sort_by_cached_key(|entry| key_of(entry).to_lowercase());
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    Character,
    Anime,
    VoiceActor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub label: String,
    pub kind: SuggestionKind,
}

/// Distinct character / anime / voice actor labels matching a partial query
pub fn suggest(entries: &[CatalogEntry], text: &str) -> Vec<Suggestion> {
    let query_norm = normalize_search_text(text);
    if query_norm.is_empty() {
        return Vec::new();
    }
    let tokens: Vec<&str> = query_norm.split(' ').collect();

    let mut seen = HashSet::new();
    let mut suggestions = Vec::new();

    for entry in entries {
        let candidates = [
            (entry.character(), SuggestionKind::Character),
            (entry.anime(), SuggestionKind::Anime),
            (entry.voice_actor(), SuggestionKind::VoiceActor),
        ];

        for (label, kind) in candidates {
            let label_norm = normalize_search_text(&label);
            if label_norm.is_empty() || !matches_tokens(&label_norm, &tokens) {
                continue;
            }
            if seen.insert((kind.clone(), label.clone())) {
                suggestions.push(Suggestion { label, kind });
                if suggestions.len() >= MAX_SUGGESTIONS {
                    return suggestions;
                }
            }
        }
    }

    suggestions
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimeProgress {
    pub anime: String,
    pub total: usize,
    pub seen: usize,
}

/// Per-anime entry counts, sorted by title
pub fn anime_progress(entries: &[CatalogEntry], state: &Snapshot) -> Vec<AnimeProgress> {
    let mut by_anime: BTreeMap<String, AnimeProgress> = BTreeMap::new();

    for entry in entries {
        let anime = entry
            .field(ANIME_FIELDS)
            .unwrap_or_else(|| UNKNOWN_ANIME.to_string());
        let seen = effective_seen(entry, state.get(&entry.key())) == SeenStatus::Seen;

        let progress = by_anime.entry(anime.clone()).or_insert_with(|| AnimeProgress {
            anime,
            total: 0,
            seen: 0,
        });
        progress.total += 1;
        if seen {
            progress.seen += 1;
        }
    }

    let mut rows: Vec<AnimeProgress> = by_anime.into_values().collect();
    rows.sort_by_cached_key(|row| row.anime.to_lowercase());
    rows
}
