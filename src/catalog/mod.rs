// SPDX-License-Identifier: GPL-3.0-only
pub mod images;
pub mod key;
pub mod loader;
pub mod models;
pub mod search;

pub use images::ImageResolver;
pub use key::EntryKey;
pub use loader::Catalog;
pub use models::{CatalogEntry, LanguageSelection};
pub use search::{anime_progress, effective_seen, search, suggest, CatalogQuery, SeenStatus};
