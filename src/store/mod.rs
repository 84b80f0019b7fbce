// SPDX-License-Identifier: GPL-3.0-only
pub mod error;
pub mod local_state;
pub mod models;
pub mod preferences;
pub mod queue;
pub mod sqlite;
pub mod traits;

pub use error::StoreError;
pub use local_state::LocalStateStore;
pub use models::{EntryState, QueueRecord, Snapshot};
pub use preferences::{ActiveProfile, Preferences};
pub use queue::PendingQueue;
pub use sqlite::SqliteKeyValueStore;
pub use traits::KeyValueStore;
