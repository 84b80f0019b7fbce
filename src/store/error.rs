// SPDX-License-Identifier: GPL-3.0-only
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("unsupported record version {found} (newest known is {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("storage rejected the write: {0}")]
    Rejected(String),
}
