// SPDX-License-Identifier: GPL-3.0-only
use reqwest::StatusCode;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("remote store returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("invalid remote payload: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    Request(String),

    #[error("invalid profile id: {0:?}")]
    InvalidProfile(String),

    #[error("no active profile")]
    NoActiveProfile,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Failures that a later attempt may get past without any local change
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Network(_) => true,
            SyncError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}
