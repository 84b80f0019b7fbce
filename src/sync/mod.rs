// SPDX-License-Identifier: GPL-3.0-only
pub mod backend;
pub mod error;
pub mod orchestrator;
pub mod reconcile;
pub mod session;
pub mod traits;

pub use backend::HttpRemoteStateClient;
pub use error::SyncError;
pub use orchestrator::{
    EntryChange, SyncOrchestrator, SyncReport, SyncSettings, UpdateOutcome,
};
pub use session::SessionInfo;
pub use traits::RemoteStateClient;
