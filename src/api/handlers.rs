// SPDX-License-Identifier: GPL-3.0-only
use axum::extract::Query;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::catalog::search::{AnimeProgress, Suggestion};
use crate::catalog::{
    anime_progress, effective_seen, search, suggest, Catalog, CatalogEntry, CatalogQuery, EntryKey,
    ImageResolver, LanguageSelection, SeenStatus,
};
use crate::store::Snapshot;
use crate::sync::{
    EntryChange, SessionInfo, SyncError, SyncOrchestrator, SyncReport, UpdateOutcome,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct SelectProfileRequest {
    pub id: String,
    pub label: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LanguageRequest {
    pub language: String,
}

/// Entry reference plus the requested state
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateEntryRequest {
    pub language: Option<String>,
    pub id: Option<Value>,
    #[serde(flatten)]
    pub change: EntryChange,
}

#[derive(Debug, Default, Deserialize)]
pub struct SuggestQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Catalog entry merged with the active profile's state
///
/// The feed record is nested so its field names never collide with ours.
#[derive(Debug, Serialize)]
pub struct EntryView {
    pub key: EntryKey,
    pub status: SeenStatus,
    pub tbr: bool,
    pub updated: Option<String>,
    pub character_image_url: Option<String>,
    pub voice_actor_image_url: Option<String>,
    pub entry: CatalogEntry,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub language: LanguageSelection,
    pub total_in_catalog: usize,
    pub total_matches: usize,
    pub clamped: bool,
    pub page: usize,
    pub total_pages: usize,
    pub page_size: usize,
    pub entries: Vec<EntryView>,
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, StatusCode>;

fn status_for(err: &SyncError) -> StatusCode {
    match err {
        SyncError::NoActiveProfile => StatusCode::CONFLICT,
        SyncError::InvalidProfile(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub struct ApiHandlers {
    orchestrator: Arc<SyncOrchestrator>,
    catalog: RwLock<Catalog>,
    catalog_dir: PathBuf,
    images: ImageResolver,
}

impl ApiHandlers {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        catalog: Catalog,
        catalog_dir: PathBuf,
        images: ImageResolver,
    ) -> Self {
        Self {
            orchestrator,
            catalog: RwLock::new(catalog),
            catalog_dir,
            images,
        }
    }

    /// Reload the catalog files when the language no longer matches
    async fn ensure_catalog(&self, language: LanguageSelection) {
        if self.catalog.read().await.selection == language {
            return;
        }
        let catalog = Catalog::load(&self.catalog_dir, language).await;
        info!(language = %language, count = catalog.len(), "Catalog reloaded");
        *self.catalog.write().await = catalog;
    }

    fn entry_view(&self, entry: &CatalogEntry, state: &Snapshot) -> EntryView {
        let key = entry.key();
        let profile_state = state.get(&key);
        EntryView {
            status: effective_seen(entry, profile_state),
            tbr: profile_state.is_some_and(|s| s.tbr),
            updated: profile_state
                .map(|s| s.updated.clone())
                .filter(|u| !u.is_empty()),
            character_image_url: self.images.character_image(entry),
            voice_actor_image_url: self.images.voice_actor_image(entry),
            key,
            entry: entry.clone(),
        }
    }
}

impl ApiHandlers {
    pub async fn health() -> Json<ApiResponse<&'static str>> {
        Json(ApiResponse::success("ok"))
    }

    pub async fn profile(&self) -> Json<ApiResponse<Option<SessionInfo>>> {
        Json(ApiResponse::success(self.orchestrator.session_info().await))
    }

    pub async fn list_profiles(&self) -> ApiResult<Vec<String>> {
        match self.orchestrator.known_profiles().await {
            Ok(profiles) => Ok(Json(ApiResponse::success(profiles))),
            Err(e) => {
                error!(error = %e, "Failed to list profiles");
                Err(status_for(&e))
            }
        }
    }

    pub async fn select_profile(
        &self,
        Json(request): Json<SelectProfileRequest>,
    ) -> ApiResult<Option<SessionInfo>> {
        if let Err(e) = self.orchestrator.select_profile(&request.id, request.label).await {
            warn!(profile = %request.id, error = %e, "Profile selection rejected");
            return Err(status_for(&e));
        }

        self.ensure_catalog(self.orchestrator.language().await).await;
        Ok(Json(ApiResponse::success(self.orchestrator.session_info().await)))
    }

    pub async fn sign_out(&self) -> Json<ApiResponse<()>> {
        self.orchestrator.sign_out().await;
        Json(ApiResponse::success(()))
    }

    pub async fn set_language(
        &self,
        Json(request): Json<LanguageRequest>,
    ) -> ApiResult<LanguageSelection> {
        let language: LanguageSelection = request.language.parse().map_err(|e| {
            warn!(error = %e, "Rejected language change");
            StatusCode::BAD_REQUEST
        })?;

        self.ensure_catalog(language).await;
        if let Err(e) = self.orchestrator.set_language(language).await {
            error!(error = %e, "Failed to switch language");
            return Err(status_for(&e));
        }

        Ok(Json(ApiResponse::success(language)))
    }

    pub async fn entries(&self, Query(query): Query<CatalogQuery>) -> Json<ApiResponse<SearchResponse>> {
        let catalog = self.catalog.read().await;

        let response = self
            .orchestrator
            .read_state(|state| {
                let page = search(&catalog.entries, state, &query);
                SearchResponse {
                    language: catalog.selection,
                    total_in_catalog: page.total_in_catalog,
                    total_matches: page.total_matches,
                    clamped: page.clamped,
                    page: page.page,
                    total_pages: page.total_pages,
                    page_size: page.page_size,
                    entries: page
                        .entries
                        .into_iter()
                        .map(|entry| self.entry_view(entry, state))
                        .collect(),
                }
            })
            .await;

        Json(ApiResponse::success(response))
    }

    pub async fn suggestions(&self, Query(query): Query<SuggestQuery>) -> Json<ApiResponse<Vec<Suggestion>>> {
        let catalog = self.catalog.read().await;
        Json(ApiResponse::success(suggest(&catalog.entries, &query.q)))
    }

    pub async fn anime(&self) -> Json<ApiResponse<Vec<AnimeProgress>>> {
        let catalog = self.catalog.read().await;
        let rows = self
            .orchestrator
            .read_state(|state| anime_progress(&catalog.entries, state))
            .await;
        Json(ApiResponse::success(rows))
    }

    pub async fn update_entry(
        &self,
        Json(request): Json<UpdateEntryRequest>,
    ) -> ApiResult<UpdateOutcome> {
        let entry = CatalogEntry::reference(request.language.as_deref(), request.id);

        match self.orchestrator.update_entry(&entry, request.change).await {
            Ok(outcome) => Ok(Json(ApiResponse::success(outcome))),
            Err(e) => {
                warn!(key = %entry.key(), error = %e, "Entry update rejected");
                Err(status_for(&e))
            }
        }
    }

    pub async fn sync_now(&self) -> ApiResult<SyncReport> {
        match self.orchestrator.sync_now().await {
            Ok(report) => Ok(Json(ApiResponse::success(report))),
            Err(e) => {
                warn!(error = %e, "Manual sync rejected");
                Err(status_for(&e))
            }
        }
    }
}
