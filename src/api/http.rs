// SPDX-License-Identifier: GPL-3.0-only
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::api::handlers::{
    ApiHandlers, ApiResponse, LanguageRequest, SearchResponse, SelectProfileRequest, SuggestQuery,
    UpdateEntryRequest,
};
use crate::catalog::search::{AnimeProgress, Suggestion};
use crate::catalog::{CatalogQuery, LanguageSelection};
use crate::sync::{SessionInfo, SyncReport, UpdateOutcome};

type Handlers = State<Arc<ApiHandlers>>;

pub struct HttpServer {
    handlers: Arc<ApiHandlers>,
    addr: SocketAddr,
}

impl HttpServer {
    pub fn new(handlers: Arc<ApiHandlers>, addr: SocketAddr) -> Self {
        Self { handlers, addr }
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let app = router(self.handlers);

        info!(addr = %self.addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

pub fn router(handlers: Arc<ApiHandlers>) -> Router {
    Router::new()
        .route("/api/health", get(ApiHandlers::health))
        .route(
            "/api/profile",
            get(profile_handler)
                .post(select_profile_handler)
                .delete(sign_out_handler),
        )
        .route("/api/profiles", get(list_profiles_handler))
        .route("/api/language", post(set_language_handler))
        .route("/api/entries", get(entries_handler))
        .route("/api/entries/state", post(update_entry_handler))
        .route("/api/suggestions", get(suggestions_handler))
        .route("/api/anime", get(anime_handler))
        .route("/api/sync", post(sync_handler))
        .fallback(not_found_handler)
        .with_state(handlers)
}

async fn not_found_handler() -> (StatusCode, Json<ApiResponse<()>>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::error("not found".to_string())),
    )
}

async fn profile_handler(
    State(handlers): Handlers,
) -> Json<ApiResponse<Option<SessionInfo>>> {
    handlers.profile().await
}

async fn list_profiles_handler(
    State(handlers): Handlers,
) -> Result<Json<ApiResponse<Vec<String>>>, StatusCode> {
    handlers.list_profiles().await
}

async fn select_profile_handler(
    State(handlers): Handlers,
    Json(request): Json<SelectProfileRequest>,
) -> Result<Json<ApiResponse<Option<SessionInfo>>>, StatusCode> {
    handlers.select_profile(Json(request)).await
}

async fn sign_out_handler(State(handlers): Handlers) -> Json<ApiResponse<()>> {
    handlers.sign_out().await
}

async fn set_language_handler(
    State(handlers): Handlers,
    Json(request): Json<LanguageRequest>,
) -> Result<Json<ApiResponse<LanguageSelection>>, StatusCode> {
    handlers.set_language(Json(request)).await
}

async fn entries_handler(
    State(handlers): Handlers,
    query: Query<CatalogQuery>,
) -> Json<ApiResponse<SearchResponse>> {
    handlers.entries(query).await
}

async fn suggestions_handler(
    State(handlers): Handlers,
    query: Query<SuggestQuery>,
) -> Json<ApiResponse<Vec<Suggestion>>> {
    handlers.suggestions(query).await
}

async fn anime_handler(State(handlers): Handlers) -> Json<ApiResponse<Vec<AnimeProgress>>> {
    handlers.anime().await
}

async fn update_entry_handler(
    State(handlers): Handlers,
    Json(request): Json<UpdateEntryRequest>,
) -> Result<Json<ApiResponse<UpdateOutcome>>, StatusCode> {
    handlers.update_entry(Json(request)).await
}

async fn sync_handler(
    State(handlers): Handlers,
) -> Result<Json<ApiResponse<SyncReport>>, StatusCode> {
    handlers.sync_now().await
}
