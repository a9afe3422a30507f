//! JSON HTTP API over the release store and the ingestion coordinator.
//!
//! The presentation layer (search UI, selectors, sync controls) is a
//! separate client; this is the surface it talks to.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/releases/search` | Filtered, paginated search |
//! | `GET`  | `/releases/{key}` | One stored release by storage key |
//! | `GET`  | `/filters` | Distinct selector values |
//! | `POST` | `/ingest/start` | Start a background ingestion run (202) |
//! | `POST` | `/ingest/stop` | Request a cooperative stop (idempotent) |
//! | `GET`  | `/ingest/status` | Coordinator state and latest stats |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "already_running", "message": "an ingestion run is already in progress" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `already_running` (409),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use compras_core::store::{
    FilterOptions, PersistedRelease, ReleaseStore, SearchFilters, SearchPage, StoreError,
};

use crate::config::Config;
use crate::error::IngestError;
use crate::ingest::{coordinator_with_store, IngestionCoordinator, IngestionRequest, IngestionStatus};
use crate::progress::NoProgress;
use crate::sqlite_store::SqliteStore;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ReleaseStore>,
    pub coordinator: IngestionCoordinator,
}

/// Build the router. Exposed so tests can serve it on an ephemeral port.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/releases/search", post(handle_search))
        .route("/releases/{key}", get(handle_get_release))
        .route("/filters", get(handle_filters))
        .route("/ingest/start", post(handle_ingest_start))
        .route("/ingest/stop", post(handle_ingest_stop))
        .route("/ingest/status", get(handle_ingest_status))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind`. Runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = crate::db::connect(config).await?;
    let store: Arc<dyn ReleaseStore> = Arc::new(SqliteStore::new(pool));
    let coordinator = coordinator_with_store(config, store.clone())?;

    let state = AppState { store, coordinator };

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "server listening");
    println!("compras server listening on http://{}", bind_addr);
    axum::serve(listener, router(state)).await?;

    Ok(())
}

// ============ Error response ============

/// Handler error, rendered as `{ "error": { "code", "message" } }`.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = json!({ "error": { "code": self.code, "message": self.message } });
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        error!(error = %err, "store error");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::AlreadyRunning => {
                Self::new(StatusCode::CONFLICT, "already_running", err.to_string())
            }
            IngestError::InvalidOptions(_) => Self::bad_request(err.to_string()),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Releases ============

async fn handle_search(
    State(state): State<AppState>,
    Json(filters): Json<SearchFilters>,
) -> Result<Json<SearchPage>, AppError> {
    if let (Some(min), Some(max)) = (filters.min_budget, filters.max_budget) {
        if min > max {
            return Err(AppError::bad_request("minBudget must not exceed maxBudget"));
        }
    }
    Ok(Json(state.store.search(&filters).await?))
}

async fn handle_get_release(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<PersistedRelease>, AppError> {
    match state.store.get_release(&key).await? {
        Some(release) => Ok(Json(release)),
        None => Err(AppError::not_found(format!("release not found: {}", key))),
    }
}

async fn handle_filters(State(state): State<AppState>) -> Result<Json<FilterOptions>, AppError> {
    Ok(Json(state.store.get_filter_options().await?))
}

// ============ Ingestion control ============

/// Validates and claims the run slot synchronously, so a concurrent start
/// is rejected with 409 before anything is spawned.
async fn handle_ingest_start(
    State(state): State<AppState>,
    Json(request): Json<IngestionRequest>,
) -> Result<(StatusCode, Json<IngestionStatus>), AppError> {
    let ticket = state.coordinator.begin(request)?;
    let coordinator = state.coordinator.clone();
    tokio::spawn(async move {
        coordinator.execute(ticket, &NoProgress).await;
    });
    Ok((StatusCode::ACCEPTED, Json(state.coordinator.status())))
}

async fn handle_ingest_stop(State(state): State<AppState>) -> Json<IngestionStatus> {
    state.coordinator.stop();
    Json(state.coordinator.status())
}

async fn handle_ingest_status(State(state): State<AppState>) -> Json<IngestionStatus> {
    Json(state.coordinator.status())
}
