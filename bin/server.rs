// Shorthand Ledger - Web Server
// REST API with Axum. The running process is the session: it holds the
// last batch manifest and the cluster dates ignored so far.

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use shorthand_ledger::config::ServerConfig;
use shorthand_ledger::{
    parse, partition, validate, BatchManifest, DuplicateReport, Entry, Ledger, LedgerError, ParseError, RowFilter,
    UndoError, VERSION,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    ledger: Arc<Mutex<Ledger>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::ok(data))).into_response()
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ApiResponse::<()> {
        success: false,
        data: None,
        error: Some(message.into()),
    };
    (status, Json(body)).into_response()
}

/// Failure that still carries a payload (validation lists, rolled-back results)
fn failure_with<T: Serialize>(status: StatusCode, message: impl Into<String>, data: T) -> Response {
    let body = ApiResponse {
        success: false,
        data: Some(data),
        error: Some(message.into()),
    };
    (status, Json(body)).into_response()
}

fn lock(state: &AppState) -> Result<MutexGuard<'_, Ledger>, Response> {
    state.ledger.lock().map_err(|_| {
        error!("ledger lock poisoned");
        failure(StatusCode::INTERNAL_SERVER_ERROR, "ledger unavailable")
    })
}

fn ledger_error(e: LedgerError) -> Response {
    match e {
        LedgerError::Validation(problems) => {
            failure_with(StatusCode::UNPROCESSABLE_ENTITY, "validation failed", problems)
        }
        e @ (LedgerError::DuplicateBlocked { .. } | LedgerError::DuplicatePending { .. }) => {
            failure(StatusCode::CONFLICT, e.to_string())
        }
        e @ LedgerError::InvalidData(_) => failure(StatusCode::BAD_REQUEST, e.to_string()),
        e @ LedgerError::Storage(_) => {
            error!("storage error: {e}");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn storage_error(e: rusqlite::Error) -> Response {
    ledger_error(LedgerError::Storage(e))
}

// ============================================================================
// Request / response bodies
// ============================================================================

/// A batch as shorthand text, or as entries returned by /api/parse
/// (possibly with overrides set by the operator)
#[derive(Deserialize)]
struct BatchRequest {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    date: Option<NaiveDate>,
    #[serde(default)]
    entries: Option<Vec<Entry>>,
    /// Lines whose duplicate payment should be committed anyway
    #[serde(default)]
    allow_duplicate: Vec<usize>,
}

impl BatchRequest {
    fn into_entries(self) -> (Vec<Entry>, Vec<ParseError>) {
        let (mut entries, errors) = match (self.entries, self.text) {
            (Some(entries), _) => (entries, Vec::new()),
            (None, Some(text)) => {
                let date = self.date.unwrap_or_else(|| chrono::Local::now().date_naive());
                partition(parse(&text, date))
            }
            (None, None) => (Vec::new(), Vec::new()),
        };
        for entry in entries.iter_mut() {
            if self.allow_duplicate.contains(&entry.line) {
                entry.overrides.duplicate = true;
            }
        }
        (entries, errors)
    }
}

#[derive(Serialize)]
struct ParseResponse {
    entries: Vec<Entry>,
    errors: Vec<ParseError>,
}

#[derive(Serialize)]
struct CheckResponse {
    entries: Vec<Entry>,
    parse_errors: Vec<ParseError>,
    validation_errors: Vec<String>,
    duplicates: Vec<DuplicateReport>,
    ready: bool,
}

#[derive(Deserialize)]
struct UndoRequest {
    /// Omit to undo the last batch applied through this server
    #[serde(default)]
    manifest: Option<BatchManifest>,
}

#[derive(Deserialize)]
struct IgnoreRequest {
    date: NaiveDate,
}

#[derive(Deserialize)]
struct ResolveRequest {
    keep: String,
    delete: Vec<String>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok(VERSION))
}

/// POST /api/parse - Shorthand text → entries + parse errors
async fn parse_batch(Json(request): Json<BatchRequest>) -> Response {
    let (entries, errors) = request.into_entries();
    ok(ParseResponse { entries, errors })
}

/// POST /api/check - Parse, validate and duplicate-check without writing
async fn check_batch(State(state): State<AppState>, Json(request): Json<BatchRequest>) -> Response {
    let (entries, parse_errors) = request.into_entries();
    let validation_errors = validate(&entries);

    let ledger = match lock(&state) {
        Ok(ledger) => ledger,
        Err(response) => return response,
    };
    let duplicates = match ledger.check_duplicates(&entries) {
        Ok(reports) => reports,
        Err(e) => return storage_error(e),
    };

    let ready = parse_errors.is_empty() && validation_errors.is_empty() && !duplicates.iter().any(|r| r.is_blocking());
    ok(CheckResponse {
        entries,
        parse_errors,
        validation_errors,
        duplicates,
        ready,
    })
}

/// POST /api/apply - Commit a batch atomically
async fn apply_batch(State(state): State<AppState>, Json(request): Json<BatchRequest>) -> Response {
    let (entries, parse_errors) = request.into_entries();
    if !parse_errors.is_empty() {
        return failure_with(StatusCode::UNPROCESSABLE_ENTITY, "unparseable lines", parse_errors);
    }

    let mut ledger = match lock(&state) {
        Ok(ledger) => ledger,
        Err(response) => return response,
    };
    match ledger.apply(&entries) {
        Ok(result) if result.is_committed() => ok(result),
        Ok(result) => failure_with(StatusCode::UNPROCESSABLE_ENTITY, "batch rolled back", result),
        Err(e) => ledger_error(e),
    }
}

/// POST /api/undo - Undo the last batch, or the manifest given
async fn undo_batch(State(state): State<AppState>, Json(request): Json<UndoRequest>) -> Response {
    let mut ledger = match lock(&state) {
        Ok(ledger) => ledger,
        Err(response) => return response,
    };

    let outcome = match request.manifest {
        Some(manifest) => {
            let batch_id = manifest.batch_id.clone();
            ledger.undo(manifest).map(|()| batch_id)
        }
        None => ledger.undo_last().map(|manifest| manifest.batch_id),
    };

    match outcome {
        Ok(batch_id) => ok(batch_id),
        Err(e @ UndoError::NothingToUndo) => failure(StatusCode::NOT_FOUND, e.to_string()),
        Err(e @ (UndoError::RowMissing { .. } | UndoError::BalanceTargetMissing { .. })) => {
            failure(StatusCode::CONFLICT, e.to_string())
        }
        Err(e @ UndoError::Storage(_)) => {
            error!("undo failed: {e}");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /api/clusters?type=sale&from=..&to=.. - Likely duplicates
async fn get_clusters(State(state): State<AppState>, Query(filter): Query<RowFilter>) -> Response {
    let ledger = match lock(&state) {
        Ok(ledger) => ledger,
        Err(response) => return response,
    };
    match ledger.duplicate_clusters(&filter) {
        Ok(clusters) => ok(clusters),
        Err(e) => storage_error(e),
    }
}

/// POST /api/clusters/ignore - Stop flagging one date for this session
async fn ignore_cluster(State(state): State<AppState>, Json(request): Json<IgnoreRequest>) -> Response {
    let mut ledger = match lock(&state) {
        Ok(ledger) => ledger,
        Err(response) => return response,
    };
    ok(ledger.ignore_cluster(request.date))
}

/// POST /api/clusters/resolve - Keep one row, delete the rest
async fn resolve_cluster(State(state): State<AppState>, Json(request): Json<ResolveRequest>) -> Response {
    let mut ledger = match lock(&state) {
        Ok(ledger) => ledger,
        Err(response) => return response,
    };
    match ledger.resolve_cluster(&request.keep, &request.delete) {
        Ok(deleted) => ok(deleted),
        Err(e) => ledger_error(e),
    }
}

#[derive(Serialize)]
struct RegistryResponse {
    parties: Vec<shorthand_ledger::Party>,
    staff: Vec<shorthand_ledger::Staff>,
}

/// GET /api/parties - Party balances and staff advances
async fn get_parties(State(state): State<AppState>) -> Response {
    let ledger = match lock(&state) {
        Ok(ledger) => ledger,
        Err(response) => return response,
    };
    let registry = ledger
        .parties()
        .and_then(|parties| Ok(RegistryResponse { parties, staff: ledger.staff()? }));
    match registry {
        Ok(registry) => ok(registry),
        Err(e) => storage_error(e),
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    config.config.init_logging()?;

    info!("🌐 Shorthand Ledger - Web Server v{VERSION}");

    let ledger = config.config.open_ledger()?;
    info!(db = %config.config.db.display(), "ledger opened");

    let state = AppState {
        ledger: Arc::new(Mutex::new(ledger)),
    };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/parse", post(parse_batch))
        .route("/check", post(check_batch))
        .route("/apply", post(apply_batch))
        .route("/undo", post(undo_batch))
        .route("/clusters", get(get_clusters))
        .route("/clusters/ignore", post(ignore_cluster))
        .route("/clusters/resolve", post(resolve_cluster))
        .route("/parties", get(get_parties))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen))?;

    info!("🚀 Server running on http://{}", config.listen);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
