use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::catalog::{ActivityEntry, BookDetail, BookSummary, Catalog};
use crate::enrichment::{CandidateMatch, EnrichmentError, Job, JobRunner, JobStatus};
use crate::library::{LibraryScanner, ScanSummary};

#[derive(Clone)]
pub struct AppState {
    pub catalog: Catalog,
    pub scanner: Arc<LibraryScanner>,
    pub runner: JobRunner,
}

/// Error body: `{"detail": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    fn internal(context: &str, err: anyhow::Error) -> Self {
        tracing::error!("{}: {:#}", context, err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{}: {:#}", context, err))
    }
}

impl From<EnrichmentError> for ApiError {
    fn from(err: EnrichmentError) -> Self {
        let status = match err {
            EnrichmentError::NotFound(_) => StatusCode::NOT_FOUND,
            EnrichmentError::Provider(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.detail())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "detail": self.detail }))).into_response()
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/scan", post(scan_library))
        .route("/books", get(list_books))
        .route("/books/:id", get(get_book))
        .route("/search", get(search_metadata))
        .route("/enrichment/jobs", post(create_job))
        .route("/enrichment/jobs/:id", get(get_job).delete(cancel_job))
        .route("/enrichment/jobs/:id/stream", get(stream_job))
        .route("/tags/cleanup", post(cleanup_tags))
        .route("/tags/clear", post(clear_tags))
        .route("/activity", get(list_activity))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Root endpoint
async fn root() -> &'static str {
    "Audiobook Station API v0.1.0"
}

async fn scan_library(State(state): State<AppState>) -> Result<Json<ScanSummary>, ApiError> {
    tracing::info!("Scan requested");
    let summary = state
        .scanner
        .scan_into(&state.catalog)
        .await
        .map_err(|e| ApiError::internal("Scan failed", e))?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
struct BookListQuery {
    q: Option<String>,
}

async fn list_books(
    State(state): State<AppState>,
    Query(query): Query<BookListQuery>,
) -> Result<Json<Vec<BookSummary>>, ApiError> {
    let books = state
        .catalog
        .list_books(query.q.as_deref())
        .await
        .map_err(|e| ApiError::internal("Failed to list books", e))?;
    tracing::debug!("Returning {} books", books.len());
    Ok(Json(books))
}

async fn get_book(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<BookDetail>, ApiError> {
    state
        .catalog
        .book_detail(id)
        .await
        .map_err(|e| ApiError::internal("Failed to fetch book", e))?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("book {} not found", id)))
}

#[derive(Debug, Deserialize)]
struct MetadataSearchQuery {
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: String,
}

/// Scored provider candidates for a manual lookup
async fn search_metadata(
    State(state): State<AppState>,
    Query(query): Query<MetadataSearchQuery>,
) -> Result<Json<Vec<CandidateMatch>>, ApiError> {
    if query.title.trim().is_empty() && query.author.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "title or author is required"));
    }

    tracing::debug!("Searching metadata: title='{}', author='{}'", query.title, query.author);

    let provider = state.runner.provider();
    let candidates = provider
        .search(query.title.trim(), query.author.trim())
        .await
        .map_err(|e| ApiError::from(EnrichmentError::provider(&e)))?;
    Ok(Json(candidates))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateJobRequest {
    #[serde(default)]
    book_ids: Option<Vec<i64>>,
}

#[derive(Debug, Serialize)]
struct JobCreated {
    job_id: Uuid,
    status: JobStatus,
    total_books: usize,
}

/// An empty body enriches every book; anything else must be a valid request
fn parse_job_request(body: &[u8]) -> Result<CreateJobRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CreateJobRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("invalid job request: {}", e)))
}

async fn create_job(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<JobCreated>), ApiError> {
    let request = parse_job_request(&body)?;
    let targets = state
        .catalog
        .book_targets(request.book_ids.as_deref())
        .await
        .map_err(|e| ApiError::internal("Failed to load books", e))?;

    let total_books = targets.len();
    let job_id = state.runner.start(targets);
    tracing::info!("Created enrichment job {} for {} books", job_id, total_books);

    if let Err(e) = state
        .catalog
        .log_activity("enrichment_started", &format!("job {}: {} books", job_id, total_books))
        .await
    {
        tracing::warn!("Failed to record job start: {:#}", e);
    }

    let status = state
        .runner
        .registry()
        .lookup(&job_id)
        .map(|job| job.status)
        .unwrap_or(JobStatus::Queued);

    Ok((
        StatusCode::ACCEPTED,
        Json(JobCreated {
            job_id,
            status,
            total_books,
        }),
    ))
}

async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Job>, ApiError> {
    state
        .runner
        .registry()
        .lookup(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("job {} not found", id)))
}

/// Snapshot after the cancellation attempt
async fn cancel_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Job>, ApiError> {
    let registry = state.runner.registry();
    let handle = registry
        .handle(&id)
        .ok_or_else(|| ApiError::not_found(format!("job {} not found", id)))?;

    if handle.cancel() {
        tracing::info!("Cancellation requested for job {}", id);
    } else {
        tracing::debug!("Job {} already finished, cancel ignored", id);
    }
    Ok(Json(handle.snapshot()))
}

async fn stream_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let events = state.runner.registry().subscribe(&id)?;
    tracing::debug!("SSE subscriber attached to job {}", id);

    let stream = events.map(|event| {
        Ok::<_, Infallible>(
            Event::default()
                .event(event.name())
                .data(event.payload().to_string()),
        )
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn cleanup_tags(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = state
        .catalog
        .clean_unused_tags()
        .await
        .map_err(|e| ApiError::internal("Failed to clean tags", e))?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

async fn clear_tags(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let removed_links = state
        .catalog
        .clear_all_tags()
        .await
        .map_err(|e| ApiError::internal("Failed to clear tags", e))?;
    Ok(Json(serde_json::json!({ "removed_links": removed_links })))
}

async fn list_activity(State(state): State<AppState>) -> Result<Json<Vec<ActivityEntry>>, ApiError> {
    state
        .catalog
        .recent_activity(50)
        .await
        .map(Json)
        .map_err(|e| ApiError::internal("Failed to read activity log", e))
}
