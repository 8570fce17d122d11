use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::aggregate;
use crate::config::{ConfigStore, ConfigUpdate};
use crate::extract;
use crate::ingest;
use crate::model::{BookStructure, SummarizeRequest};
use crate::store::{BookLocks, BookStore, LocalFsBookStore};
use crate::summarize::Summarizer;

pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BookStore>,
    pub locks: Arc<BookLocks>,
    pub config: Arc<ConfigStore>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Everything backed by the local filesystem under one data directory.
    pub fn local(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            store: Arc::new(LocalFsBookStore::new(&data_dir)),
            locks: Arc::new(BookLocks::new()),
            config: Arc::new(ConfigStore::new(&data_dir)),
            data_dir,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let static_dir = state.data_dir.join("books");
    Router::new()
        .route("/api/health", get(health))
        .route("/api/upload", post(upload_epub))
        .route("/api/books", get(list_books))
        .route("/api/books/:book_id", delete(delete_book))
        .route(
            "/api/books/:book_id/structure",
            get(get_structure).put(put_structure),
        )
        .route("/api/books/:book_id/structure-nested", get(get_structure))
        .route(
            "/api/books/:book_id/content/:chapter_id",
            get(get_chapter_content),
        )
        .route(
            "/api/books/:book_id/full-content/:chapter_id",
            get(get_full_chapter_content),
        )
        .route("/api/config", get(get_config).put(put_config))
        .route("/api/summarize", post(summarize_content))
        .route("/api/models", get(list_models))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// JSON error body in the `{ "error": ..., "details": ... }` shape the
/// reader UI expects.
pub struct ApiError {
    status: StatusCode,
    message: String,
    details: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal(message: impl Into<String>, err: anyhow::Error) -> Self {
        let mut api_err = Self::new(StatusCode::INTERNAL_SERVER_ERROR, message);
        api_err.details = Some(format!("{err:#}"));
        api_err
    }

    fn bad_gateway(message: impl Into<String>, err: anyhow::Error) -> Self {
        let mut api_err = Self::new(StatusCode::BAD_GATEWAY, message);
        api_err.details = Some(format!("{err:#}"));
        api_err
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Some(details) = &self.details {
            tracing::error!(status = %self.status, message = %self.message, details, "request failed");
        }
        let mut body = serde_json::json!({ "error": self.message });
        if let Some(details) = self.details {
            body["details"] = serde_json::Value::String(details);
        }
        (self.status, Json(body)).into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

fn is_epub_upload(file_name: Option<&str>, content_type: Option<&str>) -> bool {
    content_type == Some("application/epub+zip")
        || file_name.is_some_and(|name| name.to_ascii_lowercase().ends_with(".epub"))
}

async fn upload_epub(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(format!("invalid multipart request: {err}")))?
    {
        if field.name() != Some("epub") {
            continue;
        }

        let file_name = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(str::to_owned);
        if !is_epub_upload(file_name.as_deref(), content_type.as_deref()) {
            return Err(ApiError::bad_request("Only EPUB files are allowed"));
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::bad_request(format!("failed to read upload: {err}")))?;
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(ApiError::bad_request("EPUB file exceeds the 50MB limit"));
        }

        let tmp_dir = state.data_dir.join("tmp");
        let tmp_path = tmp_dir.join(format!("upload-{}.epub", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&tmp_dir)
            .await
            .map_err(|err| ApiError::internal("Failed to process EPUB file", err.into()))?;
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|err| ApiError::internal("Failed to process EPUB file", err.into()))?;

        let result = ingest::ingest_epub(state.store.as_ref(), &tmp_path).await;
        if let Err(err) = tokio::fs::remove_file(&tmp_path).await {
            tracing::warn!(path = %tmp_path.display(), ?err, "failed to remove upload temp file");
        }

        let structure = result
            .map_err(|err| ApiError::internal("Failed to process EPUB file", err))?;
        return Ok(Json(serde_json::json!({
            "success": true,
            "bookId": structure.id,
            "structure": structure,
        })));
    }

    Err(ApiError::bad_request("No EPUB file uploaded"))
}

async fn list_books(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let books = state
        .store
        .list()
        .await
        .map_err(|err| ApiError::internal("Failed to get books list", err))?;
    Ok(Json(serde_json::json!(books)))
}

async fn get_structure(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> Result<Json<BookStructure>, ApiError> {
    let structure = state
        .store
        .read(&book_id)
        .await
        .map_err(|err| ApiError::internal("Failed to get book structure", err))?
        .ok_or_else(|| ApiError::not_found("Book not found"))?;
    Ok(Json(structure))
}

async fn put_structure(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
    Json(structure): Json<BookStructure>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let lock = state.locks.for_book(&book_id);
    let _guard = lock.lock().await;

    let exists = state
        .store
        .read(&book_id)
        .await
        .map_err(|err| ApiError::internal("Failed to update book structure", err))?
        .is_some();
    if !exists {
        return Err(ApiError::not_found("Book not found"));
    }

    state
        .store
        .write(&book_id, &structure)
        .await
        .map_err(|err| ApiError::internal("Failed to update book structure", err))?;
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn delete_book(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = state
        .store
        .delete(&book_id)
        .await
        .map_err(|err| ApiError::internal("Failed to delete book", err))?;
    if !removed {
        return Err(ApiError::not_found("Book not found"));
    }
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Book deleted successfully",
    })))
}

async fn get_chapter_content(
    State(state): State<AppState>,
    Path((book_id, chapter_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let chapter = extract::get_chapter(state.store.as_ref(), &state.locks, &book_id, &chapter_id)
        .await
        .map_err(|err| ApiError::internal("Failed to get chapter content", err))?
        .ok_or_else(|| ApiError::not_found("Chapter not found"))?;
    Ok(Json(serde_json::json!(chapter)))
}

async fn get_full_chapter_content(
    State(state): State<AppState>,
    Path((book_id, chapter_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let chapter =
        aggregate::get_full_chapter(state.store.as_ref(), &state.locks, &book_id, &chapter_id)
            .await
            .map_err(|err| ApiError::internal("Failed to get chapter content", err))?
            .ok_or_else(|| ApiError::not_found("Chapter not found"))?;
    Ok(Json(serde_json::json!(chapter)))
}

async fn get_config(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let config = state
        .config
        .load()
        .await
        .map_err(|err| ApiError::internal("Failed to get configuration", err))?;
    Ok(Json(serde_json::json!(config)))
}

async fn put_config(
    State(state): State<AppState>,
    Json(updates): Json<ConfigUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let config = state
        .config
        .update(updates)
        .await
        .map_err(|err| ApiError::internal("Failed to update configuration", err))?;
    Ok(Json(serde_json::json!(config)))
}

async fn summarize_content(
    State(state): State<AppState>,
    Json(request): Json<SummarizeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.content.trim().is_empty() {
        return Err(ApiError::bad_request("Content is required"));
    }
    if !(request.ratio > 0.0 && request.ratio <= 1.0) {
        return Err(ApiError::bad_request("Ratio must be between 0 and 1"));
    }

    let config = state
        .config
        .load()
        .await
        .map_err(|err| ApiError::internal("Failed to summarize content", err))?;
    let summarizer = Summarizer::new(config)
        .map_err(|err| ApiError::internal("Failed to summarize content", err))?;

    let response = summarizer
        .summarize(&request)
        .await
        .map_err(|err| ApiError::bad_gateway("Failed to summarize content", err))?;
    Ok(Json(serde_json::json!(response)))
}

async fn list_models(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let config = state
        .config
        .load()
        .await
        .map_err(|err| ApiError::internal("Failed to fetch models", err))?;
    let summarizer = Summarizer::new(config)
        .map_err(|err| ApiError::internal("Failed to fetch models", err))?;

    let models = summarizer
        .list_models()
        .await
        .map_err(|err| ApiError::bad_gateway("Failed to fetch models", err))?;
    Ok(Json(serde_json::json!(models)))
}
