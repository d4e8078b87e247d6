use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::search::{self, SearchError, SearchResult};
use crate::source::{SourceAdapter, SourceEntry, base_name};
use crate::state::{BuildOptions, IndexState};
use crate::tree::{self, TreeNode, extension_of};

const CROSS_ORIGIN_RESOURCE_POLICY: &str = "cross-origin-resource-policy";

/// Everything a handler needs; cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn SourceAdapter>,
    pub index: IndexState,
    pub build: Arc<BuildOptions>,
    pub max_results: usize,
}

/// JSON error body: `{ "error": ..., "details": ... }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: &'static str,
    details: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, error: &'static str) -> Self {
        Self {
            status,
            error,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Display) -> Self {
        let details = details.to_string();
        self.details = (!details.is_empty()).then_some(details);
        self
    }

    fn logged(self, route: &'static str, path: &str) -> Self {
        tracing::error!(
            route,
            path = %path,
            status = self.status.as_u16(),
            error = self.error,
            details = self.details.as_deref().unwrap_or(""),
            "request failed"
        );
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = ErrorBody {
            error: self.error,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::MissingQuery => ApiError::new(StatusCode::BAD_REQUEST, "Missing search query"),
            SearchError::IndexNotReady => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Index not ready")
            }
            SearchError::IndexUnavailable(message) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Index not ready").with_details(message)
            }
            other => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Search failed").with_details(other),
        }
    }
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl From<SourceEntry> for FileEntry {
    fn from(entry: SourceEntry) -> Self {
        let kind = if entry.is_dir() { "folder" } else { "file" };
        Self {
            name: entry.name,
            kind,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    index: &'static str,
    documents: usize,
}

#[derive(Serialize)]
struct ReindexResponse {
    status: &'static str,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/folders", get(folders))
        .route("/files", get(files_root))
        .route("/files/", get(files_root))
        .route("/files/*path", get(files))
        .route("/note/", get(note_missing))
        .route("/note/*path", get(note))
        .route("/tree", get(tree_handler))
        .route("/search", get(search_handler))
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .route("/reindex", post(reindex))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server and run until shutdown.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTP address {addr}"))?;
    tracing::info!(%addr, "http listener ready");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .with_context(|| format!("failed to run HTTP server on {addr}"))
}

async fn folders(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    let entries = state.source.list_children("").await.map_err(|err| {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read folders")
            .with_details(err)
            .logged("/folders", "")
    })?;
    Ok(Json(
        entries
            .into_iter()
            .filter(SourceEntry::is_dir)
            .map(|entry| entry.name)
            .collect(),
    ))
}

async fn files_root(State(state): State<AppState>) -> Result<Json<Vec<FileEntry>>, ApiError> {
    let entries = state.source.list_children("").await.map_err(|err| {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read files")
            .with_details(err)
            .logged("/files", "")
    })?;
    Ok(Json(entries.into_iter().map(FileEntry::from).collect()))
}

async fn files(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<Vec<FileEntry>>, ApiError> {
    let entries = state.source.list_children(&path).await.map_err(|err| {
        ApiError::new(StatusCode::NOT_FOUND, "Folder not found")
            .with_details(err)
            .logged("/files/*", &path)
    })?;
    Ok(Json(entries.into_iter().map(FileEntry::from).collect()))
}

async fn note_missing() -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "Missing file path")
}

async fn note(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response<Body>, ApiError> {
    if path.trim_matches('/').is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "Missing file path"));
    }
    let bytes = state.source.read_file(&path).await.map_err(|err| {
        ApiError::new(StatusCode::NOT_FOUND, "File not found")
            .with_details(err)
            .logged("/note/*", &path)
    })?;

    let disposition = HeaderValue::from_str(&format!(
        "inline; filename=\"{}\"",
        base_name(&path).replace('"', "'")
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("inline"));

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type_for(&path))
        .header(CONTENT_DISPOSITION, disposition)
        .header(CROSS_ORIGIN_RESOURCE_POLICY, "cross-origin")
        .body(Body::from(bytes))
        .map_err(|err| {
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "File not found")
                .with_details(err)
                .logged("/note/*", &path)
        })
}

/// Content type served for a raw file, chosen by extension.
pub fn content_type_for(path: &str) -> &'static str {
    match extension_of(base_name(path)).as_deref() {
        Some("pdf") => "application/pdf",
        Some("md" | "txt" | "json" | "js" | "ts" | "css" | "html" | "cpp" | "c" | "py" | "java") => {
            "text/plain; charset=utf-8"
        }
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

async fn tree_handler(State(state): State<AppState>) -> Result<Json<TreeNode>, ApiError> {
    let tree = tree::try_build_tree(state.source.as_ref(), "", &state.build.tree)
        .await
        .map_err(|err| {
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to scan repo tree")
                .with_details(err)
                .logged("/tree", "")
        })?;
    Ok(Json(tree))
}

async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchResult>>, ApiError> {
    let raw_query = params.q.unwrap_or_default();
    let query = search::validate_query(Some(&raw_query))
        .map_err(ApiError::from)?
        .to_string();
    let snapshot = state
        .index
        .snapshot()
        .map_err(|err| ApiError::from(err).logged("/search", &query))?;

    let folder = params.folder;
    let limit = state.max_results;
    let results = tokio::task::spawn_blocking(move || {
        search::search(&snapshot, &raw_query, folder.as_deref(), limit)
    })
    .await
    .map_err(|err| SearchError::Task(err.to_string()))
    .and_then(|outcome| outcome)
    .map_err(|err| ApiError::from(err).logged("/search", &query))?;

    Ok(Json(results))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (index, documents) = state.index.health();
    Json(HealthResponse {
        status: "ok",
        index,
        documents,
    })
}

async fn metrics() -> Result<Response<Body>, StatusCode> {
    match crate::telemetry::export_prometheus() {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")
            .body(Body::from(body))
            .map_err(|err| {
                tracing::error!(error = %err, "failed to build metrics response");
                StatusCode::INTERNAL_SERVER_ERROR
            }),
        Err(err) => {
            tracing::error!(error = %err, "failed to export metrics");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn reindex(State(state): State<AppState>) -> Result<(StatusCode, Json<ReindexResponse>), ApiError> {
    match state
        .index
        .spawn_build(Arc::clone(&state.source), Arc::clone(&state.build))
    {
        Some(_) => {
            tracing::info!("reindex requested");
            Ok((StatusCode::ACCEPTED, Json(ReindexResponse { status: "started" })))
        }
        None => Err(ApiError::new(StatusCode::CONFLICT, "Index build already running")),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::source::MemorySource;
    use crate::state::build_snapshot;

    fn app_state(source: MemorySource) -> AppState {
        AppState {
            source: Arc::new(source),
            index: IndexState::new(),
            build: Arc::new(BuildOptions::default()),
            max_results: 50,
        }
    }

    fn notes() -> MemorySource {
        MemorySource::new()
            .with_file("a.md", "hello")
            .with_file("sub/b.md", "world hello")
            .with_file("docs/guide.pdf", "%PDF-1.4")
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for("docs/guide.PDF"), "application/pdf");
        assert_eq!(content_type_for("a.md"), "text/plain; charset=utf-8");
        assert_eq!(content_type_for("img/photo.jpg"), "image/jpeg");
        assert_eq!(content_type_for("img/photo.gif"), "image/gif");
        assert_eq!(content_type_for("notes.yaml"), "application/octet-stream");
        assert_eq!(content_type_for("Makefile"), "application/octet-stream");
    }

    #[tokio::test]
    async fn lists_folders_and_files() {
        let app = router(app_state(notes()));

        let (status, body) = get_json(app.clone(), "/folders").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(["docs", "sub"]));

        let (_, body) = get_json(app.clone(), "/files").await;
        assert_eq!(
            body,
            json!([
                { "name": "a.md", "type": "file" },
                { "name": "docs", "type": "folder" },
                { "name": "sub", "type": "folder" },
            ])
        );

        let (_, body) = get_json(app.clone(), "/files/sub").await;
        assert_eq!(body, json!([{ "name": "b.md", "type": "file" }]));

        let (status, body) = get_json(app, "/files/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Folder not found");
        assert!(body["details"].is_string());
    }

    #[tokio::test]
    async fn root_listing_failure_is_a_server_error() {
        let app = router(app_state(notes().with_failing_list("")));
        let (status, body) = get_json(app.clone(), "/folders").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to read folders");

        let (status, body) = get_json(app, "/tree").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to scan repo tree");
    }

    #[tokio::test]
    async fn serves_raw_notes_with_headers() {
        let app = router(app_state(notes()));
        let response = app
            .clone()
            .oneshot(Request::get("/note/docs/guide.pdf").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[CONTENT_TYPE], "application/pdf");
        assert_eq!(headers[CONTENT_DISPOSITION], "inline; filename=\"guide.pdf\"");
        assert_eq!(headers["cross-origin-resource-policy"], "cross-origin");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"%PDF-1.4");

        let (status, body) = get_json(app.clone(), "/note/missing.md").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "File not found");

        let (status, body) = get_json(app, "/note/").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Missing file path" }));
    }

    #[tokio::test]
    async fn tree_is_nested_json() {
        let app = router(app_state(notes()));
        let (status, body) = get_json(app, "/tree").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "a.md": "a.md",
                "docs": { "guide.pdf": "docs/guide.pdf" },
                "sub": { "b.md": "sub/b.md" },
            })
        );
    }

    #[tokio::test]
    async fn search_reports_missing_query_then_not_ready() {
        let state = app_state(notes());
        let app = router(state.clone());

        let (status, body) = get_json(app.clone(), "/search").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing search query");

        let (status, body) = get_json(app.clone(), "/search?q=hello").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Index not ready");

        let snapshot = build_snapshot(state.source.as_ref(), &state.build).await.unwrap();
        state.index.publish(snapshot);

        let (status, body) = get_json(app.clone(), "/search?q=hello").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (_, body) = get_json(app, "/search?q=hello&folder=SUB").await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["id"], "sub/b.md");
        assert_eq!(body[0]["fullPath"], "sub/b.md");
    }

    #[tokio::test]
    async fn reindex_and_health() {
        let state = app_state(notes());
        let app = router(state.clone());

        let (_, body) = get_json(app.clone(), "/healthz").await;
        assert_eq!(body, json!({ "status": "ok", "index": "building", "documents": 0 }));

        let guard = state.index.try_begin_build().unwrap();
        let response = app
            .clone()
            .oneshot(Request::post("/reindex").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        drop(guard);

        let mut updates = state.index.subscribe();
        let response = app
            .clone()
            .oneshot(Request::post("/reindex").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        updates.changed().await.unwrap();

        let (_, body) = get_json(app, "/healthz").await;
        assert_eq!(body["index"], "ready");
        // The pdf is listed in the tree but not indexed.
        assert_eq!(body["documents"], 2);
    }
}
