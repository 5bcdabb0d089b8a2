use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;

use gridlease_core::config::GridConfig;
use gridlease_core::infrastructure::CasOutcome;
use gridlease_core::types::Version;
use gridlease_core::{GridClient, GridError, GridResult, ReservationApi};

use crate::handlers::*;

/// Whole grid documents go through `PUT /document`
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

pub struct AppContext {
    pub client: GridClient,
    /// Bearer token required on every route but `/health`
    pub api_key: Option<String>,
}

pub type AppState = Arc<AppContext>;

pub struct ServeOptions {
    pub host: String,
    pub port: u16,
    pub storage: String,
    pub store_token: Option<String>,
    pub api_key: Option<String>,
    pub max_concurrency: usize,
    pub config: GridConfig,
}

pub async fn run(opts: ServeOptions) -> Result<(), String> {
    let client = create_client(&opts.storage, opts.store_token.as_deref(), opts.config.clone());
    let api_key = opts.api_key.filter(|k| !k.is_empty());

    if api_key.is_some() {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!("No GRIDLEASE_API_KEY set, server is open (dev mode)");
    }

    let state: AppState = Arc::new(AppContext { client, api_key });
    let app = build_router(state, opts.max_concurrency);

    let addr = format!("{}:{}", opts.host, opts.port);
    tracing::info!(
        width = opts.config.dims.width,
        height = opts.config.dims.height,
        "gridlease server starting on http://{}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("failed to bind {}: {}", addr, e))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
        .map_err(|e| format!("server error: {}", e))
}

pub fn build_router(state: AppState, max_concurrency: usize) -> Router {
    Router::new()
        // Health is always open (no auth)
        .route("/health", get(health))
        // Protected routes
        .route("/status", get(status))
        .route("/reserve", post(reserve))
        .route("/unlock", post(unlock))
        .route("/finalize", post(finalize))
        .route("/regions/{id}/asset", post(set_asset))
        .route("/prune", post(prune))
        .route("/document", get(get_document).put(put_document))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(ConcurrencyLimitLayer::new(max_concurrency.max(1)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Auth Middleware ────────────────────────────────────────────────────────

async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // If no API key is configured, allow all requests (dev mode)
    let Some(expected_key) = state.api_key.as_deref() else {
        return Ok(next.run(request).await);
    };

    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if token == expected_key {
        Ok(next.run(request).await)
    } else {
        tracing::warn!("Unauthorized request to {}", request.uri().path());
        Err(StatusCode::UNAUTHORIZED)
    }
}

// ─── Error Mapping ──────────────────────────────────────────────────────────

fn error_status(err: &GridError) -> StatusCode {
    match err {
        GridError::Validation(_) => StatusCode::BAD_REQUEST,
        GridError::UnknownRegion(_) => StatusCode::NOT_FOUND,
        GridError::MalformedDocument(_) => StatusCode::INTERNAL_SERVER_ERROR,
        GridError::StoreUnavailable(_) | GridError::Timeout(_) | GridError::Contention { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

fn reply<T: Serialize>(result: GridResult<T>) -> (StatusCode, Json<ApiResponse<T>>) {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::ok(data))),
        Err(e) => {
            let code = error_status(&e);
            if code.is_server_error() {
                tracing::warn!(error = %e, status = code.as_u16(), "Request failed");
            }
            (code, Json(ApiResponse::from_error(&e)))
        }
    }
}

fn bad_request<T>(msg: String) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::err(msg)))
}

/// Store calls block, so they run on tokio's blocking pool
async fn blocking<T, F>(state: &AppState, f: F) -> GridResult<T>
where
    F: FnOnce(&GridClient) -> GridResult<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.client))
        .await
        .unwrap_or_else(|e| Err(GridError::StoreUnavailable(format!("worker task failed: {}", e))))
}

// ─── Handlers ───────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let stats = blocking(&state, |client| client.status_with_stats()).await;
    let (status, stats) = match stats {
        Ok((_, _, stats)) => ("ok", Some(stats)),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not read the store");
            ("degraded", None)
        }
    };
    Json(ApiResponse::ok(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage: state.client.describe_store(),
        stats,
    }))
}

async fn status(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse<StatusResponse>>) {
    let result = blocking(&state, |client| {
        let (snapshot, version, stats) = client.status_with_stats()?;
        Ok(StatusResponse {
            sold: snapshot.sold,
            locks: snapshot.locks,
            regions: snapshot.regions,
            stats,
            version: version.as_str().to_string(),
        })
    })
    .await;
    reply(result)
}

async fn reserve(
    State(state): State<AppState>,
    Json(req): Json<ReserveRequest>,
) -> (StatusCode, Json<ApiResponse<gridlease_core::state::ReserveOutcome>>) {
    if let Err(e) = req.validate() {
        return bad_request(e);
    }
    let result = blocking(&state, move |client| {
        let ttl_ms = req.ttl_ms.unwrap_or(client.config().default_ttl_ms);
        client.reserve(&req.owner_id, &req.cells, ttl_ms)
    })
    .await;
    reply(result)
}

async fn unlock(
    State(state): State<AppState>,
    Json(req): Json<UnlockRequest>,
) -> (StatusCode, Json<ApiResponse<gridlease_core::state::UnlockOutcome>>) {
    if let Err(e) = req.validate() {
        return bad_request(e);
    }
    let result = blocking(&state, move |client| client.unlock(&req.owner_id, &req.cells)).await;
    reply(result)
}

async fn finalize(
    State(state): State<AppState>,
    Json(req): Json<FinalizeRequest>,
) -> (StatusCode, Json<ApiResponse<gridlease_core::state::FinalizeOutcome>>) {
    if let Err(e) = req.validate() {
        return bad_request(e);
    }
    let result = blocking(&state, move |client| {
        client.finalize(&req.owner_id, &req.cells, &req.payload)
    })
    .await;
    reply(result)
}

async fn set_asset(
    State(state): State<AppState>,
    Path(region_id): Path<String>,
    Json(req): Json<AssetRequest>,
) -> (StatusCode, Json<ApiResponse<AssetResponse>>) {
    let result = blocking(&state, move |client| {
        let asset_url = client.set_asset_url(&region_id, &req.url)?;
        Ok(AssetResponse { region_id, asset_url })
    })
    .await;
    reply(result)
}

async fn prune(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse<PruneResponse>>) {
    let result = blocking(&state, |client| client.prune_expired().map(|pruned| PruneResponse { pruned })).await;
    reply(result)
}

// ─── Raw Document ───────────────────────────────────────────────────────────

fn with_etag(mut resp: Response, version: &Version) -> Response {
    if let Ok(tag) = HeaderValue::from_str(&version.etag()) {
        resp.headers_mut().insert(header::ETAG, tag);
    }
    resp
}

async fn get_document(State(state): State<AppState>) -> Response {
    match blocking(&state, |client| client.document()).await {
        Ok((_, version)) if version.is_initial() => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::err("no document written yet")),
        )
            .into_response(),
        Ok((body, version)) => with_etag(
            (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], body).into_response(),
            &version,
        ),
        Err(e) => reply::<()>(Err(e)).into_response(),
    }
}

/// Conditional replace: `If-Match: <etag>`, or `If-None-Match: *` for the
/// first write. A stale tag gets `412`.
async fn put_document(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    let header_str = |name: header::HeaderName| {
        headers
            .get(&name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    };

    let expected = if header_str(header::IF_NONE_MATCH) == Some("*") {
        Version::initial()
    } else if let Some(tag) = header_str(header::IF_MATCH) {
        Version::from_etag(tag)
    } else {
        return (
            StatusCode::PRECONDITION_REQUIRED,
            Json(ApiResponse::<()>::err("If-Match or If-None-Match: * is required")),
        )
            .into_response();
    };

    match blocking(&state, move |client| client.replace_document(&body, &expected)).await {
        Ok(CasOutcome::Committed(version)) => with_etag(
            (StatusCode::OK, Json(ApiResponse::ok(version.as_str().to_string()))).into_response(),
            &version,
        ),
        Ok(CasOutcome::Conflict) => (
            StatusCode::PRECONDITION_FAILED,
            Json(ApiResponse::<()>::err("document version changed")),
        )
            .into_response(),
        // The caller sent the bad document, not the store
        Err(GridError::MalformedDocument(msg)) => bad_request::<()>(msg).into_response(),
        Err(e) => reply::<()>(Err(e)).into_response(),
    }
}

// ─── Storage Backend Selection ──────────────────────────────────────────────

pub fn create_client(storage: &str, store_token: Option<&str>, config: GridConfig) -> GridClient {
    if storage == "memory" {
        tracing::info!("Storage backend: in-memory (grid will not persist)");
        GridClient::with_store(
            Arc::new(gridlease_core::infrastructure_in_memory::InMemoryGridStore::new()),
            Arc::new(gridlease_core::clock::SystemClock),
            config,
        )
    } else if let Some(path) = storage.strip_prefix("sqlite:") {
        #[cfg(feature = "sqlite")]
        {
            tracing::info!("Storage backend: SQLite ({})", path);
            match GridClient::with_sqlite(path, config.clone()) {
                Ok(client) => client,
                Err(e) => {
                    tracing::error!("Failed to open SQLite: {}. Falling back to in-memory.", e);
                    create_client("memory", None, config)
                }
            }
        }
        #[cfg(not(feature = "sqlite"))]
        {
            tracing::error!(
                "SQLite storage requested but `sqlite` feature is not enabled. \
                 Rebuild with: cargo build --features sqlite"
            );
            tracing::warn!("Falling back to in-memory storage.");
            let _ = path;
            create_client("memory", None, config)
        }
    } else if let Some(url) = http_store_url(storage) {
        tracing::info!("Storage backend: HTTP document ({})", url);
        GridClient::with_http(url, store_token, config)
    } else {
        tracing::error!(
            "Unknown storage backend: '{}'. Use 'memory', 'sqlite:<path>' or 'http:<url>'",
            storage
        );
        tracing::warn!("Falling back to in-memory storage.");
        create_client("memory", None, config)
    }
}

/// Accepts `http:<url>` as well as a bare `http(s)://` URL
fn http_store_url(storage: &str) -> Option<&str> {
    if storage.starts_with("http://") || storage.starts_with("https://") {
        return Some(storage);
    }
    storage
        .strip_prefix("http:")
        .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
}
