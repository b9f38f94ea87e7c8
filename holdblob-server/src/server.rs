use crate::config::Config;
use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::{StreamExt, TryStreamExt, stream};
use holdblob_core::{
    AssignHolderRequest, AssignHolderResponse, BlobService, FindExistingRequest,
    FindExistingResponse, GetRequest, HoldError, MetadataStore, PutRequest, RemoveRequest, Result,
    ServiceContext, Status, WorkerPool,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

pub const CONTENT_HASH_HEADER: &str = "x-content-hash";
pub const DEDUPLICATED_HEADER: &str = "x-blob-deduplicated";

pub struct ServerState {
    pub service: BlobService,
    pub workers: WorkerPool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    code: &'static str,
}

/// Open the metadata database and object store named by `config`.
pub fn build_service(config: &Config) -> Result<BlobService> {
    let metadata = MetadataStore::open(&config.metadata.db_path)?;
    let objects = config.object_store_builder().build()?;

    let context = ServiceContext::new(&metadata, objects)
        .with_limits(config.transport_limits())
        .with_grace_period(config.gc.grace_period());
    Ok(BlobService::new(context))
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/v1/blobs/:holder",
            get(get_blob).put(put_blob).delete(remove_blob),
        )
        .route("/v1/holders", post(assign_holder))
        .route("/v1/content/existing", post(find_existing))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: Config) -> Result<()> {
    let service = build_service(&config)?;
    let workers = WorkerPool::new(config.workers.max_concurrent_calls);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let gc_task = if config.gc.enabled {
        let gc = service.garbage_collector(config.gc.interval());
        Some(tokio::spawn(async move { gc.run(shutdown_rx).await }))
    } else {
        tracing::info!("GC disabled");
        None
    };

    let state = Arc::new(ServerState { service, workers });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(gc_task) = gc_task {
        if let Err(error) = gc_task.await {
            tracing::warn!("GC task ended abnormally: {}", error);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", error);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Run `task` on the worker pool and wait for it.
async fn scheduled<F, T>(state: &ServerState, task: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    state
        .workers
        .schedule(task)
        .await
        .map_err(|error| HoldError::Internal(format!("call task failed: {}", error)))?
}

fn error_response(error: &HoldError) -> Response {
    let status = Status::from(error);
    let http_status = match status.code {
        holdblob_core::StatusCode::NotFound => StatusCode::NOT_FOUND,
        holdblob_core::StatusCode::AlreadyExists => StatusCode::CONFLICT,
        holdblob_core::StatusCode::HashMismatch => StatusCode::UNPROCESSABLE_ENTITY,
        holdblob_core::StatusCode::InvalidArgument => StatusCode::BAD_REQUEST,
        holdblob_core::StatusCode::Internal => {
            tracing::error!("Request failed: {}", error);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let resp = ErrorResponse {
        success: false,
        error: status.message,
        code: status.code.as_str(),
    };
    (http_status, axum::Json(resp)).into_response()
}

fn range_not_satisfiable(size: u64) -> Response {
    let resp = ErrorResponse {
        success: false,
        error: "range not satisfiable".to_string(),
        code: "range_not_satisfiable",
    };
    (
        StatusCode::RANGE_NOT_SATISFIABLE,
        [(header::CONTENT_RANGE, format!("bytes */{}", size))],
        axum::Json(resp),
    )
        .into_response()
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let available = state.service.context().objects.is_available().await;

    let response = serde_json::json!({
        "status": if available { "ok" } else { "degraded" },
        "object_store_available": available,
    });

    (StatusCode::OK, axum::Json(response))
}

async fn put_blob(
    State(state): State<Arc<ServerState>>,
    Path(holder): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let content_hash = match headers
        .get(CONTENT_HASH_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        Some(value) => value.trim().to_string(),
        None => {
            return error_response(&HoldError::InvalidArgument(format!(
                "missing {} header",
                CONTENT_HASH_HEADER
            )));
        }
    };

    let chunks = body
        .into_data_stream()
        .map_err(|error| HoldError::Internal(format!("request body aborted: {}", error)))
        .map_ok(PutRequest::Chunk);
    let messages = Box::pin(
        stream::once(async move {
            Ok(PutRequest::Params {
                holder,
                content_hash,
            })
        })
        .chain(chunks),
    );

    let service = state.service.clone();
    match scheduled(&state, async move { service.put(messages).await }).await {
        Ok(outcome) => {
            let deduplicated = HeaderValue::from_static(if outcome.is_deduplicated() {
                "true"
            } else {
                "false"
            });
            (StatusCode::NO_CONTENT, [(DEDUPLICATED_HEADER, deduplicated)]).into_response()
        }
        Err(error) => error_response(&error),
    }
}

async fn get_blob(
    State(state): State<Arc<ServerState>>,
    Path(holder): Path<String>,
    headers: HeaderMap,
) -> Response {
    let service = state.service.clone();
    let result = match scheduled(&state, async move {
        service.get(GetRequest { holder }).await
    })
    .await
    {
        Ok(result) => result,
        Err(error) => return error_response(&error),
    };

    let mut reader = result.reader;
    let size = reader.size();

    let range = match headers.get(header::RANGE) {
        None => None,
        Some(value) => {
            let parsed = value
                .to_str()
                .map_err(|_| RangeError::Malformed("range header is not ASCII".to_string()))
                .and_then(|value| parse_range(value, size));
            match parsed {
                Ok(range) => Some(range),
                Err(RangeError::Unsatisfiable) => return range_not_satisfiable(size),
                Err(RangeError::Malformed(message)) => {
                    return error_response(&HoldError::InvalidArgument(message));
                }
            }
        }
    };

    let status = match range {
        Some((start, last)) => {
            if let Err(error) = reader.set_byte_range(start, last + 1) {
                return error_response(&error);
            }
            StatusCode::PARTIAL_CONTENT
        }
        None => StatusCode::OK,
    };

    let content_length = reader.remaining();
    let body = Body::from_stream(reader.into_stream().map_ok(|response| response.chunk));

    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(content_length));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some((start, last)) = range {
        if let Ok(value) = HeaderValue::from_str(&format!("bytes {}-{}/{}", start, last, size)) {
            headers.insert(header::CONTENT_RANGE, value);
        }
    }
    response
}

async fn remove_blob(
    State(state): State<Arc<ServerState>>,
    Path(holder): Path<String>,
) -> Response {
    let service = state.service.clone();
    match scheduled(&state, async move {
        service.remove(RemoveRequest { holder }).await
    })
    .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(&error),
    }
}

async fn assign_holder(
    State(state): State<Arc<ServerState>>,
    axum::Json(request): axum::Json<AssignHolderRequest>,
) -> Response {
    let service = state.service.clone();
    match scheduled(&state, async move { service.assign_holder(request).await }).await {
        Ok(data_exists) => {
            (StatusCode::OK, axum::Json(AssignHolderResponse { data_exists })).into_response()
        }
        Err(error) => error_response(&error),
    }
}

async fn find_existing(
    State(state): State<Arc<ServerState>>,
    axum::Json(request): axum::Json<FindExistingRequest>,
) -> Response {
    let service = state.service.clone();
    match scheduled(&state, async move { service.find_existing(request).await }).await {
        Ok(existing) => {
            let mut existing: Vec<String> = existing.into_iter().collect();
            existing.sort();
            (StatusCode::OK, axum::Json(FindExistingResponse { existing })).into_response()
        }
        Err(error) => error_response(&error),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum RangeError {
    Malformed(String),
    Unsatisfiable,
}

/// Parse a single `bytes=` range into an inclusive `(first, last)` pair.
/// The last byte is clamped to the object.
fn parse_range(value: &str, size: u64) -> std::result::Result<(u64, u64), RangeError> {
    let ranges = value
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(|| RangeError::Malformed(format!("unsupported range unit: {}", value)))?;

    if ranges.contains(',') {
        return Err(RangeError::Malformed(
            "multiple ranges not supported".to_string(),
        ));
    }

    let (first, last) = ranges
        .trim()
        .split_once('-')
        .ok_or_else(|| RangeError::Malformed(format!("invalid range: {}", value)))?;
    let parse = |text: &str| {
        text.trim()
            .parse::<u64>()
            .map_err(|_| RangeError::Malformed(format!("invalid range: {}", value)))
    };

    match (first.trim().is_empty(), last.trim().is_empty()) {
        // bytes=-N
        (true, false) => {
            let length = parse(last)?;
            if length == 0 || size == 0 {
                return Err(RangeError::Unsatisfiable);
            }
            Ok((size.saturating_sub(length), size - 1))
        }
        // bytes=N-
        (false, true) => {
            let start = parse(first)?;
            if start >= size {
                return Err(RangeError::Unsatisfiable);
            }
            Ok((start, size - 1))
        }
        // bytes=N-M
        (false, false) => {
            let start = parse(first)?;
            let end = parse(last)?;
            if start > end {
                return Err(RangeError::Malformed(format!("invalid range: {}", value)));
            }
            if start >= size {
                return Err(RangeError::Unsatisfiable);
            }
            Ok((start, end.min(size - 1)))
        }
        (true, true) => Err(RangeError::Malformed(format!("invalid range: {}", value))),
    }
}
