use crate::engine::EngineStats;
use crate::results::SearchHit;
use crate::worker::{StatusSnapshot, WorkerError, WorkerHandle};
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    worker: WorkerHandle,
}

/// The RPC surface over the worker: sync is fire-and-forget with progress
/// polled from `/api/status`, everything else answers in-request.
pub fn router(worker: WorkerHandle) -> Router {
    let shared_state = Arc::new(SharedState { worker });

    Router::new()
        .route("/api/sync", post(sync))
        .route("/api/search", post(search))
        .route("/api/more", post(more_results))
        .route("/api/clear", post(clear_all))
        .route("/api/stats", get(stats))
        .route("/api/status", get(status))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn start_app(worker: WorkerHandle, host: &str, port: u16) {
    let app = router(worker);

    async fn shutdown_signal() {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => log::info!("interrupt received, shutting down"),
            _ = terminate => log::info!("termination signal received, shutting down"),
        }
    }

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    log::info!("listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();
}

/// Serve until interrupted, then drain the worker and join it.
pub fn start_daemon(engine: crate::engine::Engine, host: String, port: u16) {
    let (worker, worker_thread) = crate::worker::spawn(engine);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(start_app(worker, &host, port));

    // The worker exits once every handle clone inside the runtime is gone.
    drop(runtime);
    log::info!("waiting for the worker to finish");
    if worker_thread.join().is_err() {
        log::error!("worker thread panicked");
    }
}

#[derive(Debug)]
struct HttpError(WorkerError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        match &self.0 {
            WorkerError::Gone => {
                log::error!("{:?}", self.0);
                (
                    axum::http::StatusCode::SERVICE_UNAVAILABLE,
                    json!({"error": self.0.to_string()}).to_string(),
                )
            }
            WorkerError::Engine(_) => {
                log::error!("{:?}", self.0);
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": self.0.to_string()}).to_string(),
                )
            }
        }
        .into_response()
    }
}

impl From<WorkerError> for HttpError {
    fn from(err: WorkerError) -> Self {
        Self(err)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncRequest {
    /// Folder ids whose subtrees should be tracked
    pub folders: Vec<String>,
}

async fn sync(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SyncRequest>,
) -> Result<Json<serde_json::Value>, HttpError> {
    log::debug!("payload: {payload:?}");

    if !state.worker.request_sync(payload.folders) {
        return Err(HttpError(WorkerError::Gone));
    }
    Ok(Json(json!({"accepted": true})))
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<Vec<SearchHit>>, HttpError> {
    log::debug!("payload: {payload:?}");

    let hits = state.worker.search(payload.query).await?;
    Ok(Json(hits))
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoreResultsRequest {
    /// 1-based page into the most recent search
    pub page: usize,
}

async fn more_results(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<MoreResultsRequest>,
) -> Result<Json<Vec<SearchHit>>, HttpError> {
    log::debug!("payload: {payload:?}");

    let hits = state.worker.more_results(payload.page).await?;
    Ok(Json(hits))
}

async fn clear_all(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<serde_json::Value>, HttpError> {
    state.worker.clear_all().await?;
    Ok(Json(json!({"cleared": true})))
}

async fn stats(State(state): State<Arc<SharedState>>) -> Result<Json<EngineStats>, HttpError> {
    let stats = state.worker.stats().await?;
    Ok(Json(stats))
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    /// Return only updates with a sequence number above this
    #[serde(default)]
    pub after: u64,
}

async fn status(
    State(state): State<Arc<SharedState>>,
    Query(query): Query<StatusQuery>,
) -> Json<StatusSnapshot> {
    Json(state.worker.status(query.after))
}
