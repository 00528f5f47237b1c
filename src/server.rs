use std::net::SocketAddr;
use std::sync::Arc;

use adsight_rag::{ErrorBody, ErrorKind, FeedbackRequest, IndexReport, QueryAnswer, QueryRequest, Rag, RagError};
use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

pub fn router(rag: Arc<Rag>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/rag/query", post(query))
        .route("/api/rag/feedback", post(feedback))
        .route("/api/rag/index", post(index))
        .layer(TraceLayer::new_for_http())
        .with_state(rag)
}

pub async fn serve(rag: Arc<Rag>, bind: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {}", bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(%addr, client = %rag.config().client, "[RAG] Listening on http://{}", addr);
    axum::serve(
        listener,
        router(rag).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server shutdown")?;
    Ok(())
}

/// Library error plus the one failure the server adds: a blocking task that
/// never returned.
#[derive(Debug)]
enum ApiError {
    Rag(RagError),
    Worker(String),
}

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        ApiError::Rag(err)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Input => StatusCode::BAD_REQUEST,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::IndexUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Rag(err) => {
                let status = status_for(err.kind());
                let body = Json(ErrorBody::from(&err));
                match err {
                    RagError::RateLimited { retry_after_secs, .. } => (
                        status,
                        [(header::RETRY_AFTER, HeaderValue::from(retry_after_secs))],
                        body,
                    )
                        .into_response(),
                    _ => (status, body).into_response(),
                }
            }
            ApiError::Worker(msg) => {
                tracing::error!("[RAG] Worker task failed: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error." })),
                )
                    .into_response()
            }
        }
    }
}

/// Malformed or mistyped bodies get the same 400 and JSON error shape as
/// every other input error.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::warn!("[RAG] Rejected request body: {}", rejection.body_text());
        ApiError::Rag(RagError::InvalidInput(format!(
            "Invalid request body: {}",
            rejection.body_text()
        )))
    }
}

/// Runs a blocking library call off the async workers.
async fn blocking<T, F>(rag: Arc<Rag>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Rag) -> Result<T, RagError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&rag))
        .await
        .map_err(|e| ApiError::Worker(e.to_string()))?
        .map_err(ApiError::from)
}

/// `ip_<peer address>`, or `user_<x-user>` when the header is trusted and set.
fn identity(headers: &HeaderMap, peer: Option<SocketAddr>, trust_user_header: bool) -> String {
    let user = headers
        .get("x-user")
        .filter(|_| trust_user_header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    match (user, peer) {
        (Some(user), _) => format!("user_{}", user),
        (None, Some(addr)) => format!("ip_{}", addr.ip()),
        (None, None) => "ip_unknown".to_string(),
    }
}

async fn healthz(State(rag): State<Arc<Rag>>) -> Json<Value> {
    Json(json!({ "status": "ok", "client": rag.config().client }))
}

async fn query(
    State(rag): State<Arc<Rag>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryAnswer>, ApiError> {
    let Json(request) = body?;
    let who = identity(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        rag.config().trust_user_header,
    );
    let answer = blocking(rag, move |rag| rag.answer_query(&who, &request)).await?;
    Ok(Json(answer))
}

async fn feedback(
    State(rag): State<Arc<Rag>>,
    body: Result<Json<FeedbackRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = body?;
    blocking(rag, move |rag| rag.rate_answer(request.feedback_id, request.rating)).await?;
    Ok(Json(json!({ "status": "success" })))
}

async fn index(State(rag): State<Arc<Rag>>) -> Result<Json<IndexReport>, ApiError> {
    let report = blocking(rag, |rag| rag.index_corpus()).await?;
    Ok(Json(report))
}
