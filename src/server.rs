//! HTTP surface (axum). Frame and worker calls block, so they run on
//! Tokio's blocking pool.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Form, Json, Router};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{Engine, FrameError};
use crate::keypoints::ExtractError;
use crate::metrics::MetricSummary;
use crate::recognizer::{ClassifyError, RecognizeError};

/// Header naming the client session. Absent → the default session.
pub const SESSION_HEADER: &str = "x-session-id";

/// Error body: `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<FrameError> for ApiError {
    fn from(err: FrameError) -> Self {
        let status = match &err {
            FrameError::InvalidSession(_) => StatusCode::BAD_REQUEST,
            FrameError::Extract(ExtractError::InvalidImage(_)) => StatusCode::BAD_REQUEST,
            FrameError::Extract(ExtractError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            FrameError::Extract(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FrameError::Recognize(RecognizeError::Classify(ClassifyError::Unavailable(_))) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            FrameError::Recognize(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = self.status.as_u16(), error = %self.message, "request failed");
        } else {
            debug!(status = self.status.as_u16(), error = %self.message, "request rejected");
        }
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PredictResponse {
    pub gloss: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Base64Frame {
    image: String,
}

#[derive(Debug, Deserialize)]
struct TranslateForm {
    #[serde(default)]
    gloss_text: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct TranslateResponse {
    pub sentence: String,
}

pub fn router(engine: Arc<Engine>) -> Router {
    let max_frame = engine.config().server.max_frame_bytes;
    // Room for base64 expansion plus multipart/JSON framing.
    let body_limit = max_frame / 3 * 4 + 64 * 1024;
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/predict-frame", post(predict_frame))
        .route("/predict-frame/base64", post(predict_frame_base64))
        .route("/translate", post(translate))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", delete(delete_session))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(engine)
}

/// Serve until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    engine: Arc<Engine>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "http server listening");
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("http server stopped");
    Ok(())
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "QuietCare sign engine is running" }))
}

async fn health(State(engine): State<Arc<Engine>>) -> Json<serde_json::Value> {
    let report = engine.health();
    let status = if report.worker_available { "ok" } else { "degraded" };
    Json(serde_json::json!({
        "status": status,
        "worker_available": report.worker_available,
        "translator_available": report.translator_available,
        "translator_backend": report.translator_backend,
        "sessions": report.sessions,
        "workers_running": report.workers_running,
    }))
}

fn session_header(headers: &HeaderMap) -> Result<Option<String>, ApiError> {
    headers
        .get(SESSION_HEADER)
        .map(|v| {
            v.to_str()
                .map(str::to_string)
                .map_err(|_| ApiError::bad_request("session id header is not valid ASCII"))
        })
        .transpose()
}

async fn run_frame(
    engine: Arc<Engine>,
    session: Option<String>,
    image: Bytes,
) -> Result<Json<PredictResponse>, ApiError> {
    if image.len() > engine.config().server.max_frame_bytes {
        return Err(ApiError::bad_request(format!(
            "frame of {} bytes exceeds limit",
            image.len()
        )));
    }
    let confirmation =
        tokio::task::spawn_blocking(move || engine.process_frame(session.as_deref(), &image))
            .await
            .map_err(|e| ApiError::internal(format!("frame task failed: {e}")))??;
    Ok(Json(PredictResponse {
        gloss: confirmation.map(|c| c.gloss),
    }))
}

async fn predict_frame(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>, ApiError> {
    let session = session_header(&headers)?;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            let image = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("read file field: {e}")))?;
            return run_frame(engine, session, image).await;
        }
    }
    Err(ApiError::bad_request("multipart field `file` is required"))
}

async fn predict_frame_base64(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    Json(frame): Json<Base64Frame>,
) -> Result<Json<PredictResponse>, ApiError> {
    let session = session_header(&headers)?;
    let image = decode_image_payload(&frame.image)?;
    run_frame(engine, session, Bytes::from(image)).await
}

/// Decode plain base64 or a `data:image/...;base64,` URL.
fn decode_image_payload(payload: &str) -> Result<Vec<u8>, ApiError> {
    let encoded = match payload.split_once(',') {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => payload,
    };
    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| ApiError::bad_request(format!("invalid base64 image: {e}")))
}

async fn translate(
    State(engine): State<Arc<Engine>>,
    Form(form): Form<TranslateForm>,
) -> Json<TranslateResponse> {
    let sentence = engine.translate(&form.gloss_text).await;
    Json(TranslateResponse { sentence })
}

async fn create_session(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    let id = engine.create_session();
    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "session_id": id.as_str() })),
    )
}

async fn delete_session(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match engine.remove_session(&id) {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(ApiError {
            status: StatusCode::NOT_FOUND,
            message: format!("session {id} not found"),
        }),
        Err(e) => Err(ApiError::bad_request(e.to_string())),
    }
}

async fn metrics(State(engine): State<Arc<Engine>>) -> Json<HashMap<String, MetricSummary>> {
    Json(engine.metrics().summary())
}
