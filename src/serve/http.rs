//! HTTP transport for the inference service (axum)
//!
//! | Method | Path                    | Response                              |
//! |--------|-------------------------|---------------------------------------|
//! | GET    | `/`                     | `{"message": ...}`                    |
//! | GET    | `/health`               | `{"status": "ok"}`                    |
//! | GET    | `/metadata`             | artifact summary                      |
//! | POST   | `/predict?filename=...` | `{"filename": ..., "prediction": ...}`|
//!
//! `/predict` takes the raw image as the request body. Non-image content
//! (by `Content-Type` or by decoding) is a `400`; anything else that fails
//! is a `500`. Both carry `{"detail": ...}`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::InferenceService;
use crate::model::Classifier;
use crate::{Error, Result};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const WELCOME: &str = "Welcome to the Edge Prediction API!";

#[derive(Debug, Deserialize)]
struct PredictQuery {
    filename: Option<String>,
}

/// Body of a successful prediction.
#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    /// Client-supplied file name (echoed back)
    pub filename: String,
    /// Predicted label
    pub prediction: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            detail: detail.into(),
        }),
    )
        .into_response()
}

fn is_image_content_type(headers: &HeaderMap) -> bool {
    headers.get(CONTENT_TYPE).map_or(true, |value| {
        value.to_str().is_ok_and(|ct| {
            let ct = ct.trim().to_ascii_lowercase();
            ct.starts_with("image/") || ct.starts_with("application/octet-stream")
        })
    })
}

/// Router over a shared service.
pub fn router<M: Classifier + 'static>(service: Arc<InferenceService<M>>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health::<M>))
        .route("/metadata", get(metadata::<M>))
        .route("/predict", post(predict::<M>))
        .with_state(service)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": WELCOME }))
}

async fn health<M: Classifier + 'static>(
    State(service): State<Arc<InferenceService<M>>>,
) -> impl IntoResponse {
    Json(service.health())
}

async fn metadata<M: Classifier + 'static>(
    State(service): State<Arc<InferenceService<M>>>,
) -> impl IntoResponse {
    Json(service.metadata().clone())
}

async fn predict<M: Classifier + 'static>(
    State(service): State<Arc<InferenceService<M>>>,
    Query(query): Query<PredictQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let filename = query.filename.unwrap_or_else(|| "upload".to_string());
    if !is_image_content_type(&headers) {
        return error_response(StatusCode::BAD_REQUEST, "File provided is not an image.");
    }

    let outcome = tokio::task::spawn_blocking(move || service.predict(&body)).await;
    match outcome {
        Ok(Ok(prediction)) => (
            StatusCode::OK,
            Json(PredictResponse {
                filename,
                prediction,
            }),
        )
            .into_response(),
        Ok(Err(Error::InvalidImage(detail))) => error_response(StatusCode::BAD_REQUEST, detail),
        Ok(Err(e)) => {
            error!(filename = %filename, error = %e, "prediction failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            error!(filename = %filename, error = %e, "prediction task panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "prediction task failed")
        }
    }
}

/// Serve `service` on `addr` until Ctrl-C.
///
/// # Errors
///
/// Returns `Error::Io` if the address cannot be bound or the server fails.
pub async fn serve<M: Classifier + 'static>(
    service: Arc<InferenceService<M>>,
    addr: SocketAddr,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "prediction API listening");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(async {
            // An unavailable signal handler means we simply run until killed.
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
