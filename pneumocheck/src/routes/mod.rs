mod health;
mod metrics;
mod page;
mod predict;
mod select_image;
mod sessions;

use crate::server::SharedState;
use crate::session::Session;
use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use health::healthcheck;
use metrics::metrics_handler;
use page::{predict_page, redirect_to_predict};
use predict::submit_prediction;
use select_image::select_image;
use sessions::{create_session, delete_session, get_session};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(redirect_to_predict))
        .route("/predict", get(predict_page))
        .route("/health", get(healthcheck))
        .route("/metrics", get(metrics_handler))
        .route("/api/sessions", post(create_session))
        .route(
            "/api/sessions/{id}",
            get(get_session).delete(delete_session),
        )
        .route("/api/sessions/{id}/image", post(select_image))
        .route("/api/sessions/{id}/predict", post(submit_prediction))
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Session {0} not found")]
    SessionNotFound(Uuid),
    #[error("Invalid upload: {0}")]
    InvalidUpload(#[from] MultipartError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidUpload(e) => e.status(),
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

fn find_session(state: &SharedState, id: &Uuid) -> Result<Session, ApiError> {
    state
        .sessions
        .get(id)
        .ok_or(ApiError::SessionNotFound(*id))
}
