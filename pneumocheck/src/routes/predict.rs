use super::{find_session, ApiError};
use crate::{server::SharedState, session::Submission};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

#[instrument(skip(state))]
pub async fn submit_prediction(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    state.metrics.record_request("predict");
    let session = find_session(&state, &id)?;

    let started = Instant::now();
    let submission = session.submit(state.predictor.clone()).await;
    let view = session.view();

    let (status, outcome) = match &submission {
        Submission::Applied => {
            state
                .metrics
                .record_prediction_duration(started.elapsed().as_millis() as u64, "predict");
            (StatusCode::OK, view.state.as_str())
        }
        Submission::Discarded => (StatusCode::OK, "discarded"),
        Submission::AlreadySubmitting => (StatusCode::CONFLICT, "ignored"),
        Submission::Rejected(_) => (StatusCode::UNPROCESSABLE_ENTITY, "rejected"),
    };
    state.metrics.record_prediction_outcome(outcome);

    Ok((status, Json(view)).into_response())
}
