use super::{find_session, ApiError};
use crate::{controller::ControllerView, server::SharedState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

#[derive(Serialize)]
pub struct SessionCreated {
    id: Uuid,
    view: ControllerView,
}

#[instrument(skip(state))]
pub async fn create_session(
    State(state): State<SharedState>,
) -> (StatusCode, Json<SessionCreated>) {
    state.metrics.record_request("create_session");
    let (id, session) = state.sessions.create();

    (
        StatusCode::CREATED,
        Json(SessionCreated {
            id,
            view: session.view(),
        }),
    )
}

#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ControllerView>, ApiError> {
    state.metrics.record_request("get_session");
    let session = find_session(&state, &id)?;
    Ok(Json(session.view()))
}

#[instrument(skip(state))]
pub async fn delete_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.metrics.record_request("delete_session");
    if state.sessions.remove(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::SessionNotFound(id))
    }
}
