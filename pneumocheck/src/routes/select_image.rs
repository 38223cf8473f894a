use super::{find_session, ApiError};
use crate::{image::CandidateFile, server::SharedState};
use axum::{
    extract::{
        multipart::{Multipart, MultipartError},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use bytes::BytesMut;
use tracing::instrument;
use uuid::Uuid;

const FILE_FIELD: &str = "file";

/// Shared by the file picker and the drop zone.
#[instrument(skip(state, multipart))]
pub async fn select_image(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    state.metrics.record_request("select_image");
    let session = find_session(&state, &id)?;
    let validator = *state.sessions.validator();

    let candidate = match read_candidate(&mut multipart, validator.max_bytes()).await {
        Ok(candidate) => candidate,
        Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            tracing::info!("Upload cut off by the request body limit: {}", e);
            let view = session.reject(validator.too_large());
            return Ok((StatusCode::UNPROCESSABLE_ENTITY, Json(view)).into_response());
        }
        Err(e) => return Err(e.into()),
    };

    match session.select(candidate).await {
        Ok(view) => Ok((StatusCode::OK, Json(view)).into_response()),
        Err(e) => {
            tracing::info!(reason = %e, "Upload rejected");
            Ok((StatusCode::UNPROCESSABLE_ENTITY, Json(session.view())).into_response())
        }
    }
}

/// An empty file part is what a browser sends when nothing was picked.
///
/// At most `max_bytes + 1` bytes are kept, which is enough for the validator
/// to tell the file is too large. The rest of the part is read and dropped
/// so the client gets an answer instead of a reset connection.
async fn read_candidate(
    multipart: &mut Multipart,
    max_bytes: usize,
) -> Result<Option<CandidateFile>, MultipartError> {
    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let name = field.file_name().unwrap_or_default().to_string();
        let media_type = field.content_type().map(str::to_string);

        let keep = max_bytes.saturating_add(1);
        let mut bytes = BytesMut::new();
        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    let room = keep - bytes.len();
                    bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
                }
                Ok(None) => break,
                // Already over the image limit, the verdict does not depend
                // on the bytes we could not read.
                Err(e) if bytes.len() > max_bytes => {
                    tracing::debug!("Stopped reading oversized upload: {}", e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if name.is_empty() && bytes.is_empty() {
            return Ok(None);
        }

        return Ok(Some(CandidateFile {
            name,
            media_type,
            bytes: bytes.freeze(),
        }));
    }

    Ok(None)
}
