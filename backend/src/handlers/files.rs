use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use validator::Validate;

use crate::{
    error::AppError,
    middleware::auth::Principal,
    models::shared_file::{SharedFileResponse, UploadFilePayload},
    state::AppState,
};

/// Registers file metadata for a session. The bytes themselves go to the
/// external blob store.
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
    Json(payload): Json<UploadFilePayload>,
) -> Result<(StatusCode, Json<SharedFileResponse>), AppError> {
    payload.validate()?;
    let file = state
        .chat_service()
        .upload_file(&session_id, principal.id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(file)))
}

pub async fn list_files(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<SharedFileResponse>>, AppError> {
    let files = state
        .chat_service()
        .list_files(&session_id, principal.id)
        .await?;
    Ok(Json(files))
}
