use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::{json, Value};
use validator::Validate;

use crate::{
    error::AppError,
    middleware::auth::Principal,
    models::message::{MessageListQuery, MessageResponse, SendMessagePayload, SenderRole},
    state::AppState,
    types::MessageId,
};

pub async fn send_message(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    payload.validate()?;
    let role = principal.participant_role().ok_or_else(|| {
        AppError::Forbidden("Only session participants can send messages".to_string())
    })?;
    let message = state
        .chat_service()
        .send_message(&session_id, principal.id, SenderRole::from(role), payload)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(session_id): Path<String>,
    Query(query): Query<MessageListQuery>,
) -> Result<Json<Vec<MessageResponse>>, AppError> {
    let messages = state
        .chat_service()
        .list_messages(&session_id, query.limit())
        .await?;
    Ok(Json(messages))
}

/// Direct-id fetch for audit; soft-deleted messages are still returned here.
pub async fn get_message(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path((session_id, message_id)): Path<(String, String)>,
) -> Result<Json<MessageResponse>, AppError> {
    let message_id: MessageId = message_id
        .parse()
        .map_err(|_| AppError::BadRequest("Invalid message id".to_string()))?;
    let message = state
        .chat_service()
        .get_message(&session_id, message_id)
        .await?;
    Ok(Json(message))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((session_id, message_id)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let message_id: MessageId = message_id
        .parse()
        .map_err(|_| AppError::BadRequest("Invalid message id".to_string()))?;
    state
        .chat_service()
        .delete_message(&session_id, message_id, principal.id)
        .await?;
    Ok(Json(json!({ "message": "Message deleted" })))
}
