use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde_json::{json, Value};
use validator::Validate;

use crate::{
    error::AppError,
    middleware::auth::Principal,
    models::analytics::{SatisfactionPayload, SessionAnalytics},
    state::AppState,
};

/// Returns the session's analytics row, deriving it on demand when the
/// session ended before the asynchronous computation ran.
pub async fn get_analytics(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionAnalytics>, AppError> {
    let analytics = state.analytics_service().get_or_compute(&session_id).await?;
    Ok(Json(analytics))
}

/// Backfills a satisfaction rating submitted after the session ended.
pub async fn record_satisfaction(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(session_id): Path<String>,
    Json(payload): Json<SatisfactionPayload>,
) -> Result<Json<Value>, AppError> {
    payload.validate()?;
    state
        .analytics_service()
        .record_satisfaction(&session_id, payload.role, payload.rating)
        .await?;
    Ok(Json(json!({ "message": "Satisfaction rating recorded" })))
}
