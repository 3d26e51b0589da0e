use axum::{
    extract::{Path, State},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    Extension, Json,
};
use serde_json::{json, Value};
use validator::Validate;

use crate::{
    error::AppError,
    middleware::auth::Principal,
    models::{
        consent::{ConsentDecisionPayload, ConsentRecordResponse, RequestConsentPayload},
        session::ConsentVersionPayload,
    },
    state::AppState,
    types::ConsentId,
};

pub async fn request_consent(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(session_id): Path<String>,
    Json(payload): Json<RequestConsentPayload>,
) -> Result<(StatusCode, Json<ConsentRecordResponse>), AppError> {
    payload.validate()?;
    let record = state
        .consent_service()
        .request_consent(&session_id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

pub async fn respond_consent(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(consent_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<ConsentDecisionPayload>,
) -> Result<Json<ConsentRecordResponse>, AppError> {
    let consent_id: ConsentId = consent_id
        .parse()
        .map_err(|_| AppError::BadRequest("Invalid consent id".to_string()))?;
    let record = state
        .consent_service()
        .respond(
            consent_id,
            payload.granted,
            extract_ip(&headers),
            extract_user_agent(&headers),
        )
        .await?;
    Ok(Json(record.into()))
}

pub async fn list_consents(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<ConsentRecordResponse>>, AppError> {
    let records = state.consent_service().list_for_session(&session_id).await?;
    Ok(Json(records.into_iter().map(Into::into).collect()))
}

/// Raises the required consent-text version for one type; existing grants
/// recorded against older versions stop satisfying capability checks.
pub async fn set_consent_version(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(session_id): Path<String>,
    Json(payload): Json<ConsentVersionPayload>,
) -> Result<Json<Value>, AppError> {
    payload.validate()?;
    state
        .consent_service()
        .set_required_version(&session_id, payload.consent_type, &payload.version)
        .await?;
    Ok(Json(json!({
        "message": "Consent version updated",
        "consent_type": payload.consent_type,
        "version": payload.version,
    })))
}

fn extract_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        return value
            .split(',')
            .next()
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty());
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|agent| agent.trim().to_string())
        .filter(|agent| !agent.is_empty())
}
