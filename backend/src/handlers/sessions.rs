use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    error::AppError,
    middleware::auth::Principal,
    models::{
        session::{
            CreateSessionPayload, EndSessionPayload, JoinResponse, SessionListQuery,
            SessionResponse, TechnicalIssuePayload,
        },
        PaginatedResponse, PaginationQuery,
    },
    repositories::SessionListFilters,
    state::AppState,
    utils::join_link::{issue_join_link, verify_join_link},
};

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateSessionResponse {
    pub session: SessionResponse,
    /// Time-boxed link for out-of-band patient access.
    pub patient_join_link: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PatientLinkResponse {
    pub patient_join_link: String,
    pub expires_in_hours: i64,
}

fn join_link_path(state: &AppState, session_id: &str) -> Result<String, AppError> {
    let token = issue_join_link(
        session_id,
        state.config.join_link_ttl_hours,
        &state.config.join_link_secret,
    )?;
    Ok(format!("/telemedicine/join/{}", token))
}

pub async fn create_session(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Json(payload): Json<CreateSessionPayload>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), AppError> {
    payload.validate()?;
    let session = state.session_service().create(payload).await?;
    let patient_join_link = join_link_path(&state, &session.session_id)?;
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session: session.into(),
            patient_join_link,
        }),
    ))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(filters): Query<SessionListQuery>,
    Query(pagination): Query<PaginationQuery>,
) -> Result<Json<PaginatedResponse<SessionResponse>>, AppError> {
    let filters = SessionListFilters {
        status: filters.status,
        doctor_id: filters.doctor_id,
        patient_id: filters.patient_id,
    };
    let limit = pagination.limit();
    let offset = pagination.offset();
    let (sessions, total) = state.session_service().list(&filters, limit, offset).await?;
    let data = sessions.into_iter().map(SessionResponse::from).collect();
    Ok(Json(PaginatedResponse::new(data, total, limit, offset)))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = state.session_service().get(&session_id).await?;
    Ok(Json(session.into()))
}

pub async fn join_session(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
) -> Result<Json<JoinResponse>, AppError> {
    let role = principal.participant_role().ok_or_else(|| {
        AppError::Forbidden("Only doctors and patients can join sessions".to_string())
    })?;
    let joined = state
        .session_service()
        .join(&session_id, role, principal.id)
        .await?;
    Ok(Json(joined))
}

pub async fn start_session(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = state
        .session_service()
        .start(&session_id, principal.id)
        .await?;
    Ok(Json(session.into()))
}

pub async fn end_session(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(session_id): Path<String>,
    payload: Option<Json<EndSessionPayload>>,
) -> Result<Json<SessionResponse>, AppError> {
    let reason = match payload {
        Some(Json(payload)) => {
            payload.validate()?;
            payload.reason
        }
        None => None,
    };
    let session = state.session_service().end(&session_id, reason).await?;
    Ok(Json(session.into()))
}

pub async fn cancel_session(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(session_id): Path<String>,
    payload: Option<Json<EndSessionPayload>>,
) -> Result<Json<SessionResponse>, AppError> {
    let reason = match payload {
        Some(Json(payload)) => {
            payload.validate()?;
            payload.reason
        }
        None => None,
    };
    let session = state.session_service().cancel(&session_id, reason).await?;
    Ok(Json(session.into()))
}

pub async fn fail_session(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(session_id): Path<String>,
    payload: Option<Json<EndSessionPayload>>,
) -> Result<Json<SessionResponse>, AppError> {
    let reason = match payload {
        Some(Json(payload)) => {
            payload.validate()?;
            payload.reason
        }
        None => None,
    };
    let session = state.session_service().fail(&session_id, reason).await?;
    Ok(Json(session.into()))
}

pub async fn report_issue(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(session_id): Path<String>,
    Json(payload): Json<TechnicalIssuePayload>,
) -> Result<Json<Value>, AppError> {
    payload.validate()?;
    state
        .session_service()
        .report_issue(&session_id, &payload.description)
        .await?;
    Ok(Json(json!({ "message": "Technical issue recorded" })))
}

pub async fn issue_patient_link(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(session_id): Path<String>,
) -> Result<Json<PatientLinkResponse>, AppError> {
    // Only sessions that exist get links.
    let session = state.session_service().get(&session_id).await?;
    let patient_join_link = join_link_path(&state, &session.session_id)?;
    Ok(Json(PatientLinkResponse {
        patient_join_link,
        expires_in_hours: state.config.join_link_ttl_hours,
    }))
}

/// Public: resolves a patient link token to its session. Identity is bound
/// server-side through the session's patient reference.
pub async fn resolve_patient_link(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let session_id = verify_join_link(&token, &state.config.join_link_secret)?;
    let session = state.session_service().get(&session_id).await?;
    Ok(Json(session.into()))
}
