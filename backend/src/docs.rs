#![allow(dead_code)] // OpenAPI doc stubs are only referenced by utoipa macros.

use crate::{
    error::ErrorResponse,
    handlers::sessions::{CreateSessionResponse, PatientLinkResponse},
    models::{
        analytics::{SatisfactionPayload, SessionAnalytics},
        consent::{
            ConsentDecisionPayload, ConsentRecordResponse, ConsentStatus, ConsentType,
            RequestConsentPayload,
        },
        message::{MessageResponse, MessageType, SendMessagePayload, SenderRole},
        session::{
            ConsentVersionPayload, CreateSessionPayload, EndSessionPayload, JoinResponse,
            ParticipantRole, SessionResponse, SessionStatus, TechnicalIssuePayload,
        },
        shared_file::{SharedFileResponse, UploadFilePayload},
    },
};
use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        create_session_doc,
        get_session_doc,
        join_session_doc,
        start_session_doc,
        end_session_doc,
        request_consent_doc,
        respond_consent_doc,
        send_message_doc,
        list_messages_doc,
        upload_file_doc,
        get_analytics_doc,
        resolve_patient_link_doc,
    ),
    components(schemas(
        CreateSessionPayload,
        CreateSessionResponse,
        SessionResponse,
        SessionStatus,
        ParticipantRole,
        JoinResponse,
        EndSessionPayload,
        TechnicalIssuePayload,
        ConsentVersionPayload,
        RequestConsentPayload,
        ConsentDecisionPayload,
        ConsentRecordResponse,
        ConsentType,
        ConsentStatus,
        SendMessagePayload,
        MessageResponse,
        MessageType,
        SenderRole,
        UploadFilePayload,
        SharedFileResponse,
        SessionAnalytics,
        SatisfactionPayload,
        PatientLinkResponse,
        ErrorResponse,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "sessions", description = "Telemedicine session lifecycle"),
        (name = "consents", description = "Capability consent ledger"),
        (name = "channel", description = "Encrypted chat and file side-channel"),
        (name = "analytics", description = "Per-session analytics")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/telemedicine/sessions",
    request_body = CreateSessionPayload,
    responses(
        (status = 201, description = "Session created", body = CreateSessionResponse),
        (status = 400, description = "Validation failed", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "sessions"
)]
fn create_session_doc() {}

#[utoipa::path(
    get,
    path = "/api/telemedicine/sessions/{session_id}",
    params(("session_id" = String, Path, description = "External session id")),
    responses(
        (status = 200, description = "Session", body = SessionResponse),
        (status = 404, description = "Unknown session", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "sessions"
)]
fn get_session_doc() {}

#[utoipa::path(
    post,
    path = "/api/telemedicine/sessions/{session_id}/join",
    params(("session_id" = String, Path, description = "External session id")),
    responses(
        (status = 200, description = "Joined; includes the room token", body = JoinResponse),
        (status = 401, description = "Caller is not the bound participant", body = ErrorResponse),
        (status = 403, description = "Patient consent required", body = ErrorResponse),
        (status = 409, description = "Session is terminal", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "sessions"
)]
fn join_session_doc() {}

#[utoipa::path(
    post,
    path = "/api/telemedicine/sessions/{session_id}/start",
    params(("session_id" = String, Path, description = "External session id")),
    responses(
        (status = 200, description = "Session started", body = SessionResponse),
        (status = 409, description = "Not in the waiting state", body = ErrorResponse),
        (status = 412, description = "No live doctor connection", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "sessions"
)]
fn start_session_doc() {}

#[utoipa::path(
    post,
    path = "/api/telemedicine/sessions/{session_id}/end",
    params(("session_id" = String, Path, description = "External session id")),
    request_body = EndSessionPayload,
    responses(
        (status = 200, description = "Session completed", body = SessionResponse),
        (status = 409, description = "Not waiting or in progress", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "sessions"
)]
fn end_session_doc() {}

#[utoipa::path(
    post,
    path = "/api/telemedicine/sessions/{session_id}/consent",
    params(("session_id" = String, Path, description = "External session id")),
    request_body = RequestConsentPayload,
    responses(
        (status = 201, description = "Consent requested", body = ConsentRecordResponse),
        (status = 404, description = "Unknown session", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "consents"
)]
fn request_consent_doc() {}

#[utoipa::path(
    post,
    path = "/api/telemedicine/consent/{consent_id}/respond",
    params(("consent_id" = String, Path, description = "Consent record id")),
    request_body = ConsentDecisionPayload,
    responses(
        (status = 200, description = "Decision recorded", body = ConsentRecordResponse),
        (status = 404, description = "Unknown consent request", body = ErrorResponse),
        (status = 409, description = "Already decided", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "consents"
)]
fn respond_consent_doc() {}

#[utoipa::path(
    post,
    path = "/api/telemedicine/sessions/{session_id}/messages",
    params(("session_id" = String, Path, description = "External session id")),
    request_body = SendMessagePayload,
    responses(
        (status = 201, description = "Message stored encrypted", body = MessageResponse),
        (status = 403, description = "Chat disabled", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "channel"
)]
fn send_message_doc() {}

#[utoipa::path(
    get,
    path = "/api/telemedicine/sessions/{session_id}/messages",
    params(("session_id" = String, Path, description = "External session id")),
    responses(
        (status = 200, description = "Messages, decrypted, soft-deleted excluded", body = [MessageResponse]),
        (status = 500, description = "Undecryptable message", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "channel"
)]
fn list_messages_doc() {}

#[utoipa::path(
    post,
    path = "/api/telemedicine/sessions/{session_id}/files",
    params(("session_id" = String, Path, description = "External session id")),
    request_body = UploadFilePayload,
    responses(
        (status = 201, description = "File metadata stored", body = SharedFileResponse),
        (status = 403, description = "File sharing disabled", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "channel"
)]
fn upload_file_doc() {}

#[utoipa::path(
    get,
    path = "/api/telemedicine/sessions/{session_id}/analytics",
    params(("session_id" = String, Path, description = "External session id")),
    responses(
        (status = 200, description = "Per-session analytics", body = SessionAnalytics)
    ),
    security(("bearer_auth" = [])),
    tag = "analytics"
)]
fn get_analytics_doc() {}

#[utoipa::path(
    get,
    path = "/api/telemedicine/sessions/patient-link/{token}",
    params(("token" = String, Path, description = "Signed patient link token")),
    responses(
        (status = 200, description = "Session bound to the link", body = SessionResponse),
        (status = 400, description = "Malformed link", body = ErrorResponse),
        (status = 410, description = "Expired link", body = ErrorResponse)
    ),
    tag = "sessions"
)]
fn resolve_patient_link_doc() {}
