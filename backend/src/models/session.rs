//! Telemedicine session aggregate and its request/response shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::HashMap;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::types::{DoctorId, PatientId, TenantId};

/// Version recorded for each consent type when a session is created without
/// explicit overrides.
pub const DEFAULT_CONSENT_VERSION: &str = "v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    Waiting,
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

impl SessionStatus {
    /// Terminal statuses admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Failed
        )
    }

    /// Statuses in which participants may join.
    pub fn is_joinable(&self) -> bool {
        matches!(
            self,
            SessionStatus::Scheduled | SessionStatus::Waiting | SessionStatus::InProgress
        )
    }

    /// Statuses in which the signaling relay forwards traffic.
    pub fn allows_signaling(&self) -> bool {
        matches!(self, SessionStatus::Waiting | SessionStatus::InProgress)
    }

    /// Legal edges of the session state graph.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        match (self, next) {
            (SessionStatus::Scheduled, SessionStatus::Waiting) => true,
            (SessionStatus::Waiting, SessionStatus::InProgress) => true,
            (SessionStatus::InProgress, SessionStatus::Completed) => true,
            // Ending a session nobody started is a valid no-show outcome.
            (SessionStatus::Waiting, SessionStatus::Completed) => true,
            (from, SessionStatus::Cancelled) | (from, SessionStatus::Failed) => {
                !from.is_terminal()
            }
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Waiting => "waiting",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Doctor,
    Patient,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Doctor => "doctor",
            ParticipantRole::Patient => "patient",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "doctor" => Some(ParticipantRole::Doctor),
            "patient" => Some(ParticipantRole::Patient),
            _ => None,
        }
    }
}

/// Registry key for one participant of one session, e.g. `doctor_<uuid>`.
pub fn participant_key(role: ParticipantRole, participant_id: Uuid) -> String {
    format!("{}_{}", role.as_str(), participant_id)
}

/// Splits a registry key back into role and participant id.
pub fn parse_participant_key(key: &str) -> Option<(ParticipantRole, Uuid)> {
    let (role, id) = key.split_once('_')?;
    let role = ParticipantRole::parse(role)?;
    let id = Uuid::parse_str(id).ok()?;
    Some((role, id))
}

#[derive(Debug, Clone, FromRow)]
pub struct Session {
    /// Row id; satellites reference this.
    pub id: String,
    /// Opaque external identifier, URL-safe, unique.
    pub session_id: String,
    pub tenant_id: TenantId,
    pub doctor_id: DoctorId,
    pub patient_id: PatientId,
    pub title: String,
    pub description: Option<String>,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    /// Room correlation token, encrypted at rest. Never logged.
    pub room_token: String,
    pub max_participants: i32,
    pub chat_enabled: bool,
    pub screen_sharing_enabled: bool,
    pub file_sharing_enabled: bool,
    pub recording_enabled: bool,
    pub consent_required: bool,
    pub consent_granted: bool,
    pub consent_granted_at: Option<DateTime<Utc>>,
    /// Required consent-text version per consent type; a mismatch forces
    /// re-consent.
    pub consent_versions: Json<HashMap<String, String>>,
    pub technical_issues: Option<Json<Value>>,
    pub metadata: Option<Json<Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Id of the participant bound to `role`, if any.
    pub fn bound_participant(&self, role: ParticipantRole) -> Uuid {
        match role {
            ParticipantRole::Doctor => *self.doctor_id.as_uuid(),
            ParticipantRole::Patient => *self.patient_id.as_uuid(),
        }
    }

    /// Required consent version for a consent type; defaults when unset.
    pub fn required_consent_version(&self, consent_type: &str) -> &str {
        self.consent_versions
            .get(consent_type)
            .map(String::as_str)
            .unwrap_or(DEFAULT_CONSENT_VERSION)
    }
}

pub fn default_consent_versions() -> HashMap<String, String> {
    ["recording", "screen_sharing", "data_sharing"]
        .into_iter()
        .map(|t| (t.to_string(), DEFAULT_CONSENT_VERSION.to_string()))
        .collect()
}

fn default_max_participants() -> i32 {
    2
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateSessionPayload {
    #[schema(value_type = String)]
    pub tenant_id: TenantId,
    #[schema(value_type = String)]
    pub doctor_id: DoctorId,
    #[schema(value_type = String)]
    pub patient_id: PatientId,
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    pub description: Option<String>,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    #[serde(default = "default_max_participants")]
    #[validate(range(min = 2, max = 16))]
    pub max_participants: i32,
    #[serde(default = "default_true")]
    pub chat_enabled: bool,
    #[serde(default = "default_true")]
    pub screen_sharing_enabled: bool,
    #[serde(default = "default_true")]
    pub file_sharing_enabled: bool,
    #[serde(default)]
    pub recording_enabled: bool,
    #[serde(default = "default_true")]
    pub consent_required: bool,
    /// Optional overrides for per-type consent versions.
    #[serde(default)]
    pub consent_versions: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct SessionListQuery {
    pub status: Option<SessionStatus>,
    #[param(value_type = Option<String>)]
    pub doctor_id: Option<DoctorId>,
    #[param(value_type = Option<String>)]
    pub patient_id: Option<PatientId>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionResponse {
    pub id: String,
    pub session_id: String,
    #[schema(value_type = String)]
    pub tenant_id: TenantId,
    #[schema(value_type = String)]
    pub doctor_id: DoctorId,
    #[schema(value_type = String)]
    pub patient_id: PatientId,
    pub title: String,
    pub description: Option<String>,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub max_participants: i32,
    pub chat_enabled: bool,
    pub screen_sharing_enabled: bool,
    pub file_sharing_enabled: bool,
    pub recording_enabled: bool,
    pub consent_required: bool,
    pub consent_granted: bool,
    pub consent_granted_at: Option<DateTime<Utc>>,
    pub consent_versions: HashMap<String, String>,
    #[schema(value_type = Object)]
    pub technical_issues: Option<Value>,
    #[schema(value_type = Object)]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            session_id: session.session_id,
            tenant_id: session.tenant_id,
            doctor_id: session.doctor_id,
            patient_id: session.patient_id,
            title: session.title,
            description: session.description,
            scheduled_start: session.scheduled_start,
            scheduled_end: session.scheduled_end,
            actual_start: session.actual_start,
            actual_end: session.actual_end,
            status: session.status,
            max_participants: session.max_participants,
            chat_enabled: session.chat_enabled,
            screen_sharing_enabled: session.screen_sharing_enabled,
            file_sharing_enabled: session.file_sharing_enabled,
            recording_enabled: session.recording_enabled,
            consent_required: session.consent_required,
            consent_granted: session.consent_granted,
            consent_granted_at: session.consent_granted_at,
            consent_versions: session.consent_versions.0,
            technical_issues: session.technical_issues.map(|j| j.0),
            metadata: session.metadata.map(|j| j.0),
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

/// Returned by a successful join. The room token is the decrypted
/// correlation secret; it is never persisted in plaintext and never logged.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JoinResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub room_token: String,
    pub max_participants: i32,
    pub chat_enabled: bool,
    pub screen_sharing_enabled: bool,
    pub file_sharing_enabled: bool,
    pub recording_enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct EndSessionPayload {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct TechnicalIssuePayload {
    #[validate(length(min = 1, max = 1000))]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ConsentVersionPayload {
    pub consent_type: crate::models::consent::ConsentType,
    #[validate(length(min = 1, max = 100))]
    pub version: String,
}
