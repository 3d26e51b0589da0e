//! Capability-specific patient consent records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use crate::types::{ConsentId, PatientId};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConsentType {
    Recording,
    ScreenSharing,
    DataSharing,
}

impl ConsentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentType::Recording => "recording",
            ConsentType::ScreenSharing => "screen_sharing",
            ConsentType::DataSharing => "data_sharing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    Pending,
    Granted,
    Denied,
    /// Informational label written by a maintenance pass; capability checks
    /// evaluate expiry lazily and never depend on this value being set.
    Expired,
}

#[derive(Debug, Clone, FromRow)]
pub struct ConsentRecord {
    pub id: ConsentId,
    /// Session row id, not the external session id.
    pub session_id: String,
    pub patient_id: PatientId,
    pub consent_type: ConsentType,
    pub status: ConsentStatus,
    pub consent_text: String,
    pub consent_version: String,
    pub granted: Option<bool>,
    pub granted_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConsentRecord {
    /// A grant is usable while unexpired; expiry is checked lazily at read
    /// time so historical rows are never mutated by capability checks.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ConsentStatus::Granted
            && self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RequestConsentPayload {
    pub consent_type: ConsentType,
    #[validate(length(min = 1, max = 10000))]
    pub consent_text: String,
    #[validate(length(min = 1, max = 100))]
    pub consent_version: String,
    /// Hours until the consent lapses; absent means no expiry.
    #[validate(range(min = 1, max = 8760))]
    pub ttl_hours: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ConsentDecisionPayload {
    pub granted: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConsentRecordResponse {
    #[schema(value_type = String)]
    pub id: ConsentId,
    pub session_id: String,
    #[schema(value_type = String)]
    pub patient_id: PatientId,
    pub consent_type: ConsentType,
    pub status: ConsentStatus,
    pub consent_text: String,
    pub consent_version: String,
    pub granted: Option<bool>,
    pub granted_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<ConsentRecord> for ConsentRecordResponse {
    fn from(record: ConsentRecord) -> Self {
        Self {
            id: record.id,
            session_id: record.session_id,
            patient_id: record.patient_id,
            consent_type: record.consent_type,
            status: record.status,
            consent_text: record.consent_text,
            consent_version: record.consent_version,
            granted: record.granted,
            granted_at: record.granted_at,
            ip_address: record.ip_address,
            user_agent: record.user_agent,
            expires_at: record.expires_at,
            created_at: record.created_at,
        }
    }
}
