//! Per-session analytics, derived once at session end and replaceable on
//! recompute. Satisfaction ratings are the only post-hoc mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use crate::models::session::ParticipantRole;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct SessionAnalytics {
    pub id: String,
    /// Session row id; unique, so recompute replaces.
    pub session_id: String,
    pub duration_minutes: Option<i64>,
    pub participants_count: i64,
    pub messages_count: i64,
    pub files_shared_count: i64,
    pub technical_issues_count: i64,
    pub reconnections_count: i64,
    pub doctor_join_time: Option<DateTime<Utc>>,
    pub doctor_leave_time: Option<DateTime<Utc>>,
    pub doctor_active_minutes: Option<i64>,
    pub patient_join_time: Option<DateTime<Utc>>,
    pub patient_leave_time: Option<DateTime<Utc>>,
    pub patient_active_minutes: Option<i64>,
    pub patient_satisfaction_rating: Option<i32>,
    pub doctor_satisfaction_rating: Option<i32>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SatisfactionPayload {
    pub role: ParticipantRole,
    #[validate(range(min = 1, max = 5))]
    pub rating: i32,
}
