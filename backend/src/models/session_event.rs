//! Presence history for a session: one row per join or leave.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::session::ParticipantRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionEventType {
    Joined,
    Left,
}

#[derive(Debug, Clone, FromRow)]
pub struct SessionEvent {
    pub id: String,
    /// Session row id.
    pub session_id: String,
    pub participant_key: String,
    pub role: ParticipantRole,
    pub event_type: SessionEventType,
    pub occurred_at: DateTime<Utc>,
}

impl SessionEvent {
    pub fn new(
        session_row_id: &str,
        participant_key: &str,
        role: ParticipantRole,
        event_type: SessionEventType,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_row_id.to_string(),
            participant_key: participant_key.to_string(),
            role,
            event_type,
            occurred_at,
        }
    }
}
