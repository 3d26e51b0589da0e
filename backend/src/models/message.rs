//! Chat messages carried over the encrypted channel.
//!
//! Content is ciphertext at rest; plaintext exists only in memory while a
//! request is being served.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::models::session::ParticipantRole;
use crate::types::MessageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    Doctor,
    Patient,
    System,
}

impl From<ParticipantRole> for SenderRole {
    fn from(role: ParticipantRole) -> Self {
        match role {
            ParticipantRole::Doctor => SenderRole::Doctor,
            ParticipantRole::Patient => SenderRole::Patient,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    File,
    System,
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Text
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Message {
    pub id: MessageId,
    /// Session row id.
    pub session_id: String,
    pub sender_id: Uuid,
    pub sender_role: SenderRole,
    pub message_type: MessageType,
    /// Ciphertext envelope at rest.
    pub content: String,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub is_encrypted: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SendMessagePayload {
    #[validate(length(min = 1, max = 10000))]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    pub file_url: Option<String>,
    #[validate(length(max = 255))]
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, IntoParams, ToSchema)]
pub struct MessageListQuery {
    /// Maximum number of messages to return (default: 50, max: 200).
    #[serde(default = "default_message_limit")]
    pub limit: i64,
}

fn default_message_limit() -> i64 {
    50
}

impl MessageListQuery {
    pub fn limit(&self) -> i64 {
        self.limit.clamp(1, 200)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MessageResponse {
    #[schema(value_type = String)]
    pub id: MessageId,
    pub session_id: String,
    pub sender_id: Uuid,
    pub sender_role: SenderRole,
    pub message_type: MessageType,
    /// Decrypted content.
    pub content: String,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MessageResponse {
    /// Builds the response view from a stored row and its decrypted content.
    pub fn from_decrypted(message: Message, content: String) -> Self {
        Self {
            id: message.id,
            session_id: message.session_id,
            sender_id: message.sender_id,
            sender_role: message.sender_role,
            message_type: message.message_type,
            content,
            file_url: message.file_url,
            file_name: message.file_name,
            file_size: message.file_size,
            is_deleted: message.is_deleted,
            deleted_at: message.deleted_at,
            created_at: message.created_at,
        }
    }
}
