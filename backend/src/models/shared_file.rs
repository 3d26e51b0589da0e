//! Metadata for files shared during a session. The bytes themselves live in
//! an external blob store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::types::FileId;

#[derive(Debug, Clone, FromRow)]
pub struct SharedFile {
    pub id: FileId,
    /// Session row id.
    pub session_id: String,
    pub uploaded_by: Uuid,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub file_type: String,
    pub mime_type: Option<String>,
    pub is_encrypted: bool,
    /// Reference to the (encrypted) per-file key, not the key itself.
    pub encryption_key_ref: Option<String>,
    /// Visible to all session participants when true, uploader-only otherwise.
    pub is_public: bool,
    pub access_expires_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SharedFile {
    /// Whether `viewer` may see this file at `now`. Expiry is evaluated
    /// lazily; rows are never rewritten by listing.
    pub fn accessible_by(&self, viewer: Uuid, now: DateTime<Utc>) -> bool {
        let unexpired = self.access_expires_at.map(|exp| exp > now).unwrap_or(true);
        unexpired && (self.is_public || self.uploaded_by == viewer)
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UploadFilePayload {
    #[validate(length(min = 1, max = 255))]
    pub file_name: String,
    #[validate(length(min = 1, max = 500))]
    pub file_path: String,
    #[validate(range(min = 1))]
    pub file_size: i64,
    #[validate(length(min = 1, max = 100))]
    pub file_type: String,
    #[validate(length(max = 100))]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    pub access_expires_at: Option<DateTime<Utc>>,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SharedFileResponse {
    #[schema(value_type = String)]
    pub id: FileId,
    pub session_id: String,
    pub uploaded_by: Uuid,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub file_type: String,
    pub mime_type: Option<String>,
    pub is_encrypted: bool,
    pub is_public: bool,
    pub access_expires_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<SharedFile> for SharedFileResponse {
    fn from(file: SharedFile) -> Self {
        Self {
            id: file.id,
            session_id: file.session_id,
            uploaded_by: file.uploaded_by,
            file_name: file.file_name,
            file_path: file.file_path,
            file_size: file.file_size,
            file_type: file.file_type,
            mime_type: file.mime_type,
            is_encrypted: file.is_encrypted,
            is_public: file.is_public,
            access_expires_at: file.access_expires_at,
            description: file.description,
            created_at: file.created_at,
        }
    }
}
