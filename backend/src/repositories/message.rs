//! Message repository.
//!
//! Messages are soft-deleted only; direct-id lookup keeps deleted rows
//! reachable for audit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::message::Message;
use crate::types::MessageId;

const SELECT_COLUMNS: &str = "id, session_id, sender_id, sender_role, message_type, content, \
     file_url, file_name, file_size, is_encrypted, is_deleted, deleted_at, created_at";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepositoryTrait: Send + Sync {
    /// Persist a new message (content already encrypted).
    async fn insert(&self, db: &PgPool, message: &Message) -> Result<Message, AppError>;

    /// Most recent non-deleted messages for a session.
    async fn list_recent(
        &self,
        db: &PgPool,
        session_row_id: &str,
        limit: i64,
    ) -> Result<Vec<Message>, AppError>;

    /// Direct-id fetch; includes soft-deleted rows for audit.
    async fn find_by_id(&self, db: &PgPool, id: MessageId) -> Result<Option<Message>, AppError>;

    /// Soft-delete. Returns false when already deleted or missing.
    async fn soft_delete(
        &self,
        db: &PgPool,
        id: MessageId,
        deleted_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Total messages ever sent in a session, deleted ones included.
    async fn count_for_session(&self, db: &PgPool, session_row_id: &str)
        -> Result<i64, AppError>;
}

/// Concrete implementation of MessageRepositoryTrait.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageRepository;

impl MessageRepository {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessageRepositoryTrait for MessageRepository {
    async fn insert(&self, db: &PgPool, message: &Message) -> Result<Message, AppError> {
        let query = format!(
            "INSERT INTO telemedicine_messages \
             (id, session_id, sender_id, sender_role, message_type, content, file_url, \
              file_name, file_size, is_encrypted, is_deleted, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {}",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, Message>(&query)
            .bind(message.id)
            .bind(&message.session_id)
            .bind(message.sender_id)
            .bind(message.sender_role)
            .bind(message.message_type)
            .bind(&message.content)
            .bind(&message.file_url)
            .bind(&message.file_name)
            .bind(message.file_size)
            .bind(message.is_encrypted)
            .bind(message.is_deleted)
            .bind(message.deleted_at)
            .fetch_one(db)
            .await?;
        Ok(row)
    }

    async fn list_recent(
        &self,
        db: &PgPool,
        session_row_id: &str,
        limit: i64,
    ) -> Result<Vec<Message>, AppError> {
        let query = format!(
            "SELECT {} FROM telemedicine_messages \
             WHERE session_id = $1 AND is_deleted = FALSE \
             ORDER BY created_at DESC, id DESC LIMIT $2",
            SELECT_COLUMNS
        );
        let rows = sqlx::query_as::<_, Message>(&query)
            .bind(session_row_id)
            .bind(limit)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }

    async fn find_by_id(&self, db: &PgPool, id: MessageId) -> Result<Option<Message>, AppError> {
        let query = format!(
            "SELECT {} FROM telemedicine_messages WHERE id = $1",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, Message>(&query)
            .bind(id)
            .fetch_optional(db)
            .await?;
        Ok(row)
    }

    async fn soft_delete(
        &self,
        db: &PgPool,
        id: MessageId,
        deleted_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE telemedicine_messages \
             SET is_deleted = TRUE, deleted_at = $2 \
             WHERE id = $1 AND is_deleted = FALSE",
        )
        .bind(id)
        .bind(deleted_at)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_for_session(
        &self,
        db: &PgPool,
        session_row_id: &str,
    ) -> Result<i64, AppError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM telemedicine_messages WHERE session_id = $1")
                .bind(session_row_id)
                .fetch_one(db)
                .await?;
        Ok(count)
    }
}
