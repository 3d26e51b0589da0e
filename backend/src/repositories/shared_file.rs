//! Shared-file metadata repository. Blob bytes live elsewhere.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::shared_file::SharedFile;

const SELECT_COLUMNS: &str = "id, session_id, uploaded_by, file_name, file_path, file_size, \
     file_type, mime_type, is_encrypted, encryption_key_ref, is_public, access_expires_at, \
     description, created_at";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileRepositoryTrait: Send + Sync {
    async fn insert(&self, db: &PgPool, file: &SharedFile) -> Result<SharedFile, AppError>;

    async fn list_for_session(
        &self,
        db: &PgPool,
        session_row_id: &str,
    ) -> Result<Vec<SharedFile>, AppError>;

    async fn count_for_session(&self, db: &PgPool, session_row_id: &str)
        -> Result<i64, AppError>;
}

/// Concrete implementation of FileRepositoryTrait.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileRepository;

impl FileRepository {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileRepositoryTrait for FileRepository {
    async fn insert(&self, db: &PgPool, file: &SharedFile) -> Result<SharedFile, AppError> {
        let query = format!(
            "INSERT INTO telemedicine_files \
             (id, session_id, uploaded_by, file_name, file_path, file_size, file_type, \
              mime_type, is_encrypted, encryption_key_ref, is_public, access_expires_at, \
              description) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             RETURNING {}",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, SharedFile>(&query)
            .bind(file.id)
            .bind(&file.session_id)
            .bind(file.uploaded_by)
            .bind(&file.file_name)
            .bind(&file.file_path)
            .bind(file.file_size)
            .bind(&file.file_type)
            .bind(&file.mime_type)
            .bind(file.is_encrypted)
            .bind(&file.encryption_key_ref)
            .bind(file.is_public)
            .bind(file.access_expires_at)
            .bind(&file.description)
            .fetch_one(db)
            .await?;
        Ok(row)
    }

    async fn list_for_session(
        &self,
        db: &PgPool,
        session_row_id: &str,
    ) -> Result<Vec<SharedFile>, AppError> {
        let query = format!(
            "SELECT {} FROM telemedicine_files WHERE session_id = $1 \
             ORDER BY created_at DESC, id DESC",
            SELECT_COLUMNS
        );
        let rows = sqlx::query_as::<_, SharedFile>(&query)
            .bind(session_row_id)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }

    async fn count_for_session(
        &self,
        db: &PgPool,
        session_row_id: &str,
    ) -> Result<i64, AppError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM telemedicine_files WHERE session_id = $1")
                .bind(session_row_id)
                .fetch_one(db)
                .await?;
        Ok(count)
    }
}
