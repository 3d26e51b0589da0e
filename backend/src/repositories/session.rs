//! Session repository trait for dependency injection and testing.
//!
//! Status changes go through a conditional update so concurrent transitions
//! linearize in the database: the update only succeeds if the stored status
//! still matches the expected prior state.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::session::{Session, SessionStatus};
use crate::types::{DoctorId, PatientId};

const SELECT_COLUMNS: &str = "id, session_id, tenant_id, doctor_id, patient_id, title, \
     description, scheduled_start, scheduled_end, actual_start, actual_end, status, room_token, \
     max_participants, chat_enabled, screen_sharing_enabled, file_sharing_enabled, \
     recording_enabled, consent_required, consent_granted, consent_granted_at, consent_versions, \
     technical_issues, metadata, created_at, updated_at";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionListFilters {
    pub status: Option<SessionStatus>,
    pub doctor_id: Option<DoctorId>,
    pub patient_id: Option<PatientId>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionRepositoryTrait: Send + Sync {
    /// Persist a new session and return the stored row.
    async fn create(&self, db: &PgPool, session: &Session) -> Result<Session, AppError>;

    /// Find a session by its opaque external id.
    async fn find_by_session_id(
        &self,
        db: &PgPool,
        session_id: &str,
    ) -> Result<Option<Session>, AppError>;

    /// List sessions matching the filters, newest scheduled first.
    async fn list(
        &self,
        db: &PgPool,
        filters: &SessionListFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Session>, AppError>;

    /// Count sessions matching the filters.
    async fn count(&self, db: &PgPool, filters: &SessionListFilters) -> Result<i64, AppError>;

    /// Compare-and-swap status transition. Returns false when the stored
    /// status no longer matches `from`.
    async fn transition_status(
        &self,
        db: &PgPool,
        session_id: &str,
        from: SessionStatus,
        to: SessionStatus,
        mark_start: bool,
        mark_end: bool,
    ) -> Result<bool, AppError>;

    /// Mirror a granted session-level consent onto the aggregate.
    async fn set_consent_granted(&self, db: &PgPool, row_id: &str) -> Result<(), AppError>;

    /// Shallow-merge entries into the session metadata object.
    async fn merge_metadata(
        &self,
        db: &PgPool,
        session_id: &str,
        entries: Value,
    ) -> Result<(), AppError>;

    /// Append one entry to the technical-issues log.
    async fn append_technical_issue(
        &self,
        db: &PgPool,
        session_id: &str,
        issue: Value,
    ) -> Result<(), AppError>;

    /// Update the required consent version for one consent type, forcing
    /// re-consent for records carrying older versions.
    async fn set_consent_version(
        &self,
        db: &PgPool,
        session_id: &str,
        consent_type: &str,
        version: &str,
    ) -> Result<(), AppError>;
}

/// Concrete implementation of SessionRepositoryTrait.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionRepository;

impl SessionRepository {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionRepositoryTrait for SessionRepository {
    async fn create(&self, db: &PgPool, session: &Session) -> Result<Session, AppError> {
        let query = format!(
            "INSERT INTO telemedicine_sessions \
             (id, session_id, tenant_id, doctor_id, patient_id, title, description, \
              scheduled_start, scheduled_end, actual_start, actual_end, status, room_token, \
              max_participants, chat_enabled, screen_sharing_enabled, file_sharing_enabled, \
              recording_enabled, consent_required, consent_granted, consent_granted_at, \
              consent_versions, technical_issues, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
              $18, $19, $20, $21, $22, $23, $24) \
             RETURNING {}",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, Session>(&query)
            .bind(&session.id)
            .bind(&session.session_id)
            .bind(session.tenant_id)
            .bind(session.doctor_id)
            .bind(session.patient_id)
            .bind(&session.title)
            .bind(&session.description)
            .bind(session.scheduled_start)
            .bind(session.scheduled_end)
            .bind(session.actual_start)
            .bind(session.actual_end)
            .bind(session.status)
            .bind(&session.room_token)
            .bind(session.max_participants)
            .bind(session.chat_enabled)
            .bind(session.screen_sharing_enabled)
            .bind(session.file_sharing_enabled)
            .bind(session.recording_enabled)
            .bind(session.consent_required)
            .bind(session.consent_granted)
            .bind(session.consent_granted_at)
            .bind(session.consent_versions.clone())
            .bind(session.technical_issues.clone())
            .bind(session.metadata.clone())
            .fetch_one(db)
            .await?;
        Ok(row)
    }

    async fn find_by_session_id(
        &self,
        db: &PgPool,
        session_id: &str,
    ) -> Result<Option<Session>, AppError> {
        let query = format!(
            "SELECT {} FROM telemedicine_sessions WHERE session_id = $1",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, Session>(&query)
            .bind(session_id)
            .fetch_optional(db)
            .await?;
        Ok(row)
    }

    async fn list(
        &self,
        db: &PgPool,
        filters: &SessionListFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Session>, AppError> {
        let mut builder: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(format!(
            "SELECT {} FROM telemedicine_sessions WHERE 1=1",
            SELECT_COLUMNS
        ));
        if let Some(status) = filters.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(doctor_id) = filters.doctor_id {
            builder.push(" AND doctor_id = ").push_bind(doctor_id);
        }
        if let Some(patient_id) = filters.patient_id {
            builder.push(" AND patient_id = ").push_bind(patient_id);
        }
        builder
            .push(" ORDER BY scheduled_start DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let rows = builder.build_query_as::<Session>().fetch_all(db).await?;
        Ok(rows)
    }

    async fn count(&self, db: &PgPool, filters: &SessionListFilters) -> Result<i64, AppError> {
        let mut builder: sqlx::QueryBuilder<sqlx::Postgres> =
            sqlx::QueryBuilder::new("SELECT COUNT(*) FROM telemedicine_sessions WHERE 1=1");
        if let Some(status) = filters.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(doctor_id) = filters.doctor_id {
            builder.push(" AND doctor_id = ").push_bind(doctor_id);
        }
        if let Some(patient_id) = filters.patient_id {
            builder.push(" AND patient_id = ").push_bind(patient_id);
        }
        let count: i64 = builder.build_query_scalar().fetch_one(db).await?;
        Ok(count)
    }

    async fn transition_status(
        &self,
        db: &PgPool,
        session_id: &str,
        from: SessionStatus,
        to: SessionStatus,
        mark_start: bool,
        mark_end: bool,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE telemedicine_sessions \
             SET status = $3, \
                 actual_start = CASE WHEN $4 THEN NOW() ELSE actual_start END, \
                 actual_end = CASE WHEN $5 THEN NOW() ELSE actual_end END, \
                 updated_at = NOW() \
             WHERE session_id = $1 AND status = $2",
        )
        .bind(session_id)
        .bind(from)
        .bind(to)
        .bind(mark_start)
        .bind(mark_end)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_consent_granted(&self, db: &PgPool, row_id: &str) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE telemedicine_sessions \
             SET consent_granted = TRUE, consent_granted_at = NOW(), updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(row_id)
        .execute(db)
        .await?;
        Ok(())
    }

    async fn merge_metadata(
        &self,
        db: &PgPool,
        session_id: &str,
        entries: Value,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE telemedicine_sessions \
             SET metadata = COALESCE(metadata, '{}'::jsonb) || $2::jsonb, updated_at = NOW() \
             WHERE session_id = $1",
        )
        .bind(session_id)
        .bind(entries)
        .execute(db)
        .await?;
        Ok(())
    }

    async fn append_technical_issue(
        &self,
        db: &PgPool,
        session_id: &str,
        issue: Value,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE telemedicine_sessions \
             SET technical_issues = COALESCE(technical_issues, '[]'::jsonb) || \
                 jsonb_build_array($2::jsonb), \
                 updated_at = NOW() \
             WHERE session_id = $1",
        )
        .bind(session_id)
        .bind(issue)
        .execute(db)
        .await?;
        Ok(())
    }

    async fn set_consent_version(
        &self,
        db: &PgPool,
        session_id: &str,
        consent_type: &str,
        version: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE telemedicine_sessions \
             SET consent_versions = jsonb_set(consent_versions, ARRAY[$2], to_jsonb($3::text)), \
                 updated_at = NOW() \
             WHERE session_id = $1",
        )
        .bind(session_id)
        .bind(consent_type)
        .bind(version)
        .execute(db)
        .await?;
        Ok(())
    }
}
