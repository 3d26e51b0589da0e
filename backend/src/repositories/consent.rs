//! Consent record repository.
//!
//! The ledger is append-mostly: decisions update a pending row exactly once,
//! and capability checks never write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::consent::{ConsentRecord, ConsentStatus};
use crate::types::ConsentId;

const SELECT_COLUMNS: &str = "id, session_id, patient_id, consent_type, status, consent_text, \
     consent_version, granted, granted_at, ip_address, user_agent, expires_at, created_at, \
     updated_at";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsentRepositoryTrait: Send + Sync {
    /// Persist a new consent request.
    async fn create(&self, db: &PgPool, record: &ConsentRecord) -> Result<ConsentRecord, AppError>;

    /// Find a consent record by id.
    async fn find_by_id(
        &self,
        db: &PgPool,
        id: ConsentId,
    ) -> Result<Option<ConsentRecord>, AppError>;

    /// All consent records for a session, newest first.
    async fn list_for_session(
        &self,
        db: &PgPool,
        session_row_id: &str,
    ) -> Result<Vec<ConsentRecord>, AppError>;

    /// Record a decision on a pending request. Returns None when the record
    /// is missing or already decided, so a race loser cannot overwrite.
    async fn decide(
        &self,
        db: &PgPool,
        id: ConsentId,
        status: ConsentStatus,
        granted: bool,
        granted_at: DateTime<Utc>,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<Option<ConsentRecord>, AppError>;
}

/// Concrete implementation of ConsentRepositoryTrait.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsentRepository;

impl ConsentRepository {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConsentRepositoryTrait for ConsentRepository {
    async fn create(&self, db: &PgPool, record: &ConsentRecord) -> Result<ConsentRecord, AppError> {
        let query = format!(
            "INSERT INTO telemedicine_consents \
             (id, session_id, patient_id, consent_type, status, consent_text, consent_version, \
              granted, granted_at, ip_address, user_agent, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {}",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, ConsentRecord>(&query)
            .bind(record.id)
            .bind(&record.session_id)
            .bind(record.patient_id)
            .bind(record.consent_type)
            .bind(record.status)
            .bind(&record.consent_text)
            .bind(&record.consent_version)
            .bind(record.granted)
            .bind(record.granted_at)
            .bind(&record.ip_address)
            .bind(&record.user_agent)
            .bind(record.expires_at)
            .fetch_one(db)
            .await?;
        Ok(row)
    }

    async fn find_by_id(
        &self,
        db: &PgPool,
        id: ConsentId,
    ) -> Result<Option<ConsentRecord>, AppError> {
        let query = format!(
            "SELECT {} FROM telemedicine_consents WHERE id = $1",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, ConsentRecord>(&query)
            .bind(id)
            .fetch_optional(db)
            .await?;
        Ok(row)
    }

    async fn list_for_session(
        &self,
        db: &PgPool,
        session_row_id: &str,
    ) -> Result<Vec<ConsentRecord>, AppError> {
        let query = format!(
            "SELECT {} FROM telemedicine_consents WHERE session_id = $1 \
             ORDER BY created_at DESC, id DESC",
            SELECT_COLUMNS
        );
        let rows = sqlx::query_as::<_, ConsentRecord>(&query)
            .bind(session_row_id)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }

    async fn decide(
        &self,
        db: &PgPool,
        id: ConsentId,
        status: ConsentStatus,
        granted: bool,
        granted_at: DateTime<Utc>,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<Option<ConsentRecord>, AppError> {
        let query = format!(
            "UPDATE telemedicine_consents \
             SET status = $2, granted = $3, granted_at = $4, ip_address = $5, user_agent = $6, \
                 updated_at = NOW() \
             WHERE id = $1 AND status = 'pending' \
             RETURNING {}",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, ConsentRecord>(&query)
            .bind(id)
            .bind(status)
            .bind(granted)
            .bind(granted_at)
            .bind(ip_address)
            .bind(user_agent)
            .fetch_optional(db)
            .await?;
        Ok(row)
    }
}
