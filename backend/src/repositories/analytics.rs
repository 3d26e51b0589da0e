//! Analytics repository. One row per session; recompute replaces the derived
//! columns while preserving previously backfilled satisfaction ratings.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::analytics::SessionAnalytics;
use crate::models::session::ParticipantRole;

const SELECT_COLUMNS: &str = "id, session_id, duration_minutes, participants_count, \
     messages_count, files_shared_count, technical_issues_count, reconnections_count, \
     doctor_join_time, doctor_leave_time, doctor_active_minutes, patient_join_time, \
     patient_leave_time, patient_active_minutes, patient_satisfaction_rating, \
     doctor_satisfaction_rating, computed_at";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalyticsRepositoryTrait: Send + Sync {
    /// Insert or replace the analytics row for a session.
    async fn replace(
        &self,
        db: &PgPool,
        analytics: &SessionAnalytics,
    ) -> Result<SessionAnalytics, AppError>;

    async fn find_by_session(
        &self,
        db: &PgPool,
        session_row_id: &str,
    ) -> Result<Option<SessionAnalytics>, AppError>;

    /// Backfill a satisfaction rating. Returns false when no row exists yet.
    async fn set_satisfaction(
        &self,
        db: &PgPool,
        session_row_id: &str,
        role: ParticipantRole,
        rating: i32,
    ) -> Result<bool, AppError>;
}

/// Concrete implementation of AnalyticsRepositoryTrait.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnalyticsRepository;

impl AnalyticsRepository {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AnalyticsRepositoryTrait for AnalyticsRepository {
    async fn replace(
        &self,
        db: &PgPool,
        analytics: &SessionAnalytics,
    ) -> Result<SessionAnalytics, AppError> {
        let query = format!(
            "INSERT INTO telemedicine_analytics \
             (id, session_id, duration_minutes, participants_count, messages_count, \
              files_shared_count, technical_issues_count, reconnections_count, \
              doctor_join_time, doctor_leave_time, doctor_active_minutes, patient_join_time, \
              patient_leave_time, patient_active_minutes, patient_satisfaction_rating, \
              doctor_satisfaction_rating, computed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             ON CONFLICT (session_id) DO UPDATE SET \
               duration_minutes = EXCLUDED.duration_minutes, \
               participants_count = EXCLUDED.participants_count, \
               messages_count = EXCLUDED.messages_count, \
               files_shared_count = EXCLUDED.files_shared_count, \
               technical_issues_count = EXCLUDED.technical_issues_count, \
               reconnections_count = EXCLUDED.reconnections_count, \
               doctor_join_time = EXCLUDED.doctor_join_time, \
               doctor_leave_time = EXCLUDED.doctor_leave_time, \
               doctor_active_minutes = EXCLUDED.doctor_active_minutes, \
               patient_join_time = EXCLUDED.patient_join_time, \
               patient_leave_time = EXCLUDED.patient_leave_time, \
               patient_active_minutes = EXCLUDED.patient_active_minutes, \
               patient_satisfaction_rating = COALESCE( \
                   telemedicine_analytics.patient_satisfaction_rating, \
                   EXCLUDED.patient_satisfaction_rating), \
               doctor_satisfaction_rating = COALESCE( \
                   telemedicine_analytics.doctor_satisfaction_rating, \
                   EXCLUDED.doctor_satisfaction_rating), \
               computed_at = EXCLUDED.computed_at \
             RETURNING {}",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, SessionAnalytics>(&query)
            .bind(&analytics.id)
            .bind(&analytics.session_id)
            .bind(analytics.duration_minutes)
            .bind(analytics.participants_count)
            .bind(analytics.messages_count)
            .bind(analytics.files_shared_count)
            .bind(analytics.technical_issues_count)
            .bind(analytics.reconnections_count)
            .bind(analytics.doctor_join_time)
            .bind(analytics.doctor_leave_time)
            .bind(analytics.doctor_active_minutes)
            .bind(analytics.patient_join_time)
            .bind(analytics.patient_leave_time)
            .bind(analytics.patient_active_minutes)
            .bind(analytics.patient_satisfaction_rating)
            .bind(analytics.doctor_satisfaction_rating)
            .bind(analytics.computed_at)
            .fetch_one(db)
            .await?;
        Ok(row)
    }

    async fn find_by_session(
        &self,
        db: &PgPool,
        session_row_id: &str,
    ) -> Result<Option<SessionAnalytics>, AppError> {
        let query = format!(
            "SELECT {} FROM telemedicine_analytics WHERE session_id = $1",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, SessionAnalytics>(&query)
            .bind(session_row_id)
            .fetch_optional(db)
            .await?;
        Ok(row)
    }

    async fn set_satisfaction(
        &self,
        db: &PgPool,
        session_row_id: &str,
        role: ParticipantRole,
        rating: i32,
    ) -> Result<bool, AppError> {
        let column = match role {
            ParticipantRole::Doctor => "doctor_satisfaction_rating",
            ParticipantRole::Patient => "patient_satisfaction_rating",
        };
        let query = format!(
            "UPDATE telemedicine_analytics SET {} = $2 WHERE session_id = $1",
            column
        );
        let result = sqlx::query(&query)
            .bind(session_row_id)
            .bind(rating)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
