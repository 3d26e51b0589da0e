//! Presence-event repository feeding the analytics aggregator.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::session_event::SessionEvent;

const SELECT_COLUMNS: &str = "id, session_id, participant_key, role, event_type, occurred_at";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionEventRepositoryTrait: Send + Sync {
    async fn insert(&self, db: &PgPool, event: &SessionEvent) -> Result<(), AppError>;

    /// Full presence history for a session in chronological order.
    async fn list_for_session(
        &self,
        db: &PgPool,
        session_row_id: &str,
    ) -> Result<Vec<SessionEvent>, AppError>;
}

/// Concrete implementation of SessionEventRepositoryTrait.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionEventRepository;

impl SessionEventRepository {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionEventRepositoryTrait for SessionEventRepository {
    async fn insert(&self, db: &PgPool, event: &SessionEvent) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO telemedicine_session_events \
             (id, session_id, participant_key, role, event_type, occurred_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&event.id)
        .bind(&event.session_id)
        .bind(&event.participant_key)
        .bind(event.role)
        .bind(event.event_type)
        .bind(event.occurred_at)
        .execute(db)
        .await?;
        Ok(())
    }

    async fn list_for_session(
        &self,
        db: &PgPool,
        session_row_id: &str,
    ) -> Result<Vec<SessionEvent>, AppError> {
        let query = format!(
            "SELECT {} FROM telemedicine_session_events WHERE session_id = $1 \
             ORDER BY occurred_at ASC, id ASC",
            SELECT_COLUMNS
        );
        let rows = sqlx::query_as::<_, SessionEvent>(&query)
            .bind(session_row_id)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }
}
