//! Per-session analytics derived from presence events and stored counters.
//!
//! `aggregate` is pure: the same session row, event history and counts
//! always produce the same metrics, so recompute is idempotent and replaces
//! the stored row instead of appending.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::connection::DbPool;
use crate::error::AppError;
use crate::models::analytics::SessionAnalytics;
use crate::models::session::{ParticipantRole, Session};
use crate::models::session_event::{SessionEvent, SessionEventType};
use crate::repositories::{
    AnalyticsRepositoryTrait, FileRepositoryTrait, MessageRepositoryTrait,
    SessionEventRepositoryTrait, SessionRepositoryTrait,
};

#[derive(Clone)]
pub struct AnalyticsService {
    pool: DbPool,
    sessions: Arc<dyn SessionRepositoryTrait>,
    events: Arc<dyn SessionEventRepositoryTrait>,
    messages: Arc<dyn MessageRepositoryTrait>,
    files: Arc<dyn FileRepositoryTrait>,
    analytics: Arc<dyn AnalyticsRepositoryTrait>,
}

impl AnalyticsService {
    pub fn new(
        pool: DbPool,
        sessions: Arc<dyn SessionRepositoryTrait>,
        events: Arc<dyn SessionEventRepositoryTrait>,
        messages: Arc<dyn MessageRepositoryTrait>,
        files: Arc<dyn FileRepositoryTrait>,
        analytics: Arc<dyn AnalyticsRepositoryTrait>,
    ) -> Self {
        Self {
            pool,
            sessions,
            events,
            messages,
            files,
            analytics,
        }
    }

    async fn load_session(&self, session_id: &str) -> Result<Session, AppError> {
        self.sessions
            .find_by_session_id(&self.pool, session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Session not found".to_string()))
    }

    /// Derives and stores the analytics row for a session, replacing any
    /// previous computation.
    pub async fn compute(&self, session_id: &str) -> Result<SessionAnalytics, AppError> {
        let session = self.load_session(session_id).await?;
        let events = self.events.list_for_session(&self.pool, &session.id).await?;
        let message_count = self
            .messages
            .count_for_session(&self.pool, &session.id)
            .await?;
        let file_count = self.files.count_for_session(&self.pool, &session.id).await?;

        let row = aggregate(&session, &events, message_count, file_count, Utc::now());
        self.analytics.replace(&self.pool, &row).await
    }

    /// Returns the stored row, computing it first if none exists.
    pub async fn get_or_compute(&self, session_id: &str) -> Result<SessionAnalytics, AppError> {
        let session = self.load_session(session_id).await?;
        if let Some(existing) = self
            .analytics
            .find_by_session(&self.pool, &session.id)
            .await?
        {
            return Ok(existing);
        }
        self.compute(session_id).await
    }

    /// Backfills a satisfaction rating, the only post-hoc mutation of an
    /// analytics row.
    pub async fn record_satisfaction(
        &self,
        session_id: &str,
        role: ParticipantRole,
        rating: i32,
    ) -> Result<(), AppError> {
        let session = self.load_session(session_id).await?;
        let updated = self
            .analytics
            .set_satisfaction(&self.pool, &session.id, role, rating)
            .await?;
        if !updated {
            self.compute(session_id).await?;
            let updated = self
                .analytics
                .set_satisfaction(&self.pool, &session.id, role, rating)
                .await?;
            if !updated {
                return Err(AppError::InternalServerError(anyhow::anyhow!(
                    "analytics row missing after compute"
                )));
            }
        }
        Ok(())
    }
}

/// Pure derivation of the analytics row from its inputs.
pub fn aggregate(
    session: &Session,
    events: &[SessionEvent],
    message_count: i64,
    file_count: i64,
    computed_at: DateTime<Utc>,
) -> SessionAnalytics {
    let duration_minutes = match (session.actual_start, session.actual_end) {
        (Some(start), Some(end)) => Some((end - start).num_minutes().max(0)),
        _ => None,
    };

    let joined: Vec<&SessionEvent> = events
        .iter()
        .filter(|e| e.event_type == SessionEventType::Joined)
        .collect();
    let distinct_participants: HashSet<&str> =
        joined.iter().map(|e| e.participant_key.as_str()).collect();
    let participants_count = distinct_participants.len() as i64;
    let reconnections_count = (joined.len() as i64 - participants_count).max(0);

    let technical_issues_count = session
        .technical_issues
        .as_ref()
        .and_then(|issues| issues.0.as_array().map(|a| a.len() as i64))
        .unwrap_or(0);

    let doctor = role_presence(events, ParticipantRole::Doctor, session.actual_end);
    let patient = role_presence(events, ParticipantRole::Patient, session.actual_end);

    SessionAnalytics {
        id: Uuid::new_v4().to_string(),
        session_id: session.id.clone(),
        duration_minutes,
        participants_count,
        messages_count: message_count,
        files_shared_count: file_count,
        technical_issues_count,
        reconnections_count,
        doctor_join_time: doctor.join_time,
        doctor_leave_time: doctor.leave_time,
        doctor_active_minutes: doctor.active_minutes,
        patient_join_time: patient.join_time,
        patient_leave_time: patient.leave_time,
        patient_active_minutes: patient.active_minutes,
        patient_satisfaction_rating: None,
        doctor_satisfaction_rating: None,
        computed_at,
    }
}

struct RolePresence {
    join_time: Option<DateTime<Utc>>,
    leave_time: Option<DateTime<Utc>>,
    active_minutes: Option<i64>,
}

/// Walks the event history for one role, pairing joins with leaves. An open
/// interval at the end is closed by the session's actual end, if any.
fn role_presence(
    events: &[SessionEvent],
    role: ParticipantRole,
    session_end: Option<DateTime<Utc>>,
) -> RolePresence {
    let mut join_time = None;
    let mut leave_time = None;
    let mut active = chrono::Duration::zero();
    let mut open_join: Option<DateTime<Utc>> = None;
    let mut seen = false;

    for event in events.iter().filter(|e| e.role == role) {
        seen = true;
        match event.event_type {
            SessionEventType::Joined => {
                if join_time.is_none() {
                    join_time = Some(event.occurred_at);
                }
                if open_join.is_none() {
                    open_join = Some(event.occurred_at);
                }
            }
            SessionEventType::Left => {
                leave_time = Some(event.occurred_at);
                if let Some(start) = open_join.take() {
                    let delta = event.occurred_at - start;
                    if delta > chrono::Duration::zero() {
                        active += delta;
                    }
                }
            }
        }
    }

    if let (Some(start), Some(end)) = (open_join, session_end) {
        let delta = end - start;
        if delta > chrono::Duration::zero() {
            active += delta;
        }
    }

    RolePresence {
        join_time,
        leave_time,
        active_minutes: seen.then(|| active.num_minutes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::SessionStatus;
    use crate::models::session_event::SessionEventType;
    use crate::repositories::{
        MockAnalyticsRepositoryTrait, MockFileRepositoryTrait, MockMessageRepositoryTrait,
        MockSessionEventRepositoryTrait, MockSessionRepositoryTrait,
    };
    use crate::test_support::{lazy_pool, session_fixture};
    use chrono::Duration;
    use sqlx::types::Json;

    fn event(
        session: &Session,
        key: &str,
        role: ParticipantRole,
        event_type: SessionEventType,
        at: DateTime<Utc>,
    ) -> SessionEvent {
        SessionEvent::new(&session.id, key, role, event_type, at)
    }

    fn completed_session() -> Session {
        let mut session = session_fixture(SessionStatus::Completed);
        let start = Utc::now() - Duration::minutes(45);
        session.actual_start = Some(start);
        session.actual_end = Some(start + Duration::minutes(30));
        session
    }

    #[test]
    fn aggregate_is_deterministic_for_identical_inputs() {
        let session = completed_session();
        let start = session.actual_start.expect("start");
        let doctor_key = format!("doctor_{}", session.doctor_id);
        let patient_key = format!("patient_{}", session.patient_id);
        let events = vec![
            event(&session, &doctor_key, ParticipantRole::Doctor, SessionEventType::Joined, start),
            event(
                &session,
                &patient_key,
                ParticipantRole::Patient,
                SessionEventType::Joined,
                start + Duration::minutes(2),
            ),
            event(
                &session,
                &patient_key,
                ParticipantRole::Patient,
                SessionEventType::Left,
                start + Duration::minutes(28),
            ),
            event(
                &session,
                &doctor_key,
                ParticipantRole::Doctor,
                SessionEventType::Left,
                start + Duration::minutes(30),
            ),
        ];
        let now = Utc::now();

        let mut first = aggregate(&session, &events, 7, 2, now);
        let second = aggregate(&session, &events, 7, 2, now);
        first.id = second.id.clone();
        assert_eq!(first, second);
    }

    #[test]
    fn aggregate_derives_counts_and_presence() {
        let session = completed_session();
        let start = session.actual_start.expect("start");
        let doctor_key = format!("doctor_{}", session.doctor_id);
        let patient_key = format!("patient_{}", session.patient_id);
        let events = vec![
            event(&session, &doctor_key, ParticipantRole::Doctor, SessionEventType::Joined, start),
            event(
                &session,
                &patient_key,
                ParticipantRole::Patient,
                SessionEventType::Joined,
                start + Duration::minutes(5),
            ),
            // Patient drops and reconnects once.
            event(
                &session,
                &patient_key,
                ParticipantRole::Patient,
                SessionEventType::Left,
                start + Duration::minutes(10),
            ),
            event(
                &session,
                &patient_key,
                ParticipantRole::Patient,
                SessionEventType::Joined,
                start + Duration::minutes(12),
            ),
            event(
                &session,
                &patient_key,
                ParticipantRole::Patient,
                SessionEventType::Left,
                start + Duration::minutes(30),
            ),
        ];

        let row = aggregate(&session, &events, 4, 1, Utc::now());

        assert_eq!(row.duration_minutes, Some(30));
        assert_eq!(row.participants_count, 2);
        assert_eq!(row.reconnections_count, 1);
        assert_eq!(row.messages_count, 4);
        assert_eq!(row.files_shared_count, 1);
        assert_eq!(row.patient_join_time, Some(start + Duration::minutes(5)));
        assert_eq!(row.patient_leave_time, Some(start + Duration::minutes(30)));
        // 5..10 plus 12..30.
        assert_eq!(row.patient_active_minutes, Some(23));
        // Doctor never left; the open interval closes at session end.
        assert_eq!(row.doctor_active_minutes, Some(30));
        assert!(row.patient_satisfaction_rating.is_none());
    }

    #[test]
    fn aggregate_handles_no_show_sessions() {
        let mut session = session_fixture(SessionStatus::Completed);
        session.actual_start = None;
        session.actual_end = Some(Utc::now());

        let row = aggregate(&session, &[], 0, 0, Utc::now());

        assert_eq!(row.duration_minutes, None);
        assert_eq!(row.participants_count, 0);
        assert_eq!(row.reconnections_count, 0);
        assert!(row.doctor_join_time.is_none());
        assert!(row.doctor_active_minutes.is_none());
    }

    #[test]
    fn aggregate_counts_technical_issues() {
        let mut session = completed_session();
        session.technical_issues = Some(Json(serde_json::json!([
            {"description": "echo on patient side"},
            {"description": "video freeze"}
        ])));

        let row = aggregate(&session, &[], 0, 0, Utc::now());
        assert_eq!(row.technical_issues_count, 2);
    }

    #[tokio::test]
    async fn compute_replaces_the_stored_row() {
        let session = completed_session();
        let mut sessions = MockSessionRepositoryTrait::new();
        {
            let session = session.clone();
            sessions
                .expect_find_by_session_id()
                .returning(move |_, _| Ok(Some(session.clone())));
        }
        let mut events = MockSessionEventRepositoryTrait::new();
        events
            .expect_list_for_session()
            .returning(|_, _| Ok(Vec::new()));
        let mut messages = MockMessageRepositoryTrait::new();
        messages
            .expect_count_for_session()
            .returning(|_, _| Ok(3));
        let mut files = MockFileRepositoryTrait::new();
        files.expect_count_for_session().returning(|_, _| Ok(1));
        let mut analytics = MockAnalyticsRepositoryTrait::new();
        analytics
            .expect_replace()
            .withf(|_, row| {
                row.session_id == "row-1" && row.messages_count == 3 && row.files_shared_count == 1
            })
            .times(1)
            .returning(|_, row| Ok(row.clone()));

        let service = AnalyticsService::new(
            lazy_pool(),
            Arc::new(sessions),
            Arc::new(events),
            Arc::new(messages),
            Arc::new(files),
            Arc::new(analytics),
        );
        let row = service.compute("tm_0123456789ab").await.expect("compute");
        assert_eq!(row.duration_minutes, Some(30));
    }

    #[tokio::test]
    async fn satisfaction_backfill_computes_row_when_absent() {
        let session = completed_session();
        let mut sessions = MockSessionRepositoryTrait::new();
        {
            let session = session.clone();
            sessions
                .expect_find_by_session_id()
                .returning(move |_, _| Ok(Some(session.clone())));
        }
        let mut events = MockSessionEventRepositoryTrait::new();
        events
            .expect_list_for_session()
            .returning(|_, _| Ok(Vec::new()));
        let mut messages = MockMessageRepositoryTrait::new();
        messages.expect_count_for_session().returning(|_, _| Ok(0));
        let mut files = MockFileRepositoryTrait::new();
        files.expect_count_for_session().returning(|_, _| Ok(0));

        let mut analytics = MockAnalyticsRepositoryTrait::new();
        let mut first_attempt = true;
        analytics
            .expect_set_satisfaction()
            .times(2)
            .returning(move |_, _, _, _| {
                if first_attempt {
                    first_attempt = false;
                    Ok(false)
                } else {
                    Ok(true)
                }
            });
        analytics
            .expect_replace()
            .times(1)
            .returning(|_, row| Ok(row.clone()));

        let service = AnalyticsService::new(
            lazy_pool(),
            Arc::new(sessions),
            Arc::new(events),
            Arc::new(messages),
            Arc::new(files),
            Arc::new(analytics),
        );
        service
            .record_satisfaction("tm_0123456789ab", ParticipantRole::Patient, 5)
            .await
            .expect("backfill");
    }
}
