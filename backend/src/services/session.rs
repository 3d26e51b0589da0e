//! Session lifecycle orchestration.
//!
//! Status transitions persist through a compare-and-swap against the stored
//! status, so concurrent operations linearize per session: exactly one of
//! two racing Start calls wins, the loser sees InvalidState. The connection
//! registry holds live transports only; joining authorizes and may flip
//! SCHEDULED to WAITING, while the WebSocket handshake attaches the actual
//! transport afterwards.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::connection::DbPool;
use crate::error::AppError;
use crate::models::session::{
    default_consent_versions, participant_key, CreateSessionPayload, JoinResponse,
    ParticipantRole, Session, SessionStatus,
};
use crate::models::session_event::{SessionEvent, SessionEventType};
use crate::realtime::protocol::ServerEnvelope;
use crate::realtime::registry::{ConnectionRegistry, OutboundSender};
use crate::repositories::{
    SessionEventRepositoryTrait, SessionListFilters, SessionRepositoryTrait,
};
use crate::services::analytics::AnalyticsService;
use crate::services::consent::ConsentService;
use crate::utils::crypto::{generate_room_secret, ChannelCrypto};

#[derive(Clone)]
pub struct SessionService {
    pool: DbPool,
    sessions: Arc<dyn SessionRepositoryTrait>,
    events: Arc<dyn SessionEventRepositoryTrait>,
    registry: Arc<dyn ConnectionRegistry>,
    consent: ConsentService,
    analytics: AnalyticsService,
    crypto: Arc<ChannelCrypto>,
}

impl SessionService {
    pub fn new(
        pool: DbPool,
        sessions: Arc<dyn SessionRepositoryTrait>,
        events: Arc<dyn SessionEventRepositoryTrait>,
        registry: Arc<dyn ConnectionRegistry>,
        consent: ConsentService,
        analytics: AnalyticsService,
        crypto: Arc<ChannelCrypto>,
    ) -> Self {
        Self {
            pool,
            sessions,
            events,
            registry,
            consent,
            analytics,
            crypto,
        }
    }

    pub async fn create(&self, payload: CreateSessionPayload) -> Result<Session, AppError> {
        if payload.scheduled_end <= payload.scheduled_start {
            return Err(AppError::BadRequest(
                "Scheduled end must be after scheduled start".to_string(),
            ));
        }

        let session_id = generate_session_id();
        let room_secret = generate_room_secret();
        let room_token = self
            .crypto
            .encrypt(&room_secret)
            .map_err(|e| AppError::InternalServerError(anyhow::Error::new(e)))?;

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.clone(),
            tenant_id: payload.tenant_id,
            doctor_id: payload.doctor_id,
            patient_id: payload.patient_id,
            title: payload.title,
            description: payload.description,
            scheduled_start: payload.scheduled_start,
            scheduled_end: payload.scheduled_end,
            actual_start: None,
            actual_end: None,
            status: SessionStatus::Scheduled,
            room_token,
            max_participants: payload.max_participants,
            chat_enabled: payload.chat_enabled,
            screen_sharing_enabled: payload.screen_sharing_enabled,
            file_sharing_enabled: payload.file_sharing_enabled,
            recording_enabled: payload.recording_enabled,
            consent_required: payload.consent_required,
            consent_granted: false,
            consent_granted_at: None,
            consent_versions: sqlx::types::Json(
                payload
                    .consent_versions
                    .unwrap_or_else(default_consent_versions),
            ),
            technical_issues: None,
            metadata: None,
            created_at: now,
            updated_at: now,
        };
        let created = self.sessions.create(&self.pool, &session).await?;
        tracing::info!(session_id = %session_id, "Created telemedicine session");
        Ok(created)
    }

    pub async fn get(&self, session_id: &str) -> Result<Session, AppError> {
        self.sessions
            .find_by_session_id(&self.pool, session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Session not found".to_string()))
    }

    pub async fn list(
        &self,
        filters: &SessionListFilters,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Session>, i64), AppError> {
        let sessions = self.sessions.list(&self.pool, filters, limit, offset).await?;
        let total = self.sessions.count(&self.pool, filters).await?;
        Ok((sessions, total))
    }

    /// Authorizes a participant and hands out the decrypted room token.
    ///
    /// The first successful join flips SCHEDULED to WAITING. The token is
    /// returned to the caller only; it is never written back in plaintext
    /// and never logged.
    pub async fn join(
        &self,
        session_id: &str,
        role: ParticipantRole,
        participant_id: Uuid,
    ) -> Result<JoinResponse, AppError> {
        let mut session = self.get(session_id).await?;

        if !session.status.is_joinable() {
            return Err(AppError::InvalidState(
                "Session is no longer available for joining".to_string(),
            ));
        }
        if session.bound_participant(role) != participant_id {
            return Err(AppError::Unauthorized(format!(
                "Participant is not the session's {}",
                role.as_str()
            )));
        }
        if role == ParticipantRole::Patient
            && session.consent_required
            && !self.consent.has_any_usable_grant(&session).await?
        {
            return Err(AppError::ConsentRequired(
                "Patient consent is required before joining".to_string(),
            ));
        }

        if session.status == SessionStatus::Scheduled {
            let flipped = self
                .sessions
                .transition_status(
                    &self.pool,
                    session_id,
                    SessionStatus::Scheduled,
                    SessionStatus::Waiting,
                    false,
                    false,
                )
                .await?;
            if flipped {
                session.status = SessionStatus::Waiting;
            } else {
                // Someone else moved the session first; re-read and re-check.
                session = self.get(session_id).await?;
                if !session.status.is_joinable() {
                    return Err(AppError::InvalidState(
                        "Session is no longer available for joining".to_string(),
                    ));
                }
            }
        }

        let room_token = self.crypto.decrypt(&session.room_token)?;

        Ok(JoinResponse {
            session_id: session.session_id,
            status: session.status,
            room_token,
            max_participants: session.max_participants,
            chat_enabled: session.chat_enabled,
            screen_sharing_enabled: session.screen_sharing_enabled,
            file_sharing_enabled: session.file_sharing_enabled,
            recording_enabled: session.recording_enabled,
        })
    }

    /// Registers a live transport after a successful join, records the
    /// presence event and announces the participant to the others.
    pub async fn attach_connection(
        &self,
        session_id: &str,
        role: ParticipantRole,
        participant_id: Uuid,
        sender: OutboundSender,
    ) -> Result<String, AppError> {
        let session = self.get(session_id).await?;
        let key = participant_key(role, participant_id);
        self.registry.register(session_id, &key, sender);

        let event = SessionEvent::new(&session.id, &key, role, SessionEventType::Joined, Utc::now());
        self.events.insert(&self.pool, &event).await?;

        self.registry.broadcast(
            session_id,
            ServerEnvelope::ParticipantJoined {
                participant_key: key.clone(),
                timestamp: event.occurred_at,
            },
            Some(&key),
        );
        Ok(key)
    }

    /// Removes a transport on disconnect. Session status is untouched: a
    /// transient drop does not destroy session state. The registry may have
    /// removed the entry already (queue-overflow disconnect); the leave is
    /// still recorded and announced.
    pub async fn detach_connection(
        &self,
        session_id: &str,
        participant_key: &str,
    ) -> Result<(), AppError> {
        self.registry.unregister(session_id, participant_key);

        let now = Utc::now();
        if let Some((role, _)) = crate::models::session::parse_participant_key(participant_key) {
            match self.get(session_id).await {
                Ok(session) => {
                    let event = SessionEvent::new(
                        &session.id,
                        participant_key,
                        role,
                        SessionEventType::Left,
                        now,
                    );
                    self.events.insert(&self.pool, &event).await?;
                }
                Err(err) => {
                    tracing::warn!(
                        session_id = %session_id,
                        error = ?err,
                        "Could not record leave event"
                    );
                }
            }
        }

        self.registry.broadcast(
            session_id,
            ServerEnvelope::ParticipantLeft {
                participant_key: participant_key.to_string(),
                timestamp: now,
            },
            Some(participant_key),
        );
        Ok(())
    }

    /// Starts a waiting session. Requires a live doctor connection, not just
    /// a historical join.
    pub async fn start(&self, session_id: &str, initiator_id: Uuid) -> Result<Session, AppError> {
        let mut session = self.get(session_id).await?;

        if session.status != SessionStatus::Waiting {
            return Err(AppError::InvalidState(
                "Session can only be started from the waiting state".to_string(),
            ));
        }

        let doctor_key = participant_key(ParticipantRole::Doctor, *session.doctor_id.as_uuid());
        if !self.registry.is_connected(session_id, &doctor_key) {
            return Err(AppError::PreconditionFailed(
                "A live doctor connection is required to start the session".to_string(),
            ));
        }

        let won = self
            .sessions
            .transition_status(
                &self.pool,
                session_id,
                SessionStatus::Waiting,
                SessionStatus::InProgress,
                true,
                false,
            )
            .await?;
        if !won {
            return Err(AppError::InvalidState(
                "Session status changed concurrently".to_string(),
            ));
        }

        session.status = SessionStatus::InProgress;
        session.actual_start = Some(Utc::now());
        tracing::info!(session_id = %session_id, initiator = %initiator_id, "Session started");
        Ok(session)
    }

    /// Ends a session. Ending from WAITING is the no-show outcome and still
    /// completes. Analytics are derived asynchronously afterwards.
    pub async fn end(&self, session_id: &str, reason: Option<String>) -> Result<Session, AppError> {
        let mut session = self.get(session_id).await?;

        if !matches!(
            session.status,
            SessionStatus::InProgress | SessionStatus::Waiting
        ) {
            return Err(AppError::InvalidState(
                "Session can only be ended while waiting or in progress".to_string(),
            ));
        }

        let won = self
            .sessions
            .transition_status(
                &self.pool,
                session_id,
                session.status,
                SessionStatus::Completed,
                false,
                true,
            )
            .await?;
        if !won {
            return Err(AppError::InvalidState(
                "Session status changed concurrently".to_string(),
            ));
        }

        if let Some(reason) = &reason {
            self.sessions
                .merge_metadata(&self.pool, session_id, json!({ "end_reason": reason }))
                .await?;
        }

        session.status = SessionStatus::Completed;
        session.actual_end = Some(Utc::now());
        tracing::info!(session_id = %session_id, "Session ended");

        let analytics = self.analytics.clone();
        let session_id_owned = session_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = analytics.compute(&session_id_owned).await {
                tracing::warn!(
                    session_id = %session_id_owned,
                    error = ?err,
                    "Failed to compute session analytics"
                );
            }
        });

        Ok(session)
    }

    /// Operator-initiated cancellation; allowed from any non-terminal state.
    pub async fn cancel(
        &self,
        session_id: &str,
        reason: Option<String>,
    ) -> Result<Session, AppError> {
        self.terminate(session_id, SessionStatus::Cancelled, reason)
            .await
    }

    /// Marks a session as failed after unrecoverable errors. Differs from
    /// cancel for reporting only.
    pub async fn fail(
        &self,
        session_id: &str,
        reason: Option<String>,
    ) -> Result<Session, AppError> {
        self.terminate(session_id, SessionStatus::Failed, reason).await
    }

    async fn terminate(
        &self,
        session_id: &str,
        to: SessionStatus,
        reason: Option<String>,
    ) -> Result<Session, AppError> {
        let mut session = self.get(session_id).await?;

        if session.status.is_terminal() {
            return Err(AppError::InvalidState(
                "Session is already in a terminal state".to_string(),
            ));
        }

        let won = self
            .sessions
            .transition_status(&self.pool, session_id, session.status, to, false, false)
            .await?;
        if !won {
            return Err(AppError::InvalidState(
                "Session status changed concurrently".to_string(),
            ));
        }

        if let Some(reason) = &reason {
            let entries = match to {
                SessionStatus::Failed => json!({ "failure_reason": reason }),
                _ => json!({ "cancel_reason": reason }),
            };
            self.sessions
                .merge_metadata(&self.pool, session_id, entries)
                .await?;
        }

        session.status = to;
        Ok(session)
    }

    /// Appends an entry to the session's technical-issue log.
    pub async fn report_issue(
        &self,
        session_id: &str,
        description: &str,
    ) -> Result<(), AppError> {
        let session = self.get(session_id).await?;
        self.sessions
            .append_technical_issue(
                &self.pool,
                &session.session_id,
                json!({
                    "description": description,
                    "reported_at": Utc::now(),
                }),
            )
            .await
    }
}

fn generate_session_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("tm_{}", &hex[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::consent::{ConsentStatus, ConsentType};
    use crate::realtime::registry::InProcessRegistry;
    use crate::repositories::{
        MockAnalyticsRepositoryTrait, MockConsentRepositoryTrait, MockFileRepositoryTrait,
        MockMessageRepositoryTrait, MockSessionEventRepositoryTrait, MockSessionRepositoryTrait,
    };
    use crate::test_support::{consent_fixture, lazy_pool, session_fixture};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct Mocks {
        sessions: MockSessionRepositoryTrait,
        events: MockSessionEventRepositoryTrait,
        consents: MockConsentRepositoryTrait,
        analytics: MockAnalyticsRepositoryTrait,
    }

    impl Default for Mocks {
        fn default() -> Self {
            Self {
                sessions: MockSessionRepositoryTrait::new(),
                events: MockSessionEventRepositoryTrait::new(),
                consents: MockConsentRepositoryTrait::new(),
                analytics: MockAnalyticsRepositoryTrait::new(),
            }
        }
    }

    fn build_service(mocks: Mocks, registry: Arc<InProcessRegistry>) -> SessionService {
        let pool = lazy_pool();
        let sessions: Arc<dyn SessionRepositoryTrait> = Arc::new(mocks.sessions);
        let consents: Arc<dyn crate::repositories::ConsentRepositoryTrait> =
            Arc::new(mocks.consents);
        let consent = ConsentService::new(pool.clone(), sessions.clone(), consents);

        let mut message_repo = MockMessageRepositoryTrait::new();
        message_repo
            .expect_count_for_session()
            .returning(|_, _| Ok(0));
        let mut file_repo = MockFileRepositoryTrait::new();
        file_repo.expect_count_for_session().returning(|_, _| Ok(0));

        let events: Arc<dyn SessionEventRepositoryTrait> = Arc::new(mocks.events);
        let analytics = AnalyticsService::new(
            pool.clone(),
            sessions.clone(),
            events.clone(),
            Arc::new(message_repo),
            Arc::new(file_repo),
            Arc::new(mocks.analytics),
        );
        let crypto = Arc::new(ChannelCrypto::new([9u8; 32]));

        SessionService::new(pool, sessions, events, registry, consent, analytics, crypto)
    }

    fn encrypted_fixture(status: SessionStatus, crypto_key: [u8; 32]) -> Session {
        let mut session = session_fixture(status);
        let crypto = ChannelCrypto::new(crypto_key);
        session.room_token = crypto.encrypt("room-secret").expect("encrypt");
        session
    }

    fn expect_session(mocks: &mut Mocks, session: &Session) {
        let session = session.clone();
        mocks
            .sessions
            .expect_find_by_session_id()
            .returning(move |_, _| Ok(Some(session.clone())));
    }

    #[tokio::test]
    async fn create_rejects_inverted_schedule() {
        let mocks = Mocks::default();
        let service = build_service(mocks, Arc::new(InProcessRegistry::new()));
        let now = Utc::now();
        let payload = CreateSessionPayload {
            tenant_id: crate::types::TenantId::new(),
            doctor_id: crate::types::DoctorId::new(),
            patient_id: crate::types::PatientId::new(),
            title: "Consultation".to_string(),
            description: None,
            scheduled_start: now,
            scheduled_end: now - chrono::Duration::hours(1),
            max_participants: 2,
            chat_enabled: true,
            screen_sharing_enabled: true,
            file_sharing_enabled: true,
            recording_enabled: false,
            consent_required: true,
            consent_versions: None,
        };
        let err = service.create(payload).await.expect_err("must fail");
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn create_encrypts_room_token_and_starts_scheduled() {
        let mut mocks = Mocks::default();
        mocks
            .sessions
            .expect_create()
            .withf(|_, session| {
                session.status == SessionStatus::Scheduled
                    && session.session_id.starts_with("tm_")
                    && session.room_token.starts_with("enc:v1:")
                    && !session.consent_granted
            })
            .returning(|_, session| Ok(session.clone()));
        let service = build_service(mocks, Arc::new(InProcessRegistry::new()));
        let now = Utc::now();
        let payload = CreateSessionPayload {
            tenant_id: crate::types::TenantId::new(),
            doctor_id: crate::types::DoctorId::new(),
            patient_id: crate::types::PatientId::new(),
            title: "Consultation".to_string(),
            description: None,
            scheduled_start: now,
            scheduled_end: now + chrono::Duration::hours(1),
            max_participants: 2,
            chat_enabled: true,
            screen_sharing_enabled: true,
            file_sharing_enabled: true,
            recording_enabled: false,
            consent_required: true,
            consent_versions: None,
        };
        let session = service.create(payload).await.expect("create");
        assert_eq!(session.status, SessionStatus::Scheduled);
    }

    #[tokio::test]
    async fn join_missing_session_is_not_found() {
        let mut mocks = Mocks::default();
        mocks
            .sessions
            .expect_find_by_session_id()
            .returning(|_, _| Ok(None));
        let service = build_service(mocks, Arc::new(InProcessRegistry::new()));
        let err = service
            .join("tm_missing", ParticipantRole::Doctor, Uuid::new_v4())
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn join_terminal_session_is_invalid_state() {
        let session = encrypted_fixture(SessionStatus::Completed, [9u8; 32]);
        let doctor = *session.doctor_id.as_uuid();
        let mut mocks = Mocks::default();
        expect_session(&mut mocks, &session);
        let service = build_service(mocks, Arc::new(InProcessRegistry::new()));
        let err = service
            .join("tm_0123456789ab", ParticipantRole::Doctor, doctor)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn join_with_wrong_identity_is_unauthorized() {
        let session = encrypted_fixture(SessionStatus::Scheduled, [9u8; 32]);
        let mut mocks = Mocks::default();
        expect_session(&mut mocks, &session);
        let service = build_service(mocks, Arc::new(InProcessRegistry::new()));
        let err = service
            .join("tm_0123456789ab", ParticipantRole::Doctor, Uuid::new_v4())
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    // Scenario A: consent-gated patient join.
    #[tokio::test]
    async fn patient_join_blocked_until_consent_granted() {
        let session = encrypted_fixture(SessionStatus::Scheduled, [9u8; 32]);
        let patient = *session.patient_id.as_uuid();

        // First attempt: no consent records at all.
        let mut mocks = Mocks::default();
        expect_session(&mut mocks, &session);
        mocks
            .consents
            .expect_list_for_session()
            .returning(|_, _| Ok(Vec::new()));
        let service = build_service(mocks, Arc::new(InProcessRegistry::new()));
        let err = service
            .join("tm_0123456789ab", ParticipantRole::Patient, patient)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::ConsentRequired(_)));

        // Second attempt: a granted recording consent exists.
        let record = consent_fixture(&session, ConsentType::Recording, ConsentStatus::Granted, "v1");
        let mut mocks = Mocks::default();
        expect_session(&mut mocks, &session);
        mocks
            .consents
            .expect_list_for_session()
            .returning(move |_, _| Ok(vec![record.clone()]));
        mocks
            .sessions
            .expect_transition_status()
            .withf(|_, _, from, to, _, _| {
                *from == SessionStatus::Scheduled && *to == SessionStatus::Waiting
            })
            .returning(|_, _, _, _, _, _| Ok(true));
        let service = build_service(mocks, Arc::new(InProcessRegistry::new()));
        let joined = service
            .join("tm_0123456789ab", ParticipantRole::Patient, patient)
            .await
            .expect("join");
        assert_eq!(joined.status, SessionStatus::Waiting);
        assert_eq!(joined.room_token, "room-secret");
    }

    #[tokio::test]
    async fn doctor_join_skips_consent_gate() {
        let session = encrypted_fixture(SessionStatus::Scheduled, [9u8; 32]);
        let doctor = *session.doctor_id.as_uuid();
        let mut mocks = Mocks::default();
        expect_session(&mut mocks, &session);
        mocks
            .sessions
            .expect_transition_status()
            .returning(|_, _, _, _, _, _| Ok(true));
        let service = build_service(mocks, Arc::new(InProcessRegistry::new()));
        let joined = service
            .join("tm_0123456789ab", ParticipantRole::Doctor, doctor)
            .await
            .expect("join");
        assert_eq!(joined.status, SessionStatus::Waiting);
    }

    // Scenario C: Start while still SCHEDULED fails with InvalidState.
    #[tokio::test]
    async fn start_before_anyone_joined_is_invalid_state() {
        let session = encrypted_fixture(SessionStatus::Scheduled, [9u8; 32]);
        let mut mocks = Mocks::default();
        expect_session(&mut mocks, &session);
        let service = build_service(mocks, Arc::new(InProcessRegistry::new()));
        let err = service
            .start("tm_0123456789ab", Uuid::new_v4())
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn start_without_live_doctor_connection_fails_precondition() {
        let session = encrypted_fixture(SessionStatus::Waiting, [9u8; 32]);
        let mut mocks = Mocks::default();
        expect_session(&mut mocks, &session);
        let service = build_service(mocks, Arc::new(InProcessRegistry::new()));
        // The doctor joined earlier but holds no live transport now.
        let err = service
            .start("tm_0123456789ab", Uuid::new_v4())
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::PreconditionFailed(_)));
    }

    // Scenario B: full lifecycle with a connected doctor; one analytics row.
    #[tokio::test]
    async fn full_lifecycle_completes_and_produces_analytics() {
        let session = encrypted_fixture(SessionStatus::Waiting, [9u8; 32]);
        let doctor = *session.doctor_id.as_uuid();
        let computed = Arc::new(AtomicUsize::new(0));

        let mut mocks = Mocks::default();
        // start() reads WAITING, end() reads IN_PROGRESS, analytics reads a
        // completed row afterwards.
        {
            let waiting = session.clone();
            let mut in_progress = session.clone();
            in_progress.status = SessionStatus::InProgress;
            in_progress.actual_start = Some(Utc::now());
            let mut done = in_progress.clone();
            done.status = SessionStatus::Completed;
            done.actual_end = Some(Utc::now());
            let calls = AtomicUsize::new(0);
            mocks
                .sessions
                .expect_find_by_session_id()
                .returning(move |_, _| {
                    let call = calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(match call {
                        0 => waiting.clone(),
                        1 => in_progress.clone(),
                        _ => done.clone(),
                    }))
                });
        }
        mocks
            .sessions
            .expect_transition_status()
            .withf(|_, _, from, to, _, _| {
                (*from == SessionStatus::Waiting && *to == SessionStatus::InProgress)
                    || (*from == SessionStatus::InProgress && *to == SessionStatus::Completed)
            })
            .times(2)
            .returning(|_, _, _, _, _, _| Ok(true));
        mocks
            .events
            .expect_list_for_session()
            .returning(|_, _| Ok(Vec::new()));
        {
            let computed = computed.clone();
            mocks.analytics.expect_replace().returning(move |_, row| {
                computed.fetch_add(1, Ordering::SeqCst);
                Ok(row.clone())
            });
        }

        let registry = Arc::new(InProcessRegistry::new());
        let (tx, _rx) = mpsc::channel(8);
        registry.register(
            "tm_0123456789ab",
            &participant_key(ParticipantRole::Doctor, doctor),
            tx,
        );

        let service = build_service(mocks, registry);
        let started = service
            .start("tm_0123456789ab", doctor)
            .await
            .expect("start");
        assert_eq!(started.status, SessionStatus::InProgress);
        assert!(started.actual_start.is_some());

        let ended = service
            .end("tm_0123456789ab", None)
            .await
            .expect("end");
        assert_eq!(ended.status, SessionStatus::Completed);
        assert!(ended.actual_end.is_some());

        // The analytics task is spawned; give it a chance to run.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(computed.load(Ordering::SeqCst), 1);
    }

    // Scenario D: two Start calls race; the CAS loser sees InvalidState.
    #[tokio::test]
    async fn concurrent_start_calls_have_exactly_one_winner() {
        let session = encrypted_fixture(SessionStatus::Waiting, [9u8; 32]);
        let doctor = *session.doctor_id.as_uuid();

        let mut mocks = Mocks::default();
        expect_session(&mut mocks, &session);
        let won_once = AtomicBool::new(false);
        mocks
            .sessions
            .expect_transition_status()
            .times(2)
            .returning(move |_, _, _, _, _, _| {
                Ok(!won_once.swap(true, Ordering::SeqCst))
            });

        let registry = Arc::new(InProcessRegistry::new());
        let (tx, _rx) = mpsc::channel(8);
        registry.register(
            "tm_0123456789ab",
            &participant_key(ParticipantRole::Doctor, doctor),
            tx,
        );

        let service = build_service(mocks, registry);
        let first = service.start("tm_0123456789ab", doctor).await;
        let second = service.start("tm_0123456789ab", doctor).await;

        assert!(first.is_ok());
        assert!(matches!(second, Err(AppError::InvalidState(_))));
    }

    #[tokio::test]
    async fn no_show_end_from_waiting_still_completes() {
        let session = encrypted_fixture(SessionStatus::Waiting, [9u8; 32]);
        let mut mocks = Mocks::default();
        expect_session(&mut mocks, &session);
        mocks
            .sessions
            .expect_transition_status()
            .withf(|_, _, from, to, _, mark_end| {
                *from == SessionStatus::Waiting && *to == SessionStatus::Completed && *mark_end
            })
            .returning(|_, _, _, _, _, _| Ok(true));
        mocks
            .sessions
            .expect_merge_metadata()
            .withf(|_, _, entries| entries["end_reason"] == "no_show")
            .times(1)
            .returning(|_, _, _| Ok(()));
        mocks
            .events
            .expect_list_for_session()
            .returning(|_, _| Ok(Vec::new()));
        mocks
            .analytics
            .expect_replace()
            .returning(|_, row| Ok(row.clone()));

        let service = build_service(mocks, Arc::new(InProcessRegistry::new()));
        let ended = service
            .end("tm_0123456789ab", Some("no_show".to_string()))
            .await
            .expect("end");
        assert_eq!(ended.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn end_of_terminal_session_is_invalid_state() {
        let session = encrypted_fixture(SessionStatus::Completed, [9u8; 32]);
        let mut mocks = Mocks::default();
        expect_session(&mut mocks, &session);
        let service = build_service(mocks, Arc::new(InProcessRegistry::new()));
        let err = service
            .end("tm_0123456789ab", None)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn cancel_from_scheduled_and_fail_from_in_progress() {
        for (status, op_fail) in [
            (SessionStatus::Scheduled, false),
            (SessionStatus::InProgress, true),
        ] {
            let session = encrypted_fixture(status, [9u8; 32]);
            let mut mocks = Mocks::default();
            expect_session(&mut mocks, &session);
            let expected_to = if op_fail {
                SessionStatus::Failed
            } else {
                SessionStatus::Cancelled
            };
            mocks
                .sessions
                .expect_transition_status()
                .withf(move |_, _, from, to, _, _| *from == status && *to == expected_to)
                .returning(|_, _, _, _, _, _| Ok(true));
            let service = build_service(mocks, Arc::new(InProcessRegistry::new()));
            let result = if op_fail {
                service.fail("tm_0123456789ab", None).await
            } else {
                service.cancel("tm_0123456789ab", None).await
            };
            assert_eq!(result.expect("terminate").status, expected_to);
        }
    }

    #[tokio::test]
    async fn cancel_of_terminal_session_is_invalid_state() {
        let session = encrypted_fixture(SessionStatus::Cancelled, [9u8; 32]);
        let mut mocks = Mocks::default();
        expect_session(&mut mocks, &session);
        let service = build_service(mocks, Arc::new(InProcessRegistry::new()));
        let err = service
            .cancel("tm_0123456789ab", None)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn attach_and_detach_record_events_and_notify_peers() {
        let session = encrypted_fixture(SessionStatus::Waiting, [9u8; 32]);
        let doctor = *session.doctor_id.as_uuid();
        let patient = *session.patient_id.as_uuid();

        let mut mocks = Mocks::default();
        expect_session(&mut mocks, &session);
        let joined_events = Arc::new(AtomicUsize::new(0));
        let left_events = Arc::new(AtomicUsize::new(0));
        {
            let joined_events = joined_events.clone();
            let left_events = left_events.clone();
            mocks.events.expect_insert().returning(move |_, event| {
                match event.event_type {
                    SessionEventType::Joined => joined_events.fetch_add(1, Ordering::SeqCst),
                    SessionEventType::Left => left_events.fetch_add(1, Ordering::SeqCst),
                };
                Ok(())
            });
        }

        let registry = Arc::new(InProcessRegistry::new());
        let service = build_service(mocks, registry.clone());

        let (doctor_tx, mut doctor_rx) = mpsc::channel(8);
        let doctor_key = service
            .attach_connection("tm_0123456789ab", ParticipantRole::Doctor, doctor, doctor_tx)
            .await
            .expect("attach doctor");

        let (patient_tx, _patient_rx) = mpsc::channel(8);
        let patient_key = service
            .attach_connection(
                "tm_0123456789ab",
                ParticipantRole::Patient,
                patient,
                patient_tx,
            )
            .await
            .expect("attach patient");

        // The doctor hears about the patient joining, not about itself.
        match doctor_rx.recv().await.expect("joined envelope") {
            ServerEnvelope::ParticipantJoined {
                participant_key, ..
            } => assert_eq!(participant_key, patient_key),
            other => panic!("unexpected envelope {:?}", other),
        }

        service
            .detach_connection("tm_0123456789ab", &patient_key)
            .await
            .expect("detach patient");
        match doctor_rx.recv().await.expect("left envelope") {
            ServerEnvelope::ParticipantLeft {
                participant_key, ..
            } => assert_eq!(participant_key, patient_key),
            other => panic!("unexpected envelope {:?}", other),
        }

        assert!(registry.is_connected("tm_0123456789ab", &doctor_key));
        assert!(!registry.is_connected("tm_0123456789ab", &patient_key));
        assert_eq!(joined_events.load(Ordering::SeqCst), 2);
        assert_eq!(left_events.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn detach_after_overflow_disconnect_still_records_the_leave() {
        // The registry already dropped the participant (queue overflow);
        // cleanup must still write the leave event and announce it.
        let session = encrypted_fixture(SessionStatus::InProgress, [9u8; 32]);
        let key = participant_key(ParticipantRole::Patient, *session.patient_id.as_uuid());
        let mut mocks = Mocks::default();
        expect_session(&mut mocks, &session);
        mocks
            .events
            .expect_insert()
            .withf(|_, event| event.event_type == SessionEventType::Left)
            .times(1)
            .returning(|_, _| Ok(()));
        let service = build_service(mocks, Arc::new(InProcessRegistry::new()));
        service
            .detach_connection("tm_0123456789ab", &key)
            .await
            .expect("detach");
    }
}
