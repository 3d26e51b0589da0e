//! Consent ledger: capability-specific patient authorizations.
//!
//! Capability checks are read-only. A granted record past its expiry is
//! treated as absent at check time; it is never rewritten to `expired` here,
//! which avoids races between readers and a background sweeper. A version
//! mismatch against the session's required consent version likewise makes a
//! grant unusable, forcing re-consent after the text changes.

use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::db::connection::DbPool;
use crate::error::AppError;
use crate::models::consent::{
    ConsentRecord, ConsentStatus, ConsentType, RequestConsentPayload,
};
use crate::models::session::Session;
use crate::repositories::{ConsentRepositoryTrait, SessionRepositoryTrait};
use crate::types::ConsentId;

#[derive(Clone)]
pub struct ConsentService {
    pool: DbPool,
    sessions: Arc<dyn SessionRepositoryTrait>,
    consents: Arc<dyn ConsentRepositoryTrait>,
}

impl ConsentService {
    pub fn new(
        pool: DbPool,
        sessions: Arc<dyn SessionRepositoryTrait>,
        consents: Arc<dyn ConsentRepositoryTrait>,
    ) -> Self {
        Self {
            pool,
            sessions,
            consents,
        }
    }

    async fn load_session(&self, session_id: &str) -> Result<Session, AppError> {
        self.sessions
            .find_by_session_id(&self.pool, session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Session not found".to_string()))
    }

    /// Creates a pending consent request for the session's patient.
    pub async fn request_consent(
        &self,
        session_id: &str,
        payload: RequestConsentPayload,
    ) -> Result<ConsentRecord, AppError> {
        let session = self.load_session(session_id).await?;
        let now = Utc::now();
        let record = ConsentRecord {
            id: ConsentId::new(),
            session_id: session.id.clone(),
            patient_id: session.patient_id,
            consent_type: payload.consent_type,
            status: ConsentStatus::Pending,
            consent_text: payload.consent_text,
            consent_version: payload.consent_version,
            granted: None,
            granted_at: None,
            ip_address: None,
            user_agent: None,
            expires_at: payload.ttl_hours.map(|hours| now + Duration::hours(hours)),
            created_at: now,
            updated_at: now,
        };
        let created = self.consents.create(&self.pool, &record).await?;
        // Delivery of the request to the patient happens out-of-band.
        tracing::info!(
            session_id = %session_id,
            consent_id = %created.id,
            consent_type = %created.consent_type.as_str(),
            "Consent requested"
        );
        Ok(created)
    }

    /// Applies the patient's decision to a pending request.
    pub async fn respond(
        &self,
        consent_id: ConsentId,
        granted: bool,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<ConsentRecord, AppError> {
        let status = if granted {
            ConsentStatus::Granted
        } else {
            ConsentStatus::Denied
        };
        let decided = self
            .consents
            .decide(
                &self.pool,
                consent_id,
                status,
                granted,
                Utc::now(),
                ip_address,
                user_agent,
            )
            .await?;
        let Some(record) = decided else {
            return match self.consents.find_by_id(&self.pool, consent_id).await? {
                None => Err(AppError::NotFound("Consent request not found".to_string())),
                Some(_) => Err(AppError::Conflict(
                    "Consent request already decided".to_string(),
                )),
            };
        };
        if granted {
            // Mirror onto the aggregate so join checks see it directly.
            self.sessions
                .set_consent_granted(&self.pool, &record.session_id)
                .await?;
        }
        Ok(record)
    }

    /// All consent records for a session, newest first.
    pub async fn list_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<ConsentRecord>, AppError> {
        let session = self.load_session(session_id).await?;
        self.consents.list_for_session(&self.pool, &session.id).await
    }

    /// Whether a capability gated by `consent_type` may be exercised now.
    pub async fn is_capability_allowed(
        &self,
        session: &Session,
        consent_type: ConsentType,
    ) -> Result<bool, AppError> {
        let records = self
            .consents
            .list_for_session(&self.pool, &session.id)
            .await?;
        let now = Utc::now();
        let required_version = session.required_consent_version(consent_type.as_str());
        Ok(records.iter().any(|record| {
            record.consent_type == consent_type
                && record.is_usable_at(now)
                && record.consent_version == required_version
        }))
    }

    /// Whether the patient holds any usable grant for this session; gates
    /// patient join when the session requires consent.
    pub async fn has_any_usable_grant(&self, session: &Session) -> Result<bool, AppError> {
        let records = self
            .consents
            .list_for_session(&self.pool, &session.id)
            .await?;
        let now = Utc::now();
        Ok(records.iter().any(|record| {
            record.is_usable_at(now)
                && record.consent_version
                    == session.required_consent_version(record.consent_type.as_str())
        }))
    }

    /// Raises the required consent version for one type, forcing re-consent.
    pub async fn set_required_version(
        &self,
        session_id: &str,
        consent_type: ConsentType,
        version: &str,
    ) -> Result<(), AppError> {
        let session = self.load_session(session_id).await?;
        self.sessions
            .set_consent_version(&self.pool, &session.session_id, consent_type.as_str(), version)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::SessionStatus;
    use crate::repositories::{MockConsentRepositoryTrait, MockSessionRepositoryTrait};
    use crate::test_support::{consent_fixture, lazy_pool, session_fixture};
    use chrono::Duration;

    fn service(
        sessions: MockSessionRepositoryTrait,
        consents: MockConsentRepositoryTrait,
    ) -> ConsentService {
        ConsentService::new(lazy_pool(), Arc::new(sessions), Arc::new(consents))
    }

    #[tokio::test]
    async fn request_consent_fails_for_missing_session() {
        let mut sessions = MockSessionRepositoryTrait::new();
        sessions
            .expect_find_by_session_id()
            .returning(|_, _| Ok(None));
        let consents = MockConsentRepositoryTrait::new();

        let payload = RequestConsentPayload {
            consent_type: ConsentType::Recording,
            consent_text: "ok?".to_string(),
            consent_version: "v1".to_string(),
            ttl_hours: None,
        };
        let err = service(sessions, consents)
            .request_consent("tm_missing", payload)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn request_consent_creates_pending_record_bound_to_patient() {
        let session = session_fixture(SessionStatus::Scheduled);
        let patient_id = session.patient_id;
        let mut sessions = MockSessionRepositoryTrait::new();
        {
            let session = session.clone();
            sessions
                .expect_find_by_session_id()
                .returning(move |_, _| Ok(Some(session.clone())));
        }
        let mut consents = MockConsentRepositoryTrait::new();
        consents
            .expect_create()
            .withf(move |_, record| {
                record.status == ConsentStatus::Pending
                    && record.patient_id == patient_id
                    && record.session_id == "row-1"
                    && record.expires_at.is_some()
            })
            .returning(|_, record| Ok(record.clone()));

        let payload = RequestConsentPayload {
            consent_type: ConsentType::Recording,
            consent_text: "May we record?".to_string(),
            consent_version: "v1".to_string(),
            ttl_hours: Some(24),
        };
        let record = service(sessions, consents)
            .request_consent("tm_0123456789ab", payload)
            .await
            .expect("request consent");
        assert_eq!(record.status, ConsentStatus::Pending);
    }

    #[tokio::test]
    async fn respond_grant_mirrors_consent_onto_session() {
        let session = session_fixture(SessionStatus::Scheduled);
        let record = consent_fixture(&session, ConsentType::Recording, ConsentStatus::Granted, "v1");
        let consent_id = record.id;

        let mut consents = MockConsentRepositoryTrait::new();
        {
            let record = record.clone();
            consents
                .expect_decide()
                .withf(move |_, id, status, granted, _, _, _| {
                    *id == consent_id && *status == ConsentStatus::Granted && *granted
                })
                .returning(move |_, _, _, _, _, _, _| Ok(Some(record.clone())));
        }
        let mut sessions = MockSessionRepositoryTrait::new();
        sessions
            .expect_set_consent_granted()
            .withf(|_, row_id| row_id == "row-1")
            .times(1)
            .returning(|_, _| Ok(()));

        let decided = service(sessions, consents)
            .respond(consent_id, true, Some("10.0.0.1".to_string()), None)
            .await
            .expect("respond");
        assert_eq!(decided.status, ConsentStatus::Granted);
    }

    #[tokio::test]
    async fn respond_on_already_decided_request_conflicts() {
        let session = session_fixture(SessionStatus::Scheduled);
        let record = consent_fixture(&session, ConsentType::Recording, ConsentStatus::Denied, "v1");
        let consent_id = record.id;

        let mut consents = MockConsentRepositoryTrait::new();
        consents
            .expect_decide()
            .returning(|_, _, _, _, _, _, _| Ok(None));
        {
            let record = record.clone();
            consents
                .expect_find_by_id()
                .returning(move |_, _| Ok(Some(record.clone())));
        }
        let sessions = MockSessionRepositoryTrait::new();

        let err = service(sessions, consents)
            .respond(consent_id, true, None, None)
            .await
            .expect_err("must conflict");
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn respond_on_missing_request_is_not_found() {
        let mut consents = MockConsentRepositoryTrait::new();
        consents
            .expect_decide()
            .returning(|_, _, _, _, _, _, _| Ok(None));
        consents.expect_find_by_id().returning(|_, _| Ok(None));
        let sessions = MockSessionRepositoryTrait::new();

        let err = service(sessions, consents)
            .respond(ConsentId::new(), false, None, None)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn capability_allowed_with_matching_granted_record() {
        let session = session_fixture(SessionStatus::InProgress);
        let record = consent_fixture(&session, ConsentType::Recording, ConsentStatus::Granted, "v1");
        let mut consents = MockConsentRepositoryTrait::new();
        consents
            .expect_list_for_session()
            .returning(move |_, _| Ok(vec![record.clone()]));
        let sessions = MockSessionRepositoryTrait::new();

        let allowed = service(sessions, consents)
            .is_capability_allowed(&session, ConsentType::Recording)
            .await
            .expect("check");
        assert!(allowed);
    }

    #[tokio::test]
    async fn capability_blocked_when_grant_expired() {
        let session = session_fixture(SessionStatus::InProgress);
        let mut record =
            consent_fixture(&session, ConsentType::Recording, ConsentStatus::Granted, "v1");
        record.expires_at = Some(Utc::now() - Duration::minutes(5));
        let returned = record.clone();
        let mut consents = MockConsentRepositoryTrait::new();
        consents
            .expect_list_for_session()
            .returning(move |_, _| Ok(vec![returned.clone()]));
        let sessions = MockSessionRepositoryTrait::new();

        let allowed = service(sessions, consents)
            .is_capability_allowed(&session, ConsentType::Recording)
            .await
            .expect("check");
        assert!(!allowed);
        // The historical record keeps its granted status.
        assert_eq!(record.status, ConsentStatus::Granted);
    }

    #[tokio::test]
    async fn capability_blocked_on_version_mismatch() {
        let mut session = session_fixture(SessionStatus::InProgress);
        session
            .consent_versions
            .0
            .insert("recording".to_string(), "v2".to_string());
        let record = consent_fixture(&session, ConsentType::Recording, ConsentStatus::Granted, "v1");
        let mut consents = MockConsentRepositoryTrait::new();
        consents
            .expect_list_for_session()
            .returning(move |_, _| Ok(vec![record.clone()]));
        let sessions = MockSessionRepositoryTrait::new();

        let allowed = service(sessions, consents)
            .is_capability_allowed(&session, ConsentType::Recording)
            .await
            .expect("check");
        assert!(!allowed);
    }

    #[tokio::test]
    async fn capability_requires_matching_type() {
        let session = session_fixture(SessionStatus::InProgress);
        let record =
            consent_fixture(&session, ConsentType::ScreenSharing, ConsentStatus::Granted, "v1");
        let mut consents = MockConsentRepositoryTrait::new();
        consents
            .expect_list_for_session()
            .returning(move |_, _| Ok(vec![record.clone()]));
        let sessions = MockSessionRepositoryTrait::new();

        let allowed = service(sessions, consents)
            .is_capability_allowed(&session, ConsentType::Recording)
            .await
            .expect("check");
        assert!(!allowed);
    }

    #[tokio::test]
    async fn denied_records_never_allow_a_capability() {
        let session = session_fixture(SessionStatus::InProgress);
        let record = consent_fixture(&session, ConsentType::Recording, ConsentStatus::Denied, "v1");
        let mut consents = MockConsentRepositoryTrait::new();
        consents
            .expect_list_for_session()
            .returning(move |_, _| Ok(vec![record.clone()]));
        let sessions = MockSessionRepositoryTrait::new();

        let allowed = service(sessions, consents)
            .is_capability_allowed(&session, ConsentType::Recording)
            .await
            .expect("check");
        assert!(!allowed);
    }
}
