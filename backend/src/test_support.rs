//! Shared fixtures for unit tests. Mock-based tests never talk to a real
//! database; the lazy pool satisfies repository signatures without I/O.

use chrono::{Duration, Utc};
use sqlx::types::Json;
use std::sync::Arc;

use crate::db::connection::DbPool;
use crate::models::consent::{ConsentRecord, ConsentStatus, ConsentType};
use crate::models::session::{default_consent_versions, Session, SessionStatus};
use crate::types::{ConsentId, DoctorId, PatientId, TenantId};

pub fn lazy_pool() -> DbPool {
    Arc::new(
        sqlx::PgPool::connect_lazy("postgres://localhost/telecare-test").expect("lazy pool"),
    )
}

pub fn session_fixture(status: SessionStatus) -> Session {
    let now = Utc::now();
    Session {
        id: "row-1".to_string(),
        session_id: "tm_0123456789ab".to_string(),
        tenant_id: TenantId::new(),
        doctor_id: DoctorId::new(),
        patient_id: PatientId::new(),
        title: "Follow-up consultation".to_string(),
        description: None,
        scheduled_start: now + Duration::hours(1),
        scheduled_end: now + Duration::hours(2),
        actual_start: None,
        actual_end: None,
        status,
        room_token: "enc:v1:unused:unused".to_string(),
        max_participants: 2,
        chat_enabled: true,
        screen_sharing_enabled: true,
        file_sharing_enabled: true,
        recording_enabled: true,
        consent_required: true,
        consent_granted: false,
        consent_granted_at: None,
        consent_versions: Json(default_consent_versions()),
        technical_issues: None,
        metadata: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn consent_fixture(
    session: &Session,
    consent_type: ConsentType,
    status: ConsentStatus,
    version: &str,
) -> ConsentRecord {
    let now = Utc::now();
    ConsentRecord {
        id: ConsentId::new(),
        session_id: session.id.clone(),
        patient_id: session.patient_id,
        consent_type,
        status,
        consent_text: "May we enable this capability?".to_string(),
        consent_version: version.to_string(),
        granted: Some(status == ConsentStatus::Granted),
        granted_at: Some(now),
        ip_address: None,
        user_agent: None,
        expires_at: None,
        created_at: now,
        updated_at: now,
    }
}
