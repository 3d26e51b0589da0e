//! Signaling relay: routes WebRTC control messages and side-channel events
//! between the participants of one session.
//!
//! The relay is byte-transparent for signaling payloads. It checks three
//! things before forwarding: the session is in a state that allows
//! signaling (read from the store, not a cache), sender and target hold
//! registered connections, and consent covers "start" transitions for
//! recording and screen sharing. Failures are reported to the sender only
//! and never broadcast.

use std::sync::Arc;

use crate::db::connection::DbPool;
use crate::error::AppError;
use crate::models::consent::ConsentType;
use crate::models::session::Session;
use crate::realtime::protocol::{transition_status, ClientEnvelope, ServerEnvelope};
use crate::realtime::registry::ConnectionRegistry;
use crate::repositories::SessionRepositoryTrait;
use crate::services::consent::ConsentService;

#[derive(Clone)]
pub struct SignalingRelay {
    pool: DbPool,
    sessions: Arc<dyn SessionRepositoryTrait>,
    consent: ConsentService,
    registry: Arc<dyn ConnectionRegistry>,
}

impl SignalingRelay {
    pub fn new(
        pool: DbPool,
        sessions: Arc<dyn SessionRepositoryTrait>,
        consent: ConsentService,
        registry: Arc<dyn ConnectionRegistry>,
    ) -> Self {
        Self {
            pool,
            sessions,
            consent,
            registry,
        }
    }

    /// Entry point for one inbound frame. Any failure turns into an error
    /// envelope for the sender; this never panics the connection task.
    pub async fn handle_raw(&self, session_id: &str, sender_key: &str, raw: &str) {
        let envelope = match serde_json::from_str::<ClientEnvelope>(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                let message = if err.to_string().contains("unknown variant") {
                    "Unknown message type"
                } else {
                    "Invalid message envelope"
                };
                self.reply_error(session_id, sender_key, message);
                return;
            }
        };

        if let Err(err) = self.route(session_id, sender_key, envelope).await {
            tracing::debug!(
                session_id = %session_id,
                sender = %sender_key,
                code = err.code(),
                "Relay rejected message"
            );
            self.reply_error(session_id, sender_key, &err.public_message());
        }
    }

    async fn route(
        &self,
        session_id: &str,
        sender_key: &str,
        envelope: ClientEnvelope,
    ) -> Result<(), AppError> {
        let session = self
            .sessions
            .find_by_session_id(&self.pool, session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;

        if !session.status.allows_signaling() {
            return Err(AppError::InvalidState(
                "Session is not accepting signaling".to_string(),
            ));
        }
        if !self.registry.is_connected(session_id, sender_key) {
            return Err(AppError::PreconditionFailed(
                "Sender is not a connected participant".to_string(),
            ));
        }

        match envelope {
            ClientEnvelope::WebrtcSignaling { target, data } => {
                if !self.registry.is_connected(session_id, &target) {
                    return Err(AppError::TransportFailure(
                        "Target participant is not connected".to_string(),
                    ));
                }
                self.registry
                    .send_to(
                        session_id,
                        &target,
                        ServerEnvelope::WebrtcSignaling {
                            from: sender_key.to_string(),
                            target: target.clone(),
                            data,
                        },
                    )
                    .map_err(|err| AppError::TransportFailure(err.to_string()))?;
            }
            ClientEnvelope::ChatMessage { data } => {
                if !session.chat_enabled {
                    return Err(AppError::FeatureDisabled(
                        "Chat is disabled for this session".to_string(),
                    ));
                }
                self.registry.broadcast(
                    session_id,
                    ServerEnvelope::ChatMessage {
                        from: sender_key.to_string(),
                        data,
                    },
                    Some(sender_key),
                );
            }
            ClientEnvelope::ScreenSharing { data } => {
                if !session.screen_sharing_enabled {
                    return Err(AppError::FeatureDisabled(
                        "Screen sharing is disabled for this session".to_string(),
                    ));
                }
                self.check_start_consent(&session, &data, ConsentType::ScreenSharing)
                    .await?;
                self.registry.broadcast(
                    session_id,
                    ServerEnvelope::ScreenSharing {
                        from: sender_key.to_string(),
                        data,
                    },
                    Some(sender_key),
                );
            }
            ClientEnvelope::RecordingStatus { data } => {
                if !session.recording_enabled {
                    return Err(AppError::FeatureDisabled(
                        "Recording is disabled for this session".to_string(),
                    ));
                }
                self.check_start_consent(&session, &data, ConsentType::Recording)
                    .await?;
                self.registry.broadcast(
                    session_id,
                    ServerEnvelope::RecordingStatus {
                        from: sender_key.to_string(),
                        data,
                    },
                    Some(sender_key),
                );
            }
        }
        Ok(())
    }

    /// A "start" transition needs a usable consent; "stop" always propagates.
    async fn check_start_consent(
        &self,
        session: &Session,
        data: &serde_json::Value,
        consent_type: ConsentType,
    ) -> Result<(), AppError> {
        if transition_status(data) != Some("start") {
            return Ok(());
        }
        if self.consent.is_capability_allowed(session, consent_type).await? {
            return Ok(());
        }
        Err(AppError::ConsentRequired(format!(
            "{} consent has not been granted",
            match consent_type {
                ConsentType::Recording => "Recording",
                ConsentType::ScreenSharing => "Screen sharing",
                ConsentType::DataSharing => "Data sharing",
            }
        )))
    }

    fn reply_error(&self, session_id: &str, sender_key: &str, message: &str) {
        let envelope = ServerEnvelope::Error {
            message: message.to_string(),
        };
        if let Err(err) = self.registry.send_to(session_id, sender_key, envelope) {
            tracing::warn!(
                session_id = %session_id,
                sender = %sender_key,
                error = %err,
                "Could not deliver error reply"
            );
        }
    }
}
