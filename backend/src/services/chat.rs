//! Encrypted chat and file side-channel.
//!
//! Message content is encrypted before it reaches the repository and
//! decrypted on read. A row that fails to decrypt surfaces as a decryption
//! error, never as an empty message, so "no message" and "undecryptable
//! message" stay distinguishable for operators.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::connection::DbPool;
use crate::error::AppError;
use crate::models::message::{
    Message, MessageResponse, SendMessagePayload, SenderRole,
};
use crate::models::session::Session;
use crate::models::shared_file::{SharedFile, SharedFileResponse, UploadFilePayload};
use crate::repositories::{
    FileRepositoryTrait, MessageRepositoryTrait, SessionRepositoryTrait,
};
use crate::types::{FileId, MessageId};
use crate::utils::crypto::{generate_room_secret, ChannelCrypto};

#[derive(Clone)]
pub struct ChatService {
    pool: DbPool,
    sessions: Arc<dyn SessionRepositoryTrait>,
    messages: Arc<dyn MessageRepositoryTrait>,
    files: Arc<dyn FileRepositoryTrait>,
    crypto: Arc<ChannelCrypto>,
}

impl ChatService {
    pub fn new(
        pool: DbPool,
        sessions: Arc<dyn SessionRepositoryTrait>,
        messages: Arc<dyn MessageRepositoryTrait>,
        files: Arc<dyn FileRepositoryTrait>,
        crypto: Arc<ChannelCrypto>,
    ) -> Self {
        Self {
            pool,
            sessions,
            messages,
            files,
            crypto,
        }
    }

    async fn load_session(&self, session_id: &str) -> Result<Session, AppError> {
        self.sessions
            .find_by_session_id(&self.pool, session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Session not found".to_string()))
    }

    fn verify_sender(session: &Session, sender_id: Uuid, role: SenderRole) -> Result<(), AppError> {
        let bound = match role {
            SenderRole::Doctor => *session.doctor_id.as_uuid(),
            SenderRole::Patient => *session.patient_id.as_uuid(),
            // System messages originate inside the service.
            SenderRole::System => return Ok(()),
        };
        if bound != sender_id {
            return Err(AppError::Unauthorized(
                "Sender is not a participant of this session".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn send_message(
        &self,
        session_id: &str,
        sender_id: Uuid,
        sender_role: SenderRole,
        payload: SendMessagePayload,
    ) -> Result<MessageResponse, AppError> {
        let session = self.load_session(session_id).await?;
        if !session.chat_enabled {
            return Err(AppError::FeatureDisabled(
                "Chat is disabled for this session".to_string(),
            ));
        }
        Self::verify_sender(&session, sender_id, sender_role)?;

        let plaintext = payload.content;
        let ciphertext = self
            .crypto
            .encrypt(&plaintext)
            .map_err(|e| AppError::InternalServerError(anyhow::Error::new(e)))?;

        let message = Message {
            id: MessageId::new(),
            session_id: session.id,
            sender_id,
            sender_role,
            message_type: payload.message_type,
            content: ciphertext,
            file_url: payload.file_url,
            file_name: payload.file_name,
            file_size: payload.file_size,
            is_encrypted: true,
            is_deleted: false,
            deleted_at: None,
            created_at: Utc::now(),
        };
        let stored = self.messages.insert(&self.pool, &message).await?;
        Ok(MessageResponse::from_decrypted(stored, plaintext))
    }

    /// Most recent messages, decrypted; soft-deleted rows are excluded.
    pub async fn list_messages(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<MessageResponse>, AppError> {
        let session = self.load_session(session_id).await?;
        let rows = self
            .messages
            .list_recent(&self.pool, &session.id, limit)
            .await?;
        rows.into_iter()
            .map(|row| {
                let content = self.crypto.decrypt(&row.content)?;
                Ok(MessageResponse::from_decrypted(row, content))
            })
            .collect()
    }

    /// Direct-id fetch for audit; returns soft-deleted messages too.
    pub async fn get_message(
        &self,
        session_id: &str,
        message_id: MessageId,
    ) -> Result<MessageResponse, AppError> {
        let session = self.load_session(session_id).await?;
        let message = self
            .messages
            .find_by_id(&self.pool, message_id)
            .await?
            .filter(|m| m.session_id == session.id)
            .ok_or_else(|| AppError::NotFound("Message not found".to_string()))?;
        let content = self.crypto.decrypt(&message.content)?;
        Ok(MessageResponse::from_decrypted(message, content))
    }

    /// Soft delete; only the sender or the session's doctor may delete.
    pub async fn delete_message(
        &self,
        session_id: &str,
        message_id: MessageId,
        requester: Uuid,
    ) -> Result<(), AppError> {
        let session = self.load_session(session_id).await?;
        let message = self
            .messages
            .find_by_id(&self.pool, message_id)
            .await?
            .filter(|m| m.session_id == session.id)
            .ok_or_else(|| AppError::NotFound("Message not found".to_string()))?;

        if message.sender_id != requester && *session.doctor_id.as_uuid() != requester {
            return Err(AppError::Forbidden(
                "Only the sender or the doctor may delete a message".to_string(),
            ));
        }

        let deleted = self
            .messages
            .soft_delete(&self.pool, message_id, Utc::now())
            .await?;
        if !deleted {
            return Err(AppError::Conflict("Message already deleted".to_string()));
        }
        Ok(())
    }

    pub async fn upload_file(
        &self,
        session_id: &str,
        uploader: Uuid,
        payload: UploadFilePayload,
    ) -> Result<SharedFileResponse, AppError> {
        let session = self.load_session(session_id).await?;
        if !session.file_sharing_enabled {
            return Err(AppError::FeatureDisabled(
                "File sharing is disabled for this session".to_string(),
            ));
        }
        if *session.doctor_id.as_uuid() != uploader && *session.patient_id.as_uuid() != uploader {
            return Err(AppError::Unauthorized(
                "Uploader is not a participant of this session".to_string(),
            ));
        }

        // Per-file key, stored only in encrypted form.
        let file_key = generate_room_secret();
        let encryption_key_ref = self
            .crypto
            .encrypt(&file_key)
            .map_err(|e| AppError::InternalServerError(anyhow::Error::new(e)))?;

        let file = SharedFile {
            id: FileId::new(),
            session_id: session.id,
            uploaded_by: uploader,
            file_name: payload.file_name,
            file_path: payload.file_path,
            file_size: payload.file_size,
            file_type: payload.file_type,
            mime_type: payload.mime_type,
            is_encrypted: true,
            encryption_key_ref: Some(encryption_key_ref),
            is_public: payload.is_public,
            access_expires_at: payload.access_expires_at,
            description: payload.description,
            created_at: Utc::now(),
        };
        let stored = self.files.insert(&self.pool, &file).await?;
        Ok(stored.into())
    }

    /// Files the viewer may see: public ones plus their own uploads, with
    /// expired access filtered out lazily.
    pub async fn list_files(
        &self,
        session_id: &str,
        viewer: Uuid,
    ) -> Result<Vec<SharedFileResponse>, AppError> {
        let session = self.load_session(session_id).await?;
        let rows = self.files.list_for_session(&self.pool, &session.id).await?;
        let now = Utc::now();
        Ok(rows
            .into_iter()
            .filter(|file| file.accessible_by(viewer, now))
            .map(Into::into)
            .collect())
    }
}
