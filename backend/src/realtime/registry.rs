//! Connection registry: which participant currently holds a live transport
//! for which session.
//!
//! The registry is process-local and injectable behind a trait, so the state
//! machine and relay never depend on the concrete map and a distributed
//! backing can replace it without touching them. Sends are fire-and-forget
//! with a bounded per-connection queue: an overflowing participant is
//! disconnected instead of backpressuring the whole session.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::realtime::protocol::ServerEnvelope;

pub type OutboundSender = mpsc::Sender<ServerEnvelope>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("participant is not connected")]
    NotConnected,
    #[error("participant outbound queue overflowed")]
    QueueOverflow,
}

pub trait ConnectionRegistry: Send + Sync {
    /// Registers a live transport, replacing any stale handle for the key.
    fn register(&self, session_id: &str, participant_key: &str, sender: OutboundSender);

    /// Removes a transport. Returns false when the key was absent.
    fn unregister(&self, session_id: &str, participant_key: &str) -> bool;

    /// Queues an envelope for one participant. A missing target or a full
    /// queue is an error result, never a panic; the caller decides whether
    /// to tell the sender.
    fn send_to(
        &self,
        session_id: &str,
        participant_key: &str,
        envelope: ServerEnvelope,
    ) -> Result<(), RegistryError>;

    /// Queues an envelope for every participant of the session except
    /// `exclude`. Returns the number of participants reached.
    fn broadcast(
        &self,
        session_id: &str,
        envelope: ServerEnvelope,
        exclude: Option<&str>,
    ) -> usize;

    fn is_connected(&self, session_id: &str, participant_key: &str) -> bool;

    fn connected_keys(&self, session_id: &str) -> Vec<String>;
}

/// In-process registry backed by a lock-guarded nested map.
///
/// Lock scope never overlaps store I/O: callers load whatever they need from
/// the database before touching the registry.
#[derive(Default)]
pub struct InProcessRegistry {
    connections: RwLock<HashMap<String, HashMap<String, OutboundSender>>>,
}

impl InProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConnectionRegistry for InProcessRegistry {
    fn register(&self, session_id: &str, participant_key: &str, sender: OutboundSender) {
        let mut sessions = self
            .connections
            .write()
            .expect("connection registry lock poisoned");
        sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(participant_key.to_string(), sender);
    }

    fn unregister(&self, session_id: &str, participant_key: &str) -> bool {
        let mut sessions = self
            .connections
            .write()
            .expect("connection registry lock poisoned");
        let Some(participants) = sessions.get_mut(session_id) else {
            return false;
        };
        let removed = participants.remove(participant_key).is_some();
        if participants.is_empty() {
            sessions.remove(session_id);
        }
        removed
    }

    fn send_to(
        &self,
        session_id: &str,
        participant_key: &str,
        envelope: ServerEnvelope,
    ) -> Result<(), RegistryError> {
        let mut sessions = self
            .connections
            .write()
            .expect("connection registry lock poisoned");
        let Some(participants) = sessions.get_mut(session_id) else {
            return Err(RegistryError::NotConnected);
        };
        let Some(sender) = participants.get(participant_key) else {
            return Err(RegistryError::NotConnected);
        };
        match sender.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                // Dropping the sender closes the participant's outbound pump.
                participants.remove(participant_key);
                if participants.is_empty() {
                    sessions.remove(session_id);
                }
                tracing::warn!(
                    session_id = %session_id,
                    participant_key = %participant_key,
                    "Outbound queue overflow; disconnecting participant"
                );
                Err(RegistryError::QueueOverflow)
            }
            Err(TrySendError::Closed(_)) => {
                participants.remove(participant_key);
                if participants.is_empty() {
                    sessions.remove(session_id);
                }
                Err(RegistryError::NotConnected)
            }
        }
    }

    fn broadcast(
        &self,
        session_id: &str,
        envelope: ServerEnvelope,
        exclude: Option<&str>,
    ) -> usize {
        let mut sessions = self
            .connections
            .write()
            .expect("connection registry lock poisoned");
        let Some(participants) = sessions.get_mut(session_id) else {
            return 0;
        };
        let mut delivered = 0;
        let mut dead: Vec<String> = Vec::new();
        for (key, sender) in participants.iter() {
            if exclude == Some(key.as_str()) {
                continue;
            }
            match sender.try_send(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        session_id = %session_id,
                        participant_key = %key,
                        "Outbound queue overflow during broadcast; disconnecting participant"
                    );
                    dead.push(key.clone());
                }
                Err(TrySendError::Closed(_)) => dead.push(key.clone()),
            }
        }
        for key in dead {
            participants.remove(&key);
        }
        if participants.is_empty() {
            sessions.remove(session_id);
        }
        delivered
    }

    fn is_connected(&self, session_id: &str, participant_key: &str) -> bool {
        let sessions = self
            .connections
            .read()
            .expect("connection registry lock poisoned");
        sessions
            .get(session_id)
            .map(|participants| participants.contains_key(participant_key))
            .unwrap_or(false)
    }

    fn connected_keys(&self, session_id: &str) -> Vec<String> {
        let sessions = self
            .connections
            .read()
            .expect("connection registry lock poisoned");
        sessions
            .get(session_id)
            .map(|participants| participants.keys().cloned().collect())
            .unwrap_or_default()
    }
}
