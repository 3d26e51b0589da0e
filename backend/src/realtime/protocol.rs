//! WebSocket message protocol between call participants and the server.
//!
//! Envelopes are closed tagged enums, so an unrecognized `type` is a parse
//! error answered with an error reply instead of a silent runtime branch.
//! Signaling payloads stay opaque: the relay routes `data` without looking
//! inside SDP or ICE content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

//=========================================================================================
// Messages sent FROM a participant TO the server
//=========================================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Point-to-point WebRTC control message (offer/answer/candidate).
    WebrtcSignaling { target: String, data: Value },

    /// Chat side-channel message, broadcast to the other participants.
    ChatMessage { data: Value },

    /// Screen-sharing status change. A "start" transition is consent-gated.
    ScreenSharing { data: Value },

    /// Recording status change. A "start" transition is consent-gated.
    RecordingStatus { data: Value },
}

impl ClientEnvelope {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEnvelope::WebrtcSignaling { .. } => "webrtc_signaling",
            ClientEnvelope::ChatMessage { .. } => "chat_message",
            ClientEnvelope::ScreenSharing { .. } => "screen_sharing",
            ClientEnvelope::RecordingStatus { .. } => "recording_status",
        }
    }
}

//=========================================================================================
// Messages sent FROM the server TO participants
//=========================================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    WebrtcSignaling {
        from: String,
        target: String,
        data: Value,
    },
    ChatMessage {
        from: String,
        data: Value,
    },
    ScreenSharing {
        from: String,
        data: Value,
    },
    RecordingStatus {
        from: String,
        data: Value,
    },
    ParticipantJoined {
        participant_key: String,
        timestamp: DateTime<Utc>,
    },
    ParticipantLeft {
        participant_key: String,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

/// Extracts the `status` field of a screen-sharing/recording payload.
pub fn transition_status(data: &Value) -> Option<&str> {
    data.get("status").and_then(Value::as_str)
}
