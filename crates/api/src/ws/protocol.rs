//! Realtime wire protocol: JSON text frames tagged on `type`.

use axum::extract::ws::{close_code, CloseFrame, Message};
use serde::{Deserialize, Serialize};
use tether_core::types::{DbId, Timestamp};

/// Close reasons sent in termination notices.
pub mod reasons {
    /// Another device logged in to the same account.
    pub const SIGNED_IN_ELSEWHERE: &str = "signed_in_elsewhere";
    pub const LOGOUT: &str = "logout";
    pub const REVOKED_BY_ADMIN: &str = "revoked_by_admin";
    /// The session store no longer has an active session for the channel.
    pub const SESSION_INACTIVE: &str = "session_inactive";
}

/// Messages sent by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Bind this channel to the identity carried by `token`.
    AnnounceIdentity {
        user_id: DbId,
        device_session_id: String,
        token: String,
    },
}

/// Messages pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    IdentityBound { channel_id: String },
    AnnounceRejected { reason: String },
    ForceTerminate { reason: String, timestamp: Timestamp },
    SessionEnded { reason: String },
}

impl ServerMessage {
    pub fn force_terminate(reason: &str) -> Self {
        ServerMessage::ForceTerminate {
            reason: reason.to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn session_ended(reason: &str) -> Self {
        ServerMessage::SessionEnded {
            reason: reason.to_string(),
        }
    }

    /// Encode as a WebSocket text frame.
    pub fn to_message(&self) -> Message {
        // Serializing these variants cannot fail: every field is a string
        // or a timestamp.
        let json = serde_json::to_string(self).unwrap_or_default();
        Message::Text(json.into())
    }
}

/// Close frame that follows a terminal notice.
pub fn policy_close(reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::POLICY,
        reason: reason.to_string().into(),
    }))
}
