use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::{PracticeMode, TransportKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        ConnectionStatus::Disconnected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
    User,
    Ai,
}

/// One transcript line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub source: MessageSource,
    pub text: String,
    /// When the engine received it
    pub received_at: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            source: MessageSource::User,
            text: text.into(),
            received_at: Utc::now(),
        }
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self {
            source: MessageSource::Ai,
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

/// The active practice conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// `session_<millis>_<suffix>`, sent on every backend call
    pub id: String,
    pub mode: PracticeMode,
    pub transport: TransportKind,
    pub started_at: DateTime<Utc>,
}

/// UI-facing flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indicators {
    /// AI audio currently playing
    pub is_speaking: bool,
    /// Microphone currently contributing
    pub is_listening: bool,
    /// User asked for silence
    pub is_muted: bool,
    /// A turn is being captured
    pub is_recording: bool,
    /// A turn is waiting on the backend
    pub is_processing: bool,
}

/// Consistent read of the controller state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: ConnectionStatus,
    pub session: Option<Session>,
    pub indicators: Indicators,
}
