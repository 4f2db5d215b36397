//! Error types for the voice session engine

use thiserror::Error;

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Typed failure causes surfaced to callers and to `SessionObserver::on_error`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Microphone access was refused
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Capture device could not be opened for a reason other than permission
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    /// Backend failed to issue room credentials or start the conversation
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// Join failed or the connection dropped mid-session
    #[error("Transport error: {0}")]
    Transport(String),

    /// Synthesized or remote audio could not be decoded or played
    #[error("Playback error: {0}")]
    Playback(String),

    /// A single conversation turn failed; the session stays up
    #[error("Turn failed: {0}")]
    Turn(String),

    #[error("A session is already active")]
    AlreadyActive,

    #[error("No connected session")]
    NotConnected,

    #[error("Another turn is still in flight")]
    TurnInFlight,

    #[error("Not supported by this transport: {0}")]
    Unsupported(&'static str),

    /// The operation was overtaken by `end_session`
    #[error("Session ended before the operation completed")]
    Cancelled,
}

impl SessionError {
    /// Whether the session must be torn down after this error
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::Playback(_)
                | SessionError::Turn(_)
                | SessionError::TurnInFlight
                | SessionError::Unsupported(_)
                | SessionError::NotConnected
                | SessionError::AlreadyActive
        )
    }
}
