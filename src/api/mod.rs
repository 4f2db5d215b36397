//! Client for the backend voice service
//!
//! - POST /voice/room - negotiate a streaming room
//! - POST /voice/conversation/start - open a turn-based conversation
//! - POST /voice/conversation/audio - one spoken turn
//! - POST /voice/conversation - one typed turn
//! - POST /voice/tts - synthesize text
//! - POST /voice/conversation/end - close a conversation
//! - DELETE /voice/room/:name - drop a room
//! - GET /voice/status - provider readiness

mod client;
pub mod messages;

pub use client::{BackendError, VoiceApi};
pub use messages::{AudioTurnResponse, RoomCredentials, ServiceStatus, TextTurnResponse};
