use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::session::PracticeMode;

/// POST /voice/room
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub mode: PracticeMode,
}

/// Credentials for joining a streaming room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomCredentials {
    pub room_url: String,
    pub token: String,
    #[serde(default)]
    pub mode: Option<String>,
}

/// POST /voice/conversation/start
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConversationRequest {
    pub session_id: String,
    pub mode: PracticeMode,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartConversationResponse {
    /// The AI's opening line
    pub message: String,
}

/// Reply to POST /voice/conversation/audio
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTurnResponse {
    #[serde(default)]
    pub user_text: String,
    #[serde(default)]
    pub ai_text: String,
    #[serde(default)]
    pub emotion: Option<String>,
    /// Base64-encoded synthesized reply
    #[serde(default)]
    pub audio: Option<String>,
    #[serde(default)]
    pub audio_format: Option<String>,
}

/// POST /voice/conversation
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextTurnRequest {
    pub session_id: String,
    pub mode: PracticeMode,
    pub user_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextTurnResponse {
    pub text: String,
    #[serde(default)]
    pub emotion: Option<String>,
}

/// POST /voice/tts
#[derive(Debug, Serialize, Deserialize)]
pub struct TtsRequest {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
    pub format: String,
}

/// POST /voice/conversation/end
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndConversationRequest {
    pub session_id: String,
}

/// GET /voice/status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    #[serde(default)]
    pub ready: bool,
    /// Per-provider readiness flags, as reported
    #[serde(flatten)]
    pub services: BTreeMap<String, serde_json::Value>,
}

/// Error body shapes used by the backend
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
