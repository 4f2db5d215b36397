use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::audio::{AudioFrame, AudioStreamSource};

/// Audio frame message exchanged in a room
#[derive(Debug, Serialize, Deserialize)]
pub struct AudioFrameMessage {
    /// Participant that produced the frame
    pub session_id: String,
    pub sequence: u32,
    pub pcm: String, // Base64-encoded little-endian i16 PCM
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp: String, // RFC3339 timestamp
    #[serde(rename = "final")]
    pub final_frame: bool,
}

impl AudioFrameMessage {
    pub fn from_frame(session_id: &str, frame: &AudioFrame, sequence: u32, final_frame: bool) -> Self {
        Self {
            session_id: session_id.to_string(),
            sequence,
            pcm: base64::engine::general_purpose::STANDARD.encode(frame.to_pcm_bytes()),
            sample_rate: frame.sample_rate,
            channels: frame.channels,
            timestamp: chrono::Utc::now().to_rfc3339(),
            final_frame,
        }
    }

    /// Decode the payload back into samples
    pub fn to_frame(&self, timestamp_ms: u64) -> anyhow::Result<AudioFrame> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(&self.pcm)?;
        if bytes.len() % 2 != 0 {
            anyhow::bail!("PCM payload has odd length {}", bytes.len());
        }

        let samples = bytes
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect();

        Ok(AudioFrame {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
            timestamp_ms,
            source: AudioStreamSource::Remote,
        })
    }
}

/// Someone in the room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Room lifecycle and app messages, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RoomEvent {
    ParticipantJoined {
        participant: Participant,
    },
    ParticipantLeft {
        participant: Participant,
    },
    TrackStarted {
        participant: Participant,
        kind: TrackKind,
    },
    TrackStopped {
        participant: Participant,
        kind: TrackKind,
    },
    /// Transcript produced by the bot pipeline; `role` is "user" or "assistant"
    Transcript {
        role: String,
        content: String,
    },
    Error {
        message: String,
    },
}
