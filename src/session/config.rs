use serde::{Deserialize, Serialize};
use std::fmt;

/// Practice scenario the AI character plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PracticeMode {
    Everyday,
    Slang,
    Workplace,
}

impl PracticeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PracticeMode::Everyday => "everyday",
            PracticeMode::Slang => "slang",
            PracticeMode::Workplace => "workplace",
        }
    }
}

impl Default for PracticeMode {
    fn default() -> Self {
        PracticeMode::Everyday
    }
}

impl fmt::Display for PracticeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which protocol carries the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Persistent audio room, server-side turn detection
    Streaming,
    /// Explicit record / upload / reply turns
    TurnBased,
}

impl Default for TransportKind {
    fn default() -> Self {
        TransportKind::TurnBased
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Streaming => "streaming",
            TransportKind::TurnBased => "turn-based",
        })
    }
}

/// Per-controller session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Transport selected for every session of the controller
    pub transport: TransportKind,

    /// Line announced when the AI joins a streaming room (None = stay quiet)
    pub greeting: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::TurnBased,
            greeting: Some("G'day mate! Ready to practice some Aussie English?".to_string()),
        }
    }
}
