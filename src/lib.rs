pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod room;
pub mod session;
pub mod transport;

pub use api::{BackendError, VoiceApi};
pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioPipeline,
    AudioResources, AudioSource, AudioStreamSource, FrequencyAnalyser,
};
pub use config::Config;
pub use error::{SessionError, SessionResult};
pub use room::{AudioFrameMessage, RoomClient, RoomConnector, RoomEvent, RoomLink};
pub use session::{
    ConnectionStatus, Indicators, Message, MessageSource, PracticeMode, Session, SessionConfig,
    SessionController, SessionObserver, SessionSnapshot, SessionStats, TransportKind,
};
pub use transport::{Transport, TransportEvent, TurnOutcome};
