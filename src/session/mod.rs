//! Voice session management
//!
//! This module provides the `SessionController` abstraction that manages:
//! - Microphone acquisition and release through the audio pipeline
//! - Joining and leaving the backend via the selected transport
//! - Mute control and turn operations
//! - Ordered delivery of transcripts and lifecycle events to the host

mod bus;
mod config;
mod controller;
mod id;
mod model;
mod stats;

pub use bus::{ChannelObserver, MessageBus, NoopObserver, SessionEvent, SessionObserver};
pub use config::{PracticeMode, SessionConfig, TransportKind};
pub use controller::SessionController;
pub use id::{generate_session_id, is_valid_session_id};
pub use model::{ConnectionStatus, Indicators, Message, MessageSource, Session, SessionSnapshot};
pub use stats::SessionStats;
