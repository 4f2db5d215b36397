//! Transport strategies: how audio and text reach the backend
//!
//! Both variants implement [`Transport`]; the controller selects one at
//! construction and never looks at which it got. Anything a transport wants
//! the host to know travels as a [`TransportEvent`] over the session's single
//! ordered channel.

mod streaming;
mod turn_based;

pub use streaming::{RoomReaction, StreamingTransport};
pub use turn_based::TurnBasedTransport;

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::api::VoiceApi;
use crate::audio::{AudioResources, VoiceListener};
use crate::error::SessionResult;
use crate::session::{Message, Session, SessionConfig, TransportKind};

/// Encoding requested from `/voice/tts`
pub(crate) const SPEECH_FORMAT: &str = "mp3";

/// Something a transport observed
#[derive(Debug)]
pub enum TransportEvent {
    /// A transcript line, in arrival order
    Message(Message),
    /// AI audio started playing
    SpeakingStarted,
    /// AI audio stopped
    SpeakingStopped,
    /// Turn capture started / stopped
    Recording(bool),
    /// A turn is waiting on the backend / came back
    Processing(bool),
    /// One user/AI exchange finished
    TurnCompleted,
    /// Something went wrong; fatal errors end the session
    Failed(crate::error::SessionError),
    /// The remote side ended the session
    Closed,
    /// Acknowledged once every earlier event has been delivered
    #[doc(hidden)]
    Barrier(oneshot::Sender<()>),
}

/// Sending half of the session's event channel
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an event; dropped silently once the session is gone
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.tx.send(event);
    }

    pub fn message(&self, message: Message) {
        self.emit(TransportEvent::Message(message));
    }

    /// Turns voice start/stop reports from the audio resources into speaking events
    pub fn voice_listener(&self) -> VoiceListener {
        let sink = self.clone();
        Arc::new(move |speaking| {
            sink.emit(if speaking {
                TransportEvent::SpeakingStarted
            } else {
                TransportEvent::SpeakingStopped
            })
        })
    }

    /// Resolves when everything queued before it has been handled
    pub(crate) fn barrier(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.emit(TransportEvent::Barrier(tx));
        rx
    }
}

/// What a transport gets to work with for one session
#[derive(Clone)]
pub struct TransportContext {
    pub session: Session,
    pub media: Arc<AudioResources>,
    pub events: EventSink,
    /// Cancelled when the session ends; background work must stop on it
    pub cancel: CancellationToken,
}

/// Result of a successful join
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinOutcome {
    /// First thing the AI says (turn-based)
    pub opening_line: Option<String>,
    /// Room joined (streaming)
    pub room: Option<String>,
}

/// Result of one explicit turn
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutcome {
    pub user_text: Option<String>,
    pub ai_text: Option<String>,
    /// Whether reply audio played to completion
    pub played: bool,
}

/// One way of carrying a conversation
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Negotiate with the backend and start exchanging audio
    async fn join(&self, context: TransportContext) -> SessionResult<JoinOutcome>;

    /// Begin capturing a turn
    async fn start_recording(&self) -> SessionResult<()>;

    /// Finish the turn: upload, deliver transcripts, play the reply
    async fn stop_recording(&self) -> SessionResult<TurnOutcome>;

    /// Typed turn instead of speech
    async fn send_text(&self, text: &str) -> SessionResult<TurnOutcome>;

    /// Release the connection and tell the backend. Safe to call repeatedly.
    async fn leave(&self) -> SessionResult<()>;
}

/// Builds the transport for a new session
pub type TransportFactory = Arc<dyn Fn(&Session) -> Arc<dyn Transport> + Send + Sync>;

/// Transport for `kind` backed by `api`
pub fn create_transport(kind: TransportKind, api: VoiceApi, config: &SessionConfig) -> Arc<dyn Transport> {
    match kind {
        TransportKind::Streaming => Arc::new(StreamingTransport::new(api, config.greeting.clone())),
        TransportKind::TurnBased => Arc::new(TurnBasedTransport::new(api)),
    }
}
