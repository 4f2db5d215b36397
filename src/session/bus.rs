//! Ordered delivery from the controller to the host
//!
//! The host implements [`SessionObserver`]; the controller only ever talks to
//! it through a [`MessageBus`], which also keeps the append-only transcript.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::model::{Message, Session};
use crate::error::SessionError;

/// Callbacks a host receives. All methods default to no-ops.
///
/// Called from the runtime's worker threads; implementations must not block.
pub trait SessionObserver: Send + Sync {
    fn on_connect(&self, _session: &Session) {}

    fn on_disconnect(&self) {}

    fn on_message(&self, _message: &Message) {}

    fn on_error(&self, _error: &SessionError) {}
}

/// Observer that ignores everything
#[derive(Debug, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Everything a `ChannelObserver` forwards
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected(Session),
    Disconnected,
    Message(Message),
    Error(SessionError),
}

/// Observer that turns callbacks into a stream of `SessionEvent`s
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SessionObserver for ChannelObserver {
    fn on_connect(&self, session: &Session) {
        let _ = self.tx.send(SessionEvent::Connected(session.clone()));
    }

    fn on_disconnect(&self) {
        let _ = self.tx.send(SessionEvent::Disconnected);
    }

    fn on_message(&self, message: &Message) {
        let _ = self.tx.send(SessionEvent::Message(message.clone()));
    }

    fn on_error(&self, error: &SessionError) {
        let _ = self.tx.send(SessionEvent::Error(error.clone()));
    }
}

/// Append-only transcript plus the observer it is mirrored to
pub struct MessageBus {
    messages: Mutex<Vec<Message>>,
    observer: Arc<dyn SessionObserver>,
}

impl MessageBus {
    pub fn new(observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            observer,
        }
    }

    /// Record a message and hand it to the observer
    pub fn publish(&self, message: Message) {
        {
            let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
            messages.push(message.clone());
        }
        self.observer.on_message(&message);
    }

    pub fn connected(&self, session: &Session) {
        self.observer.on_connect(session);
    }

    pub fn disconnected(&self) {
        self.observer.on_disconnect();
    }

    pub fn error(&self, error: &SessionError) {
        self.observer.on_error(error);
    }

    /// Every message delivered so far, in delivery order
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
