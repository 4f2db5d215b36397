//! Session lifecycle state machine
//!
//! [`SessionController`] owns the one active conversation: it acquires the
//! audio resources, drives the selected [`Transport`], and delivers everything
//! the host needs through a [`MessageBus`].
//!
//! Every path that ends a session (`end_session`, a fatal transport error,
//! the room closing, dropping the controller) runs the same teardown. Late
//! continuations from a session that has already ended are recognised by a
//! generation counter and do nothing.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bus::{MessageBus, SessionObserver};
use super::config::{PracticeMode, SessionConfig, TransportKind};
use super::id::generate_session_id;
use super::model::{ConnectionStatus, Indicators, Message, Session, SessionSnapshot};
use super::stats::SessionStats;
use crate::api::VoiceApi;
use crate::audio::{AudioPipeline, AudioResources};
use crate::error::{SessionError, SessionResult};
use crate::transport::{
    create_transport, EventSink, Transport, TransportContext, TransportEvent, TransportFactory,
    TurnOutcome,
};

/// Upper bound on telling the backend we left
const LEAVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Drives one voice conversation at a time
pub struct SessionController {
    shared: Arc<Shared>,
}

struct Shared {
    pipeline: AudioPipeline,
    transport_kind: TransportKind,
    transport_factory: TransportFactory,
    bus: MessageBus,
    /// Bumped whenever a session starts or ends
    generation: AtomicU64,
    state: Mutex<State>,
    /// Serializes resource acquisition across overlapping starts
    start_gate: tokio::sync::Mutex<()>,
    /// Held while observer callbacks run, so they never interleave
    delivery: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct State {
    status: ConnectionStatus,
    session: Option<Session>,
    indicators: Indicators,
    resources: Option<Arc<AudioResources>>,
    transport: Option<Arc<dyn Transport>>,
    events: Option<EventSink>,
    cancel: Option<CancellationToken>,
    pump: Option<JoinHandle<()>>,
    turns_completed: usize,
}

/// What is left to do after the synchronous part of teardown
struct Teardown {
    transport: Option<Arc<dyn Transport>>,
    was_connected: bool,
}

impl SessionController {
    /// Controller using the transport named in `config`
    pub fn new(
        api: VoiceApi,
        pipeline: AudioPipeline,
        config: SessionConfig,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let kind = config.transport;
        let factory: TransportFactory =
            Arc::new(move |_session: &Session| create_transport(kind, api.clone(), &config));
        Self::with_transport_factory(pipeline, kind, observer, factory)
    }

    /// Controller with a caller-supplied transport per session
    pub fn with_transport_factory(
        pipeline: AudioPipeline,
        transport_kind: TransportKind,
        observer: Arc<dyn SessionObserver>,
        transport_factory: TransportFactory,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                pipeline,
                transport_kind,
                transport_factory,
                bus: MessageBus::new(observer),
                generation: AtomicU64::new(0),
                state: Mutex::new(State::default()),
                start_gate: tokio::sync::Mutex::new(()),
                delivery: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Start a conversation in `mode`
    ///
    /// Resolves once the transport has joined and any opening line has been
    /// delivered. Fails with `AlreadyActive` if a session is connecting or
    /// connected, and with `Cancelled` if `end_session` overtakes it.
    pub async fn start_session(&self, mode: PracticeMode) -> SessionResult<Session> {
        let shared = &self.shared;

        let (generation, session, cancel) = {
            let mut state = shared.lock_state();
            if state.status != ConnectionStatus::Disconnected {
                warn!("start_session rejected: session already {:?}", state.status);
                return Err(SessionError::AlreadyActive);
            }

            let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let session = Session {
                id: generate_session_id(),
                mode,
                transport: shared.transport_kind,
                started_at: Utc::now(),
            };
            let cancel = CancellationToken::new();

            state.status = ConnectionStatus::Connecting;
            state.session = Some(session.clone());
            state.indicators = Indicators::default();
            state.cancel = Some(cancel.clone());
            state.turns_completed = 0;

            (generation, session, cancel)
        };

        info!(
            "Starting session {} ({}, {})",
            session.id, session.mode, session.transport
        );

        let result = self.connect(generation, &session, &cancel).await;

        match result {
            Ok(()) => {
                info!("Session {} connected", session.id);
                Ok(session)
            }
            Err(SessionError::Cancelled) => {
                info!("Start of session {} cancelled", session.id);
                Err(SessionError::Cancelled)
            }
            Err(e) => {
                error!("Failed to start session {}: {}", session.id, e);
                if shared.shutdown(Some(generation), Some(e.clone())).await {
                    Err(e)
                } else {
                    Err(SessionError::Cancelled)
                }
            }
        }
    }

    async fn connect(
        &self,
        generation: u64,
        session: &Session,
        cancel: &CancellationToken,
    ) -> SessionResult<()> {
        let shared = &self.shared;

        let (transport, events) = {
            let gate = shared.start_gate.lock().await;

            let resources = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                resources = shared.pipeline.acquire() => resources?,
            };

            let (events, rx) = EventSink::channel();
            let transport = (shared.transport_factory)(session);

            {
                let mut state = shared.lock_state();
                if !shared.is_current(generation) {
                    drop(state);
                    resources.dispose();
                    return Err(SessionError::Cancelled);
                }
                state.resources = Some(Arc::clone(&resources));
                state.transport = Some(Arc::clone(&transport));
                state.events = Some(events.clone());
            }
            drop(gate);

            let context = TransportContext {
                session: session.clone(),
                media: resources,
                events: events.clone(),
                cancel: cancel.clone(),
            };

            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                joined = transport.join(context) => Some(joined),
            };

            match joined {
                Some(Ok(outcome)) if shared.is_current(generation) => {
                    if let Some(room) = &outcome.room {
                        info!("Session {} joined room {}", session.id, room);
                    }
                }
                Some(Err(e)) if shared.is_current(generation) => return Err(e),
                _ => {
                    // Whatever the join got to before being overtaken
                    leave_quietly(transport.as_ref()).await;
                    return Err(SessionError::Cancelled);
                }
            }

            if !shared.go_live(generation, rx).await {
                leave_quietly(transport.as_ref()).await;
                return Err(SessionError::Cancelled);
            }

            (transport, events)
        };

        debug!("Session {} using {:?} transport", session.id, transport.kind());

        // Opening line (if any) reaches the observer before start returns
        flush(&events, cancel).await;
        Ok(())
    }

    /// End the active session. Safe to call at any time, any number of times.
    pub async fn end_session(&self) {
        if self.shared.shutdown(None, None).await {
            info!("Session ended");
        }
    }

    /// Flip the microphone between muted and live; returns the new muted state
    pub fn toggle_mute(&self) -> bool {
        let mut state = self.shared.lock_state();
        let muted = !state.indicators.is_muted;
        Self::apply_mute(&mut state, muted);
        state.indicators.is_muted
    }

    pub fn mute(&self) {
        Self::apply_mute(&mut self.shared.lock_state(), true);
    }

    pub fn unmute(&self) {
        Self::apply_mute(&mut self.shared.lock_state(), false);
    }

    fn apply_mute(state: &mut State, muted: bool) {
        if state.status != ConnectionStatus::Connected {
            return;
        }
        let Some(resources) = &state.resources else {
            return;
        };

        resources.set_input_enabled(!muted);
        state.indicators.is_muted = muted;
        state.indicators.is_listening = !muted;
        debug!("Microphone {}", if muted { "muted" } else { "live" });
    }

    /// Begin capturing a spoken turn
    pub async fn start_recording(&self) -> SessionResult<()> {
        self.with_transport(|transport| async move { transport.start_recording().await })
            .await
    }

    /// Finish the spoken turn and wait for the reply to play
    pub async fn stop_recording(&self) -> SessionResult<TurnOutcome> {
        self.with_transport(|transport| async move { transport.stop_recording().await })
            .await
    }

    /// Typed turn
    pub async fn send_text(&self, text: &str) -> SessionResult<TurnOutcome> {
        let text = text.to_string();
        self.with_transport(|transport| async move { transport.send_text(&text).await })
            .await
    }

    async fn with_transport<T, F, Fut>(&self, op: F) -> SessionResult<T>
    where
        F: FnOnce(Arc<dyn Transport>) -> Fut,
        Fut: Future<Output = SessionResult<T>>,
    {
        let shared = &self.shared;

        let (generation, transport, events, cancel) = {
            let state = shared.lock_state();
            match (&state.status, &state.transport, &state.events, &state.cancel) {
                (ConnectionStatus::Connected, Some(transport), Some(events), Some(cancel)) => (
                    shared.generation.load(Ordering::SeqCst),
                    Arc::clone(transport),
                    events.clone(),
                    cancel.clone(),
                ),
                _ => return Err(SessionError::NotConnected),
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            result = op(transport) => result,
        };

        if !shared.is_current(generation) {
            return Err(SessionError::Cancelled);
        }

        // Transcripts from this turn are delivered before the caller hears back
        flush(&events, &cancel).await;

        match result {
            Ok(value) => Ok(value),
            Err(e @ (SessionError::Turn(_) | SessionError::Playback(_))) => {
                warn!("Turn failed: {}", e);
                shared
                    .deliver(generation, |bus| bus.error(&e))
                    .await;
                Err(e)
            }
            Err(e) if e.is_fatal() && e != SessionError::Cancelled => {
                error!("Session failed: {}", e);
                shared.shutdown(Some(generation), Some(e.clone())).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Input level bins, `None` when no session holds the microphone
    pub fn input_byte_frequency_data(&self) -> Option<Vec<u8>> {
        let state = self.shared.lock_state();
        state
            .resources
            .as_ref()
            .and_then(|r| r.input_byte_frequency_data())
    }

    /// Output level bins, `None` until something has been played
    pub fn output_byte_frequency_data(&self) -> Option<Vec<u8>> {
        let state = self.shared.lock_state();
        state
            .resources
            .as_ref()
            .and_then(|r| r.output_byte_frequency_data())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.shared.lock_state();
        SessionSnapshot {
            status: state.status,
            session: state.session.clone(),
            indicators: state.indicators,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.lock_state().status
    }

    pub fn session(&self) -> Option<Session> {
        self.shared.lock_state().session.clone()
    }

    pub fn indicators(&self) -> Indicators {
        self.shared.lock_state().indicators
    }

    pub fn stats(&self) -> SessionStats {
        let state = self.shared.lock_state();
        let started_at = state.session.as_ref().map(|s| s.started_at);
        let duration_secs = started_at
            .map(|start| (Utc::now() - start).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);

        SessionStats {
            session_id: state.session.as_ref().map(|s| s.id.clone()),
            status: state.status,
            started_at,
            duration_secs,
            turns_completed: state.turns_completed,
            messages_count: self.shared.bus.len(),
        }
    }

    /// Full transcript, in delivery order
    pub fn messages(&self) -> Vec<Message> {
        self.shared.bus.messages()
    }

    /// Audio resource sets currently alive
    pub fn live_audio_resources(&self) -> usize {
        self.shared.pipeline.live_resources()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        let Some(teardown) = self.shared.teardown_locked(None) else {
            return;
        };

        info!("Session controller dropped with a live session");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let shared = Arc::clone(&self.shared);
                handle.spawn(async move { shared.finish_teardown(teardown, None).await });
            }
            Err(_) => warn!("No runtime available; skipping transport leave"),
        }
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Run an observer callback unless the session has moved on
    async fn deliver(&self, generation: u64, f: impl FnOnce(&MessageBus)) {
        let _delivery = self.delivery.lock().await;
        if self.is_current(generation) {
            f(&self.bus);
        }
    }

    /// Mark the session connected, notify the host, start delivering events
    async fn go_live(
        self: &Arc<Self>,
        generation: u64,
        rx: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> bool {
        let _delivery = self.delivery.lock().await;

        let session = {
            let mut state = self.lock_state();
            if !self.is_current(generation) {
                return false;
            }
            state.status = ConnectionStatus::Connected;
            state.indicators = Indicators {
                is_listening: true,
                ..Indicators::default()
            };
            state.pump = Some(tokio::spawn(Arc::clone(self).pump(generation, rx)));
            state.session.clone()
        };

        if let Some(session) = session {
            self.bus.connected(&session);
        }
        true
    }

    /// Deliver transport events in order until the session ends
    async fn pump(self: Arc<Self>, generation: u64, mut rx: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = rx.recv().await {
            if let TransportEvent::Barrier(ack) = event {
                let _ = ack.send(());
                continue;
            }

            let _delivery = self.delivery.lock().await;
            if !self.is_current(generation) {
                break;
            }
            if !self.handle_event(generation, event) {
                break;
            }
        }
        debug!("Event delivery stopped");
    }

    /// Returns false once the session is ending
    fn handle_event(self: &Arc<Self>, generation: u64, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Message(message) => self.bus.publish(message),
            TransportEvent::SpeakingStarted => self.lock_state().indicators.is_speaking = true,
            TransportEvent::SpeakingStopped => self.lock_state().indicators.is_speaking = false,
            TransportEvent::Recording(on) => self.lock_state().indicators.is_recording = on,
            TransportEvent::Processing(on) => self.lock_state().indicators.is_processing = on,
            TransportEvent::TurnCompleted => self.lock_state().turns_completed += 1,
            TransportEvent::Failed(e) if e.is_fatal() => {
                error!("Transport failed: {}", e);
                let shared = Arc::clone(self);
                tokio::spawn(async move { shared.shutdown(Some(generation), Some(e)).await });
                return false;
            }
            TransportEvent::Failed(e) => {
                warn!("Recoverable session error: {}", e);
                self.bus.error(&e);
            }
            TransportEvent::Closed => {
                info!("Remote side closed the session");
                let shared = Arc::clone(self);
                tokio::spawn(async move { shared.shutdown(Some(generation), None).await });
                return false;
            }
            TransportEvent::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
        true
    }

    /// End the session if it is still `expected` (any session when `None`).
    /// Returns whether this call did the teardown.
    async fn shutdown(&self, expected: Option<u64>, error: Option<SessionError>) -> bool {
        match self.teardown_locked(expected) {
            Some(teardown) => {
                self.finish_teardown(teardown, error).await;
                true
            }
            None => false,
        }
    }

    /// Synchronous half of teardown: invalidate, cancel, release audio
    fn teardown_locked(&self, expected: Option<u64>) -> Option<Teardown> {
        let (resources, teardown) = {
            let mut state = self.lock_state();

            if let Some(expected) = expected {
                if !self.is_current(expected) {
                    return None;
                }
            }
            if state.status == ConnectionStatus::Disconnected {
                return None;
            }

            self.generation.fetch_add(1, Ordering::SeqCst);
            let was_connected = state.status == ConnectionStatus::Connected;

            if let Some(cancel) = state.cancel.take() {
                cancel.cancel();
            }
            if let Some(pump) = state.pump.take() {
                pump.abort();
            }

            if let Some(session) = &state.session {
                info!("Tearing down session {}", session.id);
            }

            state.status = ConnectionStatus::Disconnected;
            state.session = None;
            state.indicators = Indicators::default();
            state.events = None;

            (
                state.resources.take(),
                Teardown {
                    transport: state.transport.take(),
                    was_connected,
                },
            )
        };

        if let Some(resources) = resources {
            resources.dispose();
        }

        Some(teardown)
    }

    /// Asynchronous half: leave the transport, then tell the host
    async fn finish_teardown(&self, teardown: Teardown, error: Option<SessionError>) {
        if let Some(transport) = teardown.transport {
            leave_quietly(transport.as_ref()).await;
        }

        let _delivery = self.delivery.lock().await;
        if let Some(error) = &error {
            self.bus.error(error);
        }
        if teardown.was_connected {
            self.bus.disconnected();
        }
    }
}

/// Leave, logging rather than propagating trouble
async fn leave_quietly(transport: &dyn Transport) {
    match tokio::time::timeout(LEAVE_TIMEOUT, transport.leave()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to leave transport: {}", e),
        Err(_) => warn!("Timed out leaving transport"),
    }
}

/// Wait until every event queued so far has been handled
async fn flush(events: &EventSink, cancel: &CancellationToken) {
    let barrier = events.barrier();
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = barrier => {}
    }
}
