// Turn-based transport: record -> stop -> upload -> reply -> play back

use base64::Engine;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    EventSink, JoinOutcome, Transport, TransportContext, TransportEvent, TurnOutcome, SPEECH_FORMAT,
};
use crate::api::VoiceApi;
use crate::audio::{AudioResources, TurnRecorder};
use crate::error::{SessionError, SessionResult};
use crate::session::{Message, Session, TransportKind};

/// Longest typed turn the backend accepts
const MAX_TEXT_LEN: usize = 1000;

/// Explicit request/response conversation turns
pub struct TurnBasedTransport {
    api: VoiceApi,
    /// Session id recorded as soon as a join is attempted
    session: Mutex<Option<Session>>,
    active: Mutex<Option<ActiveConversation>>,
    turn: Mutex<TurnState>,
}

#[derive(Clone)]
struct ActiveConversation {
    session: Session,
    media: Arc<AudioResources>,
    events: EventSink,
    cancel: CancellationToken,
}

struct Recording {
    stop: CancellationToken,
    task: JoinHandle<TurnRecorder>,
}

/// Capture and turn submission share one lock so checks and claims are atomic
#[derive(Default)]
struct TurnState {
    recording: Option<Recording>,
    in_flight: bool,
}

/// Clears the in-flight flag however the turn ends
struct InFlight<'a>(&'a Mutex<TurnState>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).in_flight = false;
    }
}

impl TurnBasedTransport {
    pub fn new(api: VoiceApi) -> Self {
        Self {
            api,
            session: Mutex::new(None),
            active: Mutex::new(None),
            turn: Mutex::new(TurnState::default()),
        }
    }

    pub fn is_turn_in_flight(&self) -> bool {
        self.lock_turn().in_flight
    }

    fn lock_turn(&self) -> MutexGuard<'_, TurnState> {
        self.turn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn active(&self) -> SessionResult<ActiveConversation> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(SessionError::NotConnected)
    }

    /// Claim the turn and hand back whatever was being recorded
    fn claim_recorded_turn(&self) -> SessionResult<(InFlight<'_>, Option<Recording>)> {
        let mut turn = self.lock_turn();
        if turn.in_flight {
            return Err(SessionError::TurnInFlight);
        }
        turn.in_flight = true;
        let recording = turn.recording.take();
        Ok((InFlight(&self.turn), recording))
    }

    /// Claim the turn for typed input; refused while a turn is being recorded
    fn claim_text_turn(&self) -> SessionResult<InFlight<'_>> {
        let mut turn = self.lock_turn();
        if turn.in_flight || turn.recording.is_some() {
            return Err(SessionError::TurnInFlight);
        }
        turn.in_flight = true;
        Ok(InFlight(&self.turn))
    }

    fn take_recording(&self) -> Option<Recording> {
        self.lock_turn().recording.take()
    }
}

/// Synthesize `text` and play it, reporting playback trouble as a non-fatal event
async fn speak(api: &VoiceApi, conversation: &ActiveConversation, text: &str, emotion: Option<&str>) -> bool {
    let result = async {
        let audio = api
            .synthesize(text, emotion, SPEECH_FORMAT)
            .await
            .map_err(|e| SessionError::Playback(format!("Speech synthesis failed: {}", e)))?;
        play(conversation, audio, SPEECH_FORMAT).await
    }
    .await;

    report_playback(conversation, result)
}

/// Speaking events come from the voice listener installed at join
async fn play(conversation: &ActiveConversation, audio: Vec<u8>, format: &str) -> SessionResult<()> {
    conversation.media.play_encoded(audio, format).await
}

fn report_playback(conversation: &ActiveConversation, result: SessionResult<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(SessionError::Cancelled) => false,
        Err(e) => {
            warn!("Failed to play reply: {}", e);
            conversation.events.emit(TransportEvent::Failed(e));
            false
        }
    }
}

#[async_trait::async_trait]
impl Transport for TurnBasedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::TurnBased
    }

    async fn join(&self, context: TransportContext) -> SessionResult<JoinOutcome> {
        let TransportContext {
            session,
            media,
            events,
            cancel,
        } = context;

        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = Some(session.clone());
        media.set_voice_listener(events.voice_listener());

        info!("Starting conversation {} ({})", session.id, session.mode);

        let opening = self
            .api
            .start_conversation(&session.id, session.mode)
            .await
            .map_err(|e| SessionError::Negotiation(e.to_string()))?;

        let conversation = ActiveConversation {
            session,
            media,
            events,
            cancel,
        };
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(conversation.clone());

        conversation.events.message(Message::ai(opening.clone()));

        // The greeting plays in the background; the session is usable meanwhile
        let api = self.api.clone();
        let line = opening.clone();
        tokio::spawn(async move {
            let cancel = conversation.cancel.clone();
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = speak(&api, &conversation, &line, None) => {}
            }
        });

        Ok(JoinOutcome {
            opening_line: Some(opening),
            room: None,
        })
    }

    async fn start_recording(&self) -> SessionResult<()> {
        let conversation = self.active()?;

        let mut turn = self.lock_turn();
        if turn.in_flight {
            return Err(SessionError::TurnInFlight);
        }
        if turn.recording.is_some() {
            debug!("Already recording");
            return Ok(());
        }

        let config = conversation.media.config();
        let mut recorder = TurnRecorder::new(config.target_sample_rate, config.target_channels);
        let mut input = conversation.media.subscribe_input();
        let stop = conversation.cancel.child_token();
        let task_stop = stop.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_stop.cancelled() => break,
                    frame = input.recv() => match frame {
                        Ok(frame) => recorder.push(&frame),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Turn recorder lagged, {} frames dropped", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            recorder
        });

        turn.recording = Some(Recording { stop, task });
        // Still under the lock so a racing stop reports after this
        conversation.events.emit(TransportEvent::Recording(true));
        drop(turn);
        info!("Recording turn for {}", conversation.session.id);

        Ok(())
    }

    async fn stop_recording(&self) -> SessionResult<TurnOutcome> {
        let conversation = self.active()?;
        let (_in_flight, recording) = self.claim_recorded_turn()?;

        let Some(recording) = recording else {
            debug!("stop_recording without an active recording");
            return Ok(TurnOutcome::default());
        };

        recording.stop.cancel();
        let recorder = recording
            .task
            .await
            .map_err(|e| SessionError::Turn(format!("Recorder task failed: {}", e)))?;

        let events = &conversation.events;
        events.emit(TransportEvent::Recording(false));
        events.emit(TransportEvent::Processing(true));

        let result = async {
            let turn = recorder
                .finish()
                .map_err(|e| SessionError::Turn(format!("{:#}", e)))?;

            info!(
                "Uploading turn for {}: {}ms, {} bytes",
                conversation.session.id,
                turn.duration_ms,
                turn.wav.len()
            );

            self.api
                .submit_audio(
                    &conversation.session.id,
                    conversation.session.mode,
                    turn.wav,
                    "recording.wav",
                    "audio/wav",
                )
                .await
                .map_err(|e| SessionError::Turn(e.to_string()))
        }
        .await;

        events.emit(TransportEvent::Processing(false));
        let reply = result?;

        // User first: transcript and reply arrive together
        if !reply.user_text.is_empty() {
            events.message(Message::user(reply.user_text.clone()));
        }
        if !reply.ai_text.is_empty() {
            events.message(Message::ai(reply.ai_text.clone()));
        }

        let mut played = false;
        if let Some(encoded) = reply.audio.as_deref().filter(|a| !a.is_empty()) {
            let format = reply.audio_format.as_deref().unwrap_or(SPEECH_FORMAT);
            let result = match base64::engine::general_purpose::STANDARD.decode(encoded) {
                Ok(audio) => play(&conversation, audio, format).await,
                Err(e) => Err(SessionError::Playback(format!("Reply audio is not base64: {}", e))),
            };
            played = report_playback(&conversation, result);
        }

        events.emit(TransportEvent::TurnCompleted);

        Ok(TurnOutcome {
            user_text: Some(reply.user_text).filter(|t| !t.is_empty()),
            ai_text: Some(reply.ai_text).filter(|t| !t.is_empty()),
            played,
        })
    }

    async fn send_text(&self, text: &str) -> SessionResult<TurnOutcome> {
        let conversation = self.active()?;

        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::Turn("Message is empty".to_string()));
        }
        if text.chars().count() > MAX_TEXT_LEN {
            return Err(SessionError::Turn(format!(
                "Message is longer than {} characters",
                MAX_TEXT_LEN
            )));
        }

        let _in_flight = self.claim_text_turn()?;
        let events = &conversation.events;

        events.message(Message::user(text));
        events.emit(TransportEvent::Processing(true));

        let result = self
            .api
            .submit_text(&conversation.session.id, conversation.session.mode, text)
            .await
            .map_err(|e| SessionError::Turn(e.to_string()));

        events.emit(TransportEvent::Processing(false));
        let reply = result?;

        events.message(Message::ai(reply.text.clone()));
        let played = speak(&self.api, &conversation, &reply.text, reply.emotion.as_deref()).await;

        events.emit(TransportEvent::TurnCompleted);

        Ok(TurnOutcome {
            user_text: Some(text.to_string()),
            ai_text: Some(reply.text),
            played,
        })
    }

    async fn leave(&self) -> SessionResult<()> {
        if let Some(recording) = self.take_recording() {
            recording.stop.cancel();
            recording.task.abort();
        }

        let active = self.active.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(conversation) = &active {
            conversation.cancel.cancel();
        }

        let session = self.session.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(session) = session {
            info!("Ending conversation {}", session.id);
            if let Err(e) = self.api.end_conversation(&session.id).await {
                warn!("Failed to end conversation {}: {}", session.id, e);
            }
        }

        Ok(())
    }
}
