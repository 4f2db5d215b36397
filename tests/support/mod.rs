// Shared fixtures: an in-process voice backend, fake capture backends and
// a scripted transport for driving the controller.

#![allow(dead_code)]

use anyhow::Result;
use aussie_voice::audio::{
    AudioBackend, AudioBackendConfig, AudioFrame, AudioPipeline, AudioSource,
};
use aussie_voice::error::{SessionError, SessionResult};
use aussie_voice::room::{PayloadStream, RoomConnector, RoomEvent, RoomLink};
use aussie_voice::session::{ChannelObserver, Session, SessionEvent, TransportKind};
use aussie_voice::transport::{
    JoinOutcome, Transport, TransportContext, TransportEvent, TurnOutcome,
};
use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use base64::Engine;
use futures::StreamExt;
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

pub const OPENING_LINE: &str = "G'day! Ready to practice?";
pub const USER_TEXT: &str = "How ya going?";
pub const AI_TEXT: &str = "Not bad mate, not bad at all.";

/// Audio settings that keep tests fast and deterministic
pub fn test_audio_config() -> AudioBackendConfig {
    AudioBackendConfig {
        buffer_duration_ms: 20,
        realtime_playback: false,
        ..AudioBackendConfig::default()
    }
}

pub fn tone_pipeline() -> AudioPipeline {
    AudioPipeline::new(AudioSource::Tone { frequency_hz: 440.0 }, test_audio_config())
}

/// 16-bit mono WAV bytes
pub fn wav_bytes(sample_rate: u32, samples: &[i16]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// `ms` milliseconds of a 440Hz tone as WAV
pub fn tone_wav(sample_rate: u32, ms: u32) -> Vec<u8> {
    let count = (sample_rate * ms / 1000) as usize;
    let samples: Vec<i16> = (0..count)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            ((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 8000.0) as i16
        })
        .collect();
    wav_bytes(sample_rate, &samples)
}

// ---------------------------------------------------------------------------
// Mock voice backend
// ---------------------------------------------------------------------------

/// How the mock backend behaves
#[derive(Debug, Clone)]
pub struct Behaviour {
    pub expected_token: Option<String>,
    pub fail_start: bool,
    pub fail_room: bool,
    pub fail_audio: bool,
    pub fail_tts: bool,
    /// TTS answers with bytes that are not audio
    pub garbage_tts: bool,
    pub start_delay: Option<Duration>,
    pub audio_delay: Option<Duration>,
    pub room_url: String,
    /// Include synthesized audio in the audio-turn reply
    pub reply_audio: bool,
    pub text_delay: Option<Duration>,
    /// Length of every TTS clip
    pub tts_ms: u32,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            expected_token: None,
            fail_start: false,
            fail_room: false,
            fail_audio: false,
            fail_tts: false,
            garbage_tts: false,
            start_delay: None,
            audio_delay: None,
            // Nothing listens here
            room_url: "nats://127.0.0.1:1/practice-room".to_string(),
            reply_audio: true,
            text_delay: None,
            tts_ms: 150,
        }
    }
}

/// One multipart upload as the backend saw it
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub session_id: String,
    pub mode: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub audio: Vec<u8>,
}

#[derive(Default)]
pub struct Recorded {
    pub calls: Mutex<Vec<String>>,
    pub session_ids: Mutex<Vec<String>>,
    pub uploads: Mutex<Vec<Upload>>,
    pub tts_texts: Mutex<Vec<(String, Option<String>)>>,
}

struct MockState {
    behaviour: Behaviour,
    recorded: Arc<Recorded>,
}

pub struct MockBackend {
    pub base_url: String,
    pub recorded: Arc<Recorded>,
    server: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    pub async fn start(behaviour: Behaviour) -> Self {
        let recorded = Arc::new(Recorded::default());
        let state = Arc::new(MockState {
            behaviour,
            recorded: Arc::clone(&recorded),
        });

        let api = Router::new()
            .route("/voice/room", post(create_room))
            .route("/voice/room/:name", delete(delete_room))
            .route("/voice/conversation/start", post(start_conversation))
            .route("/voice/conversation/audio", post(audio_turn))
            .route("/voice/conversation", post(text_turn))
            .route("/voice/conversation/end", post(end_conversation))
            .route("/voice/tts", post(tts))
            .route("/voice/status", get(status))
            .with_state(state);
        let app = Router::new().nest("/api", api);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}/api", addr),
            recorded,
            server,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.recorded.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.recorded.uploads.lock().unwrap().clone()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.recorded.session_ids.lock().unwrap().clone()
    }

    pub fn api(&self) -> aussie_voice::VoiceApi {
        aussie_voice::VoiceApi::new(self.base_url.clone(), None, Duration::from_secs(5)).unwrap()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

type Rejection = (StatusCode, Json<Value>);

fn record(state: &MockState, headers: &HeaderMap, call: &str) -> Result<(), Rejection> {
    state.recorded.calls.lock().unwrap().push(call.to_string());

    if let Some(expected) = &state.behaviour.expected_token {
        let header = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if header != format!("Bearer {}", expected) {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Missing or invalid token" })),
            ));
        }
    }
    Ok(())
}

fn failure(detail: &str) -> Rejection {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "detail": detail })),
    )
}

async fn create_room(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, Rejection> {
    record(&state, &headers, "POST /voice/room")?;
    if state.behaviour.fail_room {
        return Err(failure("Voice rooms are unavailable"));
    }
    Ok(Json(json!({
        "room_url": state.behaviour.room_url,
        "token": "room-token",
        "mode": body["mode"],
    })))
}

async fn delete_room(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<Value>, Rejection> {
    record(&state, &headers, &format!("DELETE /voice/room/{}", name))?;
    Ok(Json(json!({ "success": true })))
}

async fn start_conversation(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, Rejection> {
    record(&state, &headers, "POST /voice/conversation/start")?;
    if let Some(id) = body["sessionId"].as_str() {
        state.recorded.session_ids.lock().unwrap().push(id.to_string());
    }
    if let Some(delay) = state.behaviour.start_delay {
        tokio::time::sleep(delay).await;
    }
    if state.behaviour.fail_start {
        return Err(failure("Conversation service unavailable"));
    }
    Ok(Json(json!({ "message": OPENING_LINE })))
}

async fn audio_turn(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Value>, Rejection> {
    record(&state, &headers, "POST /voice/conversation/audio")?;

    let mut upload = Upload::default();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" => {
                upload.file_name = field.file_name().map(str::to_string);
                upload.content_type = field.content_type().map(str::to_string);
                upload.audio = field.bytes().await.unwrap().to_vec();
            }
            "sessionId" => upload.session_id = field.text().await.unwrap(),
            "mode" => upload.mode = field.text().await.unwrap(),
            _ => {}
        }
    }
    state.recorded.uploads.lock().unwrap().push(upload);

    if let Some(delay) = state.behaviour.audio_delay {
        tokio::time::sleep(delay).await;
    }
    if state.behaviour.fail_audio {
        return Err(failure("Speech recognition failed"));
    }

    let audio = state
        .behaviour
        .reply_audio
        .then(|| base64::engine::general_purpose::STANDARD.encode(tone_wav(16000, 200)));

    Ok(Json(json!({
        "userText": USER_TEXT,
        "aiText": AI_TEXT,
        "emotion": "cheerful",
        "audio": audio,
        "audioFormat": "wav",
    })))
}

async fn text_turn(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, Rejection> {
    record(&state, &headers, "POST /voice/conversation")?;
    let said = body["userText"].as_str().unwrap_or_default();
    if let Some(delay) = state.behaviour.text_delay {
        tokio::time::sleep(delay).await;
    }
    Ok(Json(json!({
        "text": format!("You said: {}", said),
        "emotion": "friendly",
    })))
}

async fn end_conversation(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(_body): Json<Value>,
) -> Result<Json<Value>, Rejection> {
    record(&state, &headers, "POST /voice/conversation/end")?;
    Ok(Json(json!({ "success": true })))
}

async fn tts(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(rejection) = record(&state, &headers, "POST /voice/tts") {
        return rejection.into_response();
    }
    state.recorded.tts_texts.lock().unwrap().push((
        body["text"].as_str().unwrap_or_default().to_string(),
        body["emotion"].as_str().map(str::to_string),
    ));

    if state.behaviour.fail_tts {
        return failure("TTS provider down").into_response();
    }
    if state.behaviour.garbage_tts {
        return (StatusCode::OK, b"definitely not audio".to_vec()).into_response();
    }
    (StatusCode::OK, tone_wav(22050, state.behaviour.tts_ms)).into_response()
}

async fn status(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Result<Json<Value>, Rejection> {
    record(&state, &headers, "GET /voice/status")?;
    Ok(Json(json!({ "ready": true, "stt": true, "tts": true })))
}

// ---------------------------------------------------------------------------
// Capture backends
// ---------------------------------------------------------------------------

/// Refuses to open, like a denied microphone prompt
pub struct DeniedBackend;

#[async_trait::async_trait]
impl AudioBackend for DeniedBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        Err(anyhow::Error::new(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "user dismissed the prompt",
        ))
        .context("Failed to open microphone"))
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "denied"
    }
}

/// Opens after `delay`, then never produces a frame
pub struct QuietBackend {
    delay: Duration,
    sender: Option<mpsc::Sender<AudioFrame>>,
    pub starts: Arc<AtomicUsize>,
}

impl QuietBackend {
    pub fn new(delay: Duration, starts: Arc<AtomicUsize>) -> Self {
        Self {
            delay,
            sender: None,
            starts,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for QuietBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        tokio::time::sleep(self.delay).await;
        self.starts.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(1);
        self.sender = Some(tx);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.sender = None;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.sender.is_some()
    }

    fn name(&self) -> &str {
        "quiet"
    }
}

pub fn quiet_pipeline(delay: Duration) -> (AudioPipeline, Arc<AtomicUsize>) {
    let starts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&starts);
    let pipeline = AudioPipeline::with_backend(test_audio_config(), move || {
        Ok(Box::new(QuietBackend::new(delay, Arc::clone(&counter))) as Box<dyn AudioBackend>)
    });
    (pipeline, starts)
}

// ---------------------------------------------------------------------------
// Scripted transport
// ---------------------------------------------------------------------------

/// Transport whose join and events are driven by the test
pub struct ScriptedTransport {
    pub join_delay: Duration,
    pub join_error: Option<SessionError>,
    pub opening_line: Option<String>,
    pub joins: AtomicUsize,
    pub leaves: AtomicUsize,
    context: Mutex<Option<TransportContext>>,
    pub joined: Notify,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            join_delay: Duration::ZERO,
            join_error: None,
            opening_line: None,
            joins: AtomicUsize::new(0),
            leaves: AtomicUsize::new(0),
            context: Mutex::new(None),
            joined: Notify::new(),
        }
    }

    /// Push an event as if the backend produced it
    pub fn emit(&self, event: TransportEvent) {
        if let Some(context) = self.context.lock().unwrap().as_ref() {
            context.events.emit(event);
        }
    }

    pub fn context(&self) -> Option<TransportContext> {
        self.context.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::TurnBased
    }

    async fn join(&self, context: TransportContext) -> SessionResult<JoinOutcome> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        *self.context.lock().unwrap() = Some(context.clone());
        self.joined.notify_one();

        tokio::time::sleep(self.join_delay).await;
        if let Some(e) = &self.join_error {
            return Err(e.clone());
        }
        if let Some(line) = &self.opening_line {
            context.events.message(aussie_voice::Message::ai(line.clone()));
        }
        Ok(JoinOutcome {
            opening_line: self.opening_line.clone(),
            room: None,
        })
    }

    async fn start_recording(&self) -> SessionResult<()> {
        Ok(())
    }

    async fn stop_recording(&self) -> SessionResult<TurnOutcome> {
        Ok(TurnOutcome::default())
    }

    async fn send_text(&self, text: &str) -> SessionResult<TurnOutcome> {
        let context = self.context().ok_or(SessionError::NotConnected)?;
        context.events.message(aussie_voice::Message::user(text));
        Ok(TurnOutcome {
            user_text: Some(text.to_string()),
            ai_text: None,
            played: false,
        })
    }

    async fn leave(&self) -> SessionResult<()> {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing out one shared scripted transport
pub fn scripted_factory(
    transport: Arc<ScriptedTransport>,
) -> aussie_voice::transport::TransportFactory {
    Arc::new(move |_session: &Session| Arc::clone(&transport) as Arc<dyn Transport>)
}

// ---------------------------------------------------------------------------
// In-memory room
// ---------------------------------------------------------------------------

/// Room whose bot side is driven by the test
///
/// Publishes land in the mock backend's call log so their order against
/// REST calls can be checked.
pub struct FakeRoom {
    participant: OnceLock<String>,
    events_tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    audio_tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    audio_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    log: Arc<Recorded>,
    pub published_frames: AtomicUsize,
    pub published_events: Mutex<Vec<RoomEvent>>,
}

impl FakeRoom {
    pub fn new(backend: &MockBackend) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            participant: OnceLock::new(),
            events_tx: Mutex::new(Some(events_tx)),
            events_rx: Mutex::new(Some(events_rx)),
            audio_tx: Mutex::new(Some(audio_tx)),
            audio_rx: Mutex::new(Some(audio_rx)),
            log: Arc::clone(&backend.recorded),
            published_frames: AtomicUsize::new(0),
            published_events: Mutex::new(Vec::new()),
        })
    }

    /// Deliver an event as if the bot published it
    pub fn send_event(&self, event: &RoomEvent) {
        if let Some(tx) = self.events_tx.lock().unwrap().as_ref() {
            let _ = tx.send(serde_json::to_vec(event).unwrap());
        }
    }

    /// Deliver one frame of bot audio
    pub fn send_audio(&self, frame: &AudioFrame, sequence: u32) {
        let message = aussie_voice::room::AudioFrameMessage::from_frame("bot-1", frame, sequence, false);
        if let Some(tx) = self.audio_tx.lock().unwrap().as_ref() {
            let _ = tx.send(serde_json::to_vec(&message).unwrap());
        }
    }

    /// The server goes away: both subscriptions end
    pub fn hang_up(&self) {
        self.events_tx.lock().unwrap().take();
        self.audio_tx.lock().unwrap().take();
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn RoomConnector> {
        Arc::new(FakeConnector(Arc::clone(self)))
    }

    fn stream(slot: &Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>) -> Result<PayloadStream> {
        let rx = slot
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow::anyhow!("already subscribed"))?;
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|payload| (payload, rx))
        })
        .boxed())
    }
}

#[async_trait::async_trait]
impl RoomLink for FakeRoom {
    fn participant_id(&self) -> &str {
        self.participant.get().map(String::as_str).unwrap_or_default()
    }

    async fn subscribe_events(&self) -> Result<PayloadStream> {
        Self::stream(&self.events_rx)
    }

    async fn subscribe_remote_audio(&self) -> Result<PayloadStream> {
        Self::stream(&self.audio_rx)
    }

    async fn publish_event(&self, event: &RoomEvent) -> Result<()> {
        let kind = serde_json::to_value(event)?["type"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        self.log.calls.lock().unwrap().push(format!("PUBLISH {}", kind));
        self.published_events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn publish_audio_frame(&self, _frame: &AudioFrame, _sequence: u32, _is_final: bool) -> Result<()> {
        self.published_frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.log.calls.lock().unwrap().push("CLOSE room".to_string());
        Ok(())
    }
}

struct FakeConnector(Arc<FakeRoom>);

#[async_trait::async_trait]
impl RoomConnector for FakeConnector {
    async fn connect(&self, _room_url: &str, _token: &str, participant_id: String) -> Result<Arc<dyn RoomLink>> {
        let _ = self.0.participant.set(participant_id);
        Ok(Arc::clone(&self.0) as Arc<dyn RoomLink>)
    }
}

// ---------------------------------------------------------------------------
// Observer helpers
// ---------------------------------------------------------------------------

pub fn observer() -> (Arc<ChannelObserver>, mpsc::UnboundedReceiver<SessionEvent>) {
    let (observer, rx) = ChannelObserver::new();
    (Arc::new(observer), rx)
}

/// Everything delivered so far
pub fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Wait briefly for background delivery, then drain
pub async fn settle(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    tokio::time::sleep(Duration::from_millis(100)).await;
    drain(rx)
}

pub fn errors(events: &[SessionEvent]) -> Vec<SessionError> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Error(err) => Some(err.clone()),
            _ => None,
        })
        .collect()
}

pub fn count_connected(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Connected(_)))
        .count()
}

pub fn count_disconnected(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Disconnected))
        .count()
}
