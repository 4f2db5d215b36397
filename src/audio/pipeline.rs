// Scoped ownership of every audio handle a session holds
//
// `AudioPipeline::acquire` opens the microphone and returns one
// `AudioResources` record. Everything the session touches (capture task,
// input/output analysers, playback sink, the voice currently playing) hangs
// off that record and is released by its single `dispose()`.

use anyhow::Result;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::analyser::FrequencyAnalyser;
use super::backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource};
use super::decode::decode_audio;
use super::output::{AudioOutput, NullOutput};
use crate::error::{SessionError, SessionResult};

type BackendProvider = Arc<dyn Fn() -> Result<Box<dyn AudioBackend>> + Send + Sync>;
type OutputProvider = Arc<dyn Fn() -> Result<Box<dyn AudioOutput>> + Send + Sync>;

/// Told `true` when AI audio starts and `false` once nothing is playing
///
/// One voice taking over from another is not reported: audio never stopped.
pub type VoiceListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Builds `AudioResources` for each session
#[derive(Clone)]
pub struct AudioPipeline {
    config: AudioBackendConfig,
    backend_provider: BackendProvider,
    output_provider: OutputProvider,
    live: Arc<AtomicUsize>,
}

impl AudioPipeline {
    /// Capture from one of the built-in sources, discard playback
    pub fn new(source: AudioSource, config: AudioBackendConfig) -> Self {
        let backend_config = config.clone();
        Self::with_backend(config, move || {
            AudioBackendFactory::create(source.clone(), backend_config.clone())
        })
    }

    /// Capture from a custom backend, created fresh for every session
    pub fn with_backend<F>(config: AudioBackendConfig, provider: F) -> Self
    where
        F: Fn() -> Result<Box<dyn AudioBackend>> + Send + Sync + 'static,
    {
        Self {
            config,
            backend_provider: Arc::new(provider),
            output_provider: Arc::new(|| Ok(Box::new(NullOutput) as Box<dyn AudioOutput>)),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Route playback to a custom sink
    pub fn with_output<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Result<Box<dyn AudioOutput>> + Send + Sync + 'static,
    {
        self.output_provider = Arc::new(provider);
        self
    }

    pub fn config(&self) -> &AudioBackendConfig {
        &self.config
    }

    /// Resource sets created and not yet disposed
    pub fn live_resources(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Open the microphone and build the input graph
    pub async fn acquire(&self) -> SessionResult<Arc<AudioResources>> {
        let output = (self.output_provider)()
            .map_err(|e| SessionError::AudioDevice(format!("{:#}", e)))?;

        let mut backend = (self.backend_provider)().map_err(|e| classify_capture_error(&e))?;

        info!("Acquiring microphone via {}", backend.name());

        let frames = backend.start().await.map_err(|e| classify_capture_error(&e))?;

        let resources = Arc::new(AudioResources::new(
            self.config.clone(),
            output,
            Arc::clone(&self.live),
        ));
        resources.spawn_capture(backend, frames);

        Ok(resources)
    }
}

/// Map a capture failure onto the session taxonomy
fn classify_capture_error(err: &anyhow::Error) -> SessionError {
    let denied = err.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .map_or(false, |e| e.kind() == io::ErrorKind::PermissionDenied)
    });

    if denied {
        SessionError::PermissionDenied(format!("{:#}", err))
    } else {
        SessionError::AudioDevice(format!("{:#}", err))
    }
}

/// Every audio handle owned by one session
pub struct AudioResources {
    config: AudioBackendConfig,
    input_analyser: Arc<FrequencyAnalyser>,
    output_analyser: OnceLock<Arc<FrequencyAnalyser>>,
    input_enabled: Arc<AtomicBool>,
    input_frames: broadcast::Sender<AudioFrame>,
    sink: Mutex<Box<dyn AudioOutput>>,
    voice: Mutex<Option<(u64, CancellationToken)>>,
    voice_counter: AtomicU64,
    voice_listener: Mutex<Option<VoiceListener>>,
    cancel: CancellationToken,
    live: Arc<AtomicUsize>,
    disposed: AtomicBool,
}

impl AudioResources {
    fn new(config: AudioBackendConfig, sink: Box<dyn AudioOutput>, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        let (input_frames, _) = broadcast::channel(256);

        Self {
            input_analyser: Arc::new(FrequencyAnalyser::new(&config)),
            output_analyser: OnceLock::new(),
            input_enabled: Arc::new(AtomicBool::new(true)),
            input_frames,
            sink: Mutex::new(sink),
            voice: Mutex::new(None),
            voice_counter: AtomicU64::new(0),
            voice_listener: Mutex::new(None),
            cancel: CancellationToken::new(),
            live,
            disposed: AtomicBool::new(false),
            config,
        }
    }

    /// Forward captured frames to the analyser and subscribers until disposed
    fn spawn_capture(&self, mut backend: Box<dyn AudioBackend>, mut frames: mpsc::Receiver<AudioFrame>) {
        let cancel = self.cancel.clone();
        let analyser = Arc::clone(&self.input_analyser);
        let enabled = Arc::clone(&self.input_enabled);
        let subscribers = self.input_frames.clone();

        tokio::spawn(async move {
            debug!("Input forwarding started ({})", backend.name());

            loop {
                let frame = tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = frames.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                };

                let frame = if enabled.load(Ordering::SeqCst) {
                    frame
                } else {
                    frame.silenced()
                };

                analyser.push_frame(&frame);
                // No subscribers is fine (nobody recording)
                let _ = subscribers.send(frame);
            }

            if let Err(e) = backend.stop().await {
                warn!("Failed to stop capture backend: {}", e);
            }

            debug!("Input forwarding stopped");
        });
    }

    pub fn config(&self) -> &AudioBackendConfig {
        &self.config
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Enable or silence the input track without reopening the device
    pub fn set_input_enabled(&self, enabled: bool) {
        self.input_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_input_enabled(&self) -> bool {
        self.input_enabled.load(Ordering::SeqCst)
    }

    /// Receive every input frame from now on (muted frames arrive silenced)
    pub fn subscribe_input(&self) -> broadcast::Receiver<AudioFrame> {
        self.input_frames.subscribe()
    }

    pub fn input_byte_frequency_data(&self) -> Option<Vec<u8>> {
        if self.is_disposed() {
            return None;
        }
        Some(self.input_analyser.byte_frequency_data())
    }

    /// `None` until something has been played
    pub fn output_byte_frequency_data(&self) -> Option<Vec<u8>> {
        if self.is_disposed() {
            return None;
        }
        self.output_analyser.get().map(|a| a.byte_frequency_data())
    }

    pub fn has_output_analyser(&self) -> bool {
        self.output_analyser.get().is_some()
    }

    /// Decode a synthesized clip and play it through the sink
    ///
    /// Returns once playback finishes or is interrupted by another voice or by
    /// disposal.
    pub async fn play_encoded(&self, bytes: Vec<u8>, format: &str) -> SessionResult<()> {
        if self.is_disposed() {
            return Err(SessionError::Cancelled);
        }

        let format = format.to_string();
        let decoded = tokio::task::spawn_blocking(move || decode_audio(bytes, &format))
            .await
            .map_err(|e| SessionError::Playback(format!("Decoder task failed: {}", e)))?
            .map_err(|e| SessionError::Playback(format!("{:#}", e)))?;

        debug!(
            "Playing synthesized clip: {}ms at {}Hz",
            decoded.duration_ms(),
            decoded.sample_rate
        );

        let frame_ms = self.config.buffer_duration_ms.max(1);
        let (voice_id, voice) = self.begin_voice();
        let mut result = Ok(());

        for frame in decoded.into_frames(frame_ms) {
            if voice.is_cancelled() {
                break;
            }
            if let Err(e) = self.emit_output(&frame) {
                result = Err(e);
                break;
            }
            if self.config.realtime_playback {
                let pace = Duration::from_millis(frame.duration_ms());
                tokio::select! {
                    _ = voice.cancelled() => break,
                    _ = tokio::time::sleep(pace) => {}
                }
            }
        }

        self.end_voice(voice_id);
        result
    }

    /// Play a live remote track until it ends or another voice takes over
    pub async fn play_track(&self, mut track: mpsc::Receiver<AudioFrame>) -> SessionResult<()> {
        if self.is_disposed() {
            return Err(SessionError::Cancelled);
        }

        let (voice_id, voice) = self.begin_voice();
        let mut result = Ok(());

        loop {
            let frame = tokio::select! {
                _ = voice.cancelled() => break,
                frame = track.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };
            if let Err(e) = self.emit_output(&frame) {
                result = Err(e);
                break;
            }
        }

        self.end_voice(voice_id);
        result
    }

    /// Interrupt whatever is playing
    pub fn stop_playback(&self) {
        let mut voice = self.voice.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, token)) = voice.take() {
            token.cancel();
            self.notify_voice(false);
        }
    }

    /// Report voice start/stop, replacing any earlier listener
    pub fn set_voice_listener(&self, listener: VoiceListener) {
        let mut slot = self.voice_listener.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(listener);
    }

    pub fn is_playing(&self) -> bool {
        let voice = self.voice.lock().unwrap_or_else(|e| e.into_inner());
        voice.is_some()
    }

    /// Only one voice at a time: starting one silences the previous
    fn begin_voice(&self) -> (u64, CancellationToken) {
        let id = self.voice_counter.fetch_add(1, Ordering::SeqCst);
        let token = self.cancel.child_token();

        let mut voice = self.voice.lock().unwrap_or_else(|e| e.into_inner());
        match voice.replace((id, token.clone())) {
            Some((_, previous)) => previous.cancel(),
            None => self.notify_voice(true),
        }

        (id, token)
    }

    /// Only the current voice may report silence
    fn end_voice(&self, id: u64) {
        let mut voice = self.voice.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(voice.as_ref(), Some((current, _)) if *current == id) {
            *voice = None;
            self.notify_voice(false);
        }
    }

    // Called with the voice lock held so reports follow voice order
    fn notify_voice(&self, speaking: bool) {
        let listener = self
            .voice_listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(listener) = listener {
            listener(speaking);
        }
    }

    fn emit_output(&self, frame: &AudioFrame) -> SessionResult<()> {
        let analyser = self
            .output_analyser
            .get_or_init(|| Arc::new(FrequencyAnalyser::new(&self.config)));
        analyser.push_frame(frame);

        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        sink.write_frame(frame)
            .map_err(|e| SessionError::Playback(format!("{} sink: {:#}", sink.name(), e)))
    }

    /// Release every handle. Safe to call any number of times.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Stops the capture task (which stops the backend) and every voice
        self.cancel.cancel();
        self.stop_playback();

        {
            let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = sink.close() {
                warn!("Failed to close {} sink: {}", sink.name(), e);
            }
        }

        self.live.fetch_sub(1, Ordering::SeqCst);
        info!("Audio resources released");
    }
}

impl Drop for AudioResources {
    fn drop(&mut self) {
        self.dispose();
    }
}
