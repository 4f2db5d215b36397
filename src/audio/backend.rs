use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::mpsc;

use super::capture::{CaptureSignal, SyntheticBackend};

/// Where an audio frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioStreamSource {
    /// Local microphone input
    Microphone,
    /// Remote participant track in a streaming room
    Remote,
    /// Synthesized reply decoded from backend audio
    Synthesized,
}

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since the stream started
    pub timestamp_ms: u64,
    /// Stream the frame belongs to
    pub source: AudioStreamSource,
}

impl AudioFrame {
    /// Same shape, every sample zeroed. A disabled track still produces frames.
    pub fn silenced(&self) -> AudioFrame {
        AudioFrame {
            samples: vec![0; self.samples.len()],
            ..self.clone()
        }
    }

    pub fn duration_ms(&self) -> u64 {
        let per_channel = self.samples.len() as u64 / self.channels.max(1) as u64;
        per_channel * 1000 / self.sample_rate.max(1) as u64
    }

    /// Little-endian PCM bytes, the layout used on the wire
    pub fn to_pcm_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

/// Configuration for audio capture and analysis
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Capture sample rate in Hz
    pub target_sample_rate: u32,
    /// Capture channel count (1 = mono, 2 = stereo)
    pub target_channels: u16,
    /// Frame size in milliseconds (affects latency)
    pub buffer_duration_ms: u64,
    /// Analyser window length, a power of two in 32..=32768
    pub fft_size: usize,
    /// Analyser smoothing between successive reads, 0.0..1.0
    pub smoothing_time_constant: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
    /// Pace synthesized playback at wall-clock speed
    pub realtime_playback: bool,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000, // 16kHz speech
            target_channels: 1,        // Mono
            buffer_duration_ms: 100,   // 100ms frames
            fft_size: 256,
            smoothing_time_constant: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
            realtime_playback: true,
        }
    }
}

impl AudioBackendConfig {
    /// Interleaved samples per capture frame
    pub fn samples_per_frame(&self) -> usize {
        let per_channel = self.target_sample_rate as u64 * self.buffer_duration_ms / 1000;
        per_channel as usize * self.target_channels as usize
    }
}

/// Audio capture backend trait
///
/// Implementations in this crate:
/// - File: stream a WAV file as if it were spoken into the microphone
/// - Tone: a steady sine wave (level meters, smoke tests)
/// - Silence: an open but silent input
///
/// Hardware devices plug in by implementing this trait.
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames.
    /// A refused device must surface an `std::io::Error` of kind
    /// `PermissionDenied` somewhere in the error chain.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create a capture backend for the given source
    pub fn create(source: AudioSource, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        let signal = match source {
            AudioSource::File(path) => CaptureSignal::File(path),
            AudioSource::Tone { frequency_hz } => {
                if !(frequency_hz > 0.0 && frequency_hz < config.target_sample_rate as f32 / 2.0) {
                    anyhow::bail!(
                        "Tone frequency {}Hz is outside (0, {}Hz)",
                        frequency_hz,
                        config.target_sample_rate / 2
                    );
                }
                CaptureSignal::Tone { frequency_hz }
            }
            AudioSource::Silence => CaptureSignal::Silence,
        };

        Ok(Box::new(SyntheticBackend::new(signal, config)))
    }
}

/// Audio source type
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// WAV file played into the input
    File(PathBuf),
    /// Sine tone at the given frequency
    Tone { frequency_hz: f32 },
    /// Silent input
    Silence,
}
