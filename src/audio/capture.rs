// Capture backends that produce microphone-shaped frames without a sound card

use anyhow::{bail, Result};
use std::f32::consts::PI;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame, AudioStreamSource};
use super::file::AudioFile;

/// What the synthetic input plays
#[derive(Debug, Clone)]
pub enum CaptureSignal {
    File(PathBuf),
    Tone { frequency_hz: f32 },
    Silence,
}

/// Paced capture backend: emits one frame per `buffer_duration_ms`
pub struct SyntheticBackend {
    signal: CaptureSignal,
    config: AudioBackendConfig,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    capturing: bool,
    name: String,
}

impl SyntheticBackend {
    pub fn new(signal: CaptureSignal, config: AudioBackendConfig) -> Self {
        let name = match &signal {
            CaptureSignal::File(path) => format!("file:{}", path.display()),
            CaptureSignal::Tone { frequency_hz } => format!("tone:{}Hz", frequency_hz),
            CaptureSignal::Silence => "silence".to_string(),
        };

        Self {
            signal,
            config,
            cancel: None,
            task: None,
            capturing: false,
            name,
        }
    }
}

/// Renders successive frames of the configured signal
struct SignalGenerator {
    prerendered: Option<Vec<i16>>,
    tone_hz: Option<f32>,
    sample_rate: u32,
    channels: u16,
    samples_per_frame: usize,
    position: usize,
}

impl SignalGenerator {
    fn next_samples(&mut self) -> Vec<i16> {
        let per_channel = self.samples_per_frame / self.channels.max(1) as usize;
        let start = self.position;
        self.position += per_channel;

        let mono: Vec<i16> = if let Some(source) = &self.prerendered {
            // Past the end of the file the input goes quiet
            (start..start + per_channel)
                .map(|i| source.get(i).copied().unwrap_or(0))
                .collect()
        } else if let Some(hz) = self.tone_hz {
            (start..start + per_channel)
                .map(|i| {
                    let t = i as f32 / self.sample_rate as f32;
                    ((2.0 * PI * hz * t).sin() * 0.5 * i16::MAX as f32) as i16
                })
                .collect()
        } else {
            vec![0; per_channel]
        };

        if self.channels <= 1 {
            mono
        } else {
            mono.iter()
                .flat_map(|&s| std::iter::repeat(s).take(self.channels as usize))
                .collect()
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for SyntheticBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing {
            bail!("Already capturing");
        }

        info!("Starting capture from {}", self.name);

        let prerendered = match &self.signal {
            CaptureSignal::File(path) => {
                let file = AudioFile::open(path)?;
                Some(file.resample_to_mono(self.config.target_sample_rate))
            }
            _ => None,
        };
        let tone_hz = match self.signal {
            CaptureSignal::Tone { frequency_hz } => Some(frequency_hz),
            _ => None,
        };

        let mut generator = SignalGenerator {
            prerendered,
            tone_hz,
            sample_rate: self.config.target_sample_rate,
            channels: self.config.target_channels,
            samples_per_frame: self.config.samples_per_frame(),
            position: 0,
        };

        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let frame_ms = self.config.buffer_duration_ms.max(1);
        let sample_rate = self.config.target_sample_rate;
        let channels = self.config.target_channels;
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(frame_ms));
            let mut timestamp_ms = 0u64;

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let frame = AudioFrame {
                    samples: generator.next_samples(),
                    sample_rate,
                    channels,
                    timestamp_ms,
                    source: AudioStreamSource::Microphone,
                };
                timestamp_ms += frame_ms;

                if tx.send(frame).await.is_err() {
                    break;
                }
            }

            debug!("Capture task stopped");
        });

        self.cancel = Some(cancel);
        self.task = Some(task);
        self.capturing = true;

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.capturing {
            return Ok(());
        }

        info!("Stopping capture from {}", self.name);

        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }

        self.capturing = false;

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SyntheticBackend {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}
