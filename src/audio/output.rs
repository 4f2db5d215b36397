use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::{info, warn};

use super::backend::AudioFrame;
use super::file::{resample, to_mono};

/// Destination for played-back audio (speaker, file, nothing)
pub trait AudioOutput: Send {
    fn write_frame(&mut self, frame: &AudioFrame) -> Result<()>;

    /// Called when the sink is released
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Discards everything; the analyser still sees the audio
#[derive(Debug, Default)]
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn write_frame(&mut self, _frame: &AudioFrame) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Records everything the AI says into one mono WAV file
pub struct WavOutput {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    path: PathBuf,
    sample_rate: u32,
    samples_written: usize,
}

impl WavOutput {
    pub fn create(path: impl Into<PathBuf>, sample_rate: u32) -> Result<Self> {
        let path = path.into();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", path))?;

        info!("Writing playback to {}", path.display());

        Ok(Self {
            writer: Some(writer),
            path,
            sample_rate,
            samples_written: 0,
        })
    }

    pub fn samples_written(&self) -> usize {
        self.samples_written
    }
}

impl AudioOutput for WavOutput {
    fn write_frame(&mut self, frame: &AudioFrame) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            let mono = to_mono(&frame.samples, frame.channels);
            let converted = resample(&mono, frame.sample_rate, self.sample_rate);
            for sample in converted {
                writer
                    .write_sample(sample)
                    .context("Failed to write sample to WAV")?;
                self.samples_written += 1;
            }
        }

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().context("Failed to finalize WAV file")?;
            info!(
                "Playback capture complete: {} ({} samples)",
                self.path.display(),
                self.samples_written
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "wav"
    }
}

impl Drop for WavOutput {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}
