use anyhow::{Context, Result};
use std::io::Cursor;

use super::backend::AudioFrame;

/// Audio captured for one conversation turn
#[derive(Debug, Clone)]
pub struct RecordedTurn {
    /// Complete WAV file (header included, even when empty)
    pub wav: Vec<u8>,
    pub sample_count: usize,
    pub duration_ms: u64,
}

/// Collects input frames between `start_recording` and `stop_recording`
#[derive(Debug)]
pub struct TurnRecorder {
    sample_rate: u32,
    channels: u16,
    samples: Vec<i16>,
}

impl TurnRecorder {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            samples: Vec::new(),
        }
    }

    pub fn push(&mut self, frame: &AudioFrame) {
        // The format is fixed by the first frame of the turn
        if self.samples.is_empty() {
            self.sample_rate = frame.sample_rate;
            self.channels = frame.channels.max(1);
        }
        self.samples.extend_from_slice(&frame.samples);
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Encode what was captured as 16-bit PCM WAV
    pub fn finish(self) -> Result<RecordedTurn> {
        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .context("Failed to start WAV encoding")?;
            for &sample in &self.samples {
                writer
                    .write_sample(sample)
                    .context("Failed to write sample to WAV")?;
            }
            writer.finalize().context("Failed to finalize WAV")?;
        }

        let per_channel = self.samples.len() as u64 / self.channels as u64;

        Ok(RecordedTurn {
            wav: cursor.into_inner(),
            sample_count: self.samples.len(),
            duration_ms: per_channel * 1000 / self.sample_rate.max(1) as u64,
        })
    }
}
