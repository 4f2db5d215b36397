use anyhow::{Context, Result};
use hound::WavReader;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

/// A WAV file loaded fully into memory
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        // Open separately so an io::Error stays in the chain for permission checks
        let file = File::open(path)
            .with_context(|| format!("Failed to open audio file: {}", path.display()))?;

        let reader = WavReader::new(BufReader::new(file)).context("Failed to read WAV header")?;

        let spec = reader.spec();
        let samples: Vec<i16> = match spec.sample_format {
            hound::SampleFormat::Int if spec.bits_per_sample <= 16 => reader
                .into_samples::<i16>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            hound::SampleFormat::Int => {
                let shift = spec.bits_per_sample.saturating_sub(16);
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| (v >> shift) as i16))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read audio samples")?
            }
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
        };

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Convert to the capture format (mono mixdown, then rate conversion)
    pub fn resample_to_mono(&self, target_rate: u32) -> Vec<i16> {
        let mono = to_mono(&self.samples, self.channels);
        resample(&mono, self.sample_rate, target_rate)
    }
}

/// Average interleaved channels down to one
pub fn to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels as usize)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Linear-interpolation rate conversion of a mono signal
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = pos - idx as f64;
            let value = samples[idx] as f64 * (1.0 - frac) + samples[next] as f64 * frac;
            value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
        })
        .collect()
}
