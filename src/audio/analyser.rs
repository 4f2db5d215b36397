// Frequency-domain level analyser for input/output visualization
//
// Mirrors the Web Audio AnalyserNode: the most recent `fft_size` samples are
// Blackman-windowed, transformed, smoothed against the previous read, and
// mapped from [min_decibels, max_decibels] onto 0..=255.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::{Arc, Mutex};

use super::backend::{AudioBackendConfig, AudioFrame};

pub struct FrequencyAnalyser {
    fft_size: usize,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    state: Mutex<AnalyserState>,
}

struct AnalyserState {
    /// Circular buffer of the last `fft_size` mono samples in -1.0..1.0
    ring: Vec<f32>,
    write_pos: usize,
    smoothed: Vec<f32>,
}

impl FrequencyAnalyser {
    pub fn new(config: &AudioBackendConfig) -> Self {
        let fft_size = config.fft_size.clamp(32, 32768).next_power_of_two();

        let window = (0..fft_size)
            .map(|n| {
                let x = n as f32 / fft_size as f32;
                0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
            })
            .collect();
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);

        Self {
            fft_size,
            smoothing: config.smoothing_time_constant.clamp(0.0, 1.0),
            min_db: config.min_decibels,
            max_db: config.max_decibels.max(config.min_decibels + 1.0),
            window,
            fft,
            state: Mutex::new(AnalyserState {
                ring: vec![0.0; fft_size],
                write_pos: 0,
                smoothed: vec![0.0; fft_size / 2],
            }),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Length of every snapshot returned by `byte_frequency_data`
    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Feed a frame; multi-channel frames are averaged to mono
    pub fn push_frame(&self, frame: &AudioFrame) {
        let channels = frame.channels.max(1) as usize;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        for chunk in frame.samples.chunks(channels) {
            let sum: f32 = chunk.iter().map(|&s| s as f32).sum();
            let value = sum / chunk.len() as f32 / 32768.0;
            let pos = state.write_pos;
            state.ring[pos] = value;
            state.write_pos = (pos + 1) % self.fft_size;
        }
    }

    /// Current spectrum snapshot, `frequency_bin_count()` bytes long
    pub fn byte_frequency_data(&self) -> Vec<u8> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let n = self.fft_size;

        // Oldest sample first
        let mut spectrum: Vec<Complex<f32>> = (0..n)
            .map(|i| Complex::new(state.ring[(state.write_pos + i) % n] * self.window[i], 0.0))
            .collect();
        self.fft.process(&mut spectrum);

        let range = self.max_db - self.min_db;
        let mut out = Vec::with_capacity(n / 2);

        for (k, bin) in spectrum.iter().take(n / 2).enumerate() {
            let magnitude = bin.norm() / n as f32;

            let smoothed = self.smoothing * state.smoothed[k] + (1.0 - self.smoothing) * magnitude;
            state.smoothed[k] = if smoothed.is_finite() { smoothed } else { 0.0 };

            let db = 20.0 * state.smoothed[k].log10();
            let scaled = if db.is_finite() {
                (255.0 / range * (db - self.min_db)).floor()
            } else {
                0.0
            };
            out.push(scaled.clamp(0.0, 255.0) as u8);
        }

        out
    }

    /// Forget all history, as if freshly created
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.ring.iter_mut().for_each(|s| *s = 0.0);
        state.smoothed.iter_mut().for_each(|s| *s = 0.0);
        state.write_pos = 0;
    }
}
