// Integration tests for audio file processing
//
// These tests verify that we can read WAV files, convert them to the capture
// format, and decode synthesized reply audio.

use anyhow::Result;
use aussie_voice::audio::file::{resample, to_mono};
use aussie_voice::audio::{decode_audio, AudioFile, AudioStreamSource};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

mod support;

fn write_wav(dir: &Path, name: &str, sample_rate: u32, channels: u16, samples: &[i16]) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
    path
}

#[test]
fn test_audio_file_open() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_wav(dir.path(), "phrase.wav", 16000, 1, &vec![100; 8000]);

    let audio = AudioFile::open(&path)?;

    assert!((audio.duration_seconds - 0.5).abs() < 0.001);
    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples.len(), 8000);
    assert!(audio.path.contains("phrase.wav"));

    Ok(())
}

#[test]
fn test_audio_file_interleaved_channels() -> Result<()> {
    let dir = TempDir::new()?;
    let samples: Vec<i16> = (0..400).map(|i| if i % 2 == 0 { 1000 } else { -1000 }).collect();
    let path = write_wav(dir.path(), "stereo.wav", 8000, 2, &samples);

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.channels, 2);
    assert_eq!(audio.samples.len() % audio.channels as usize, 0);
    assert!((audio.duration_seconds - 0.025).abs() < 0.001);

    Ok(())
}

#[test]
fn test_audio_file_nonexistent() {
    let result = AudioFile::open("/nonexistent/path/to/audio.wav");
    assert!(result.is_err(), "Opening nonexistent file should fail");
}

#[test]
fn test_audio_file_not_a_wav() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("notes.wav");
    std::fs::write(&path, b"this is not a riff header")?;

    assert!(AudioFile::open(&path).is_err());
    Ok(())
}

#[test]
fn test_resample_to_mono_16khz() -> Result<()> {
    let dir = TempDir::new()?;
    // 100ms of stereo at 48kHz
    let path = write_wav(dir.path(), "hifi.wav", 48000, 2, &vec![500; 9600]);

    let audio = AudioFile::open(&path)?;
    let converted = audio.resample_to_mono(16000);

    assert_eq!(converted.len(), 1600, "100ms at 16kHz mono");
    assert!(converted.iter().all(|&s| s == 500));

    Ok(())
}

#[test]
fn test_to_mono_averages_channels() {
    assert_eq!(to_mono(&[100, 300, -50, 50], 2), vec![200, 0]);
    assert_eq!(to_mono(&[1, 2, 3], 1), vec![1, 2, 3]);
}

#[test]
fn test_resample_interpolates() {
    assert_eq!(resample(&[0, 100], 1, 2), vec![0, 50, 100, 100]);
    assert_eq!(resample(&[7, 8, 9], 16000, 16000), vec![7, 8, 9]);
    assert!(resample(&[], 8000, 16000).is_empty());
}

#[test]
fn test_decode_wav_reply() -> Result<()> {
    let bytes = support::tone_wav(22050, 200);

    let decoded = decode_audio(bytes, "wav")?;

    assert_eq!(decoded.sample_rate, 22050);
    assert_eq!(decoded.channels, 1);
    assert_eq!(decoded.samples.len(), 4410);
    assert_eq!(decoded.duration_ms(), 200);

    Ok(())
}

#[test]
fn test_decode_splits_into_frames() -> Result<()> {
    let decoded = decode_audio(support::tone_wav(16000, 250), "audio/wav")?;
    let frames = decoded.into_frames(100);

    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].samples.len(), 1600);
    assert_eq!(frames[2].samples.len(), 800);
    assert_eq!(frames[1].timestamp_ms, 100);
    assert!(frames.iter().all(|f| f.source == AudioStreamSource::Synthesized));

    Ok(())
}

#[test]
fn test_decode_rejects_garbage() {
    assert!(decode_audio(Vec::new(), "mp3").is_err());
    assert!(decode_audio(b"definitely not audio".to_vec(), "mp3").is_err());
}
