// Integration tests for turn capture and playback capture
//
// These tests verify that captured frames become a valid WAV upload and that
// played audio lands in the WAV output sink.

use anyhow::Result;
use aussie_voice::audio::{AudioFile, AudioFrame, AudioOutput, AudioStreamSource, TurnRecorder, WavOutput};
use std::io::Cursor;
use tempfile::TempDir;

fn frame(samples: Vec<i16>, sample_rate: u32, channels: u16, timestamp_ms: u64) -> AudioFrame {
    AudioFrame {
        samples,
        sample_rate,
        channels,
        timestamp_ms,
        source: AudioStreamSource::Microphone,
    }
}

#[test]
fn test_turn_recorder_collects_frames() -> Result<()> {
    let mut recorder = TurnRecorder::new(16000, 1);

    // 5 frames of 100ms
    for i in 0..5 {
        recorder.push(&frame(vec![i as i16; 1600], 16000, 1, i * 100));
    }
    assert_eq!(recorder.sample_count(), 8000);

    let turn = recorder.finish()?;
    assert_eq!(turn.sample_count, 8000);
    assert_eq!(turn.duration_ms, 500);

    let reader = hound::WavReader::new(Cursor::new(turn.wav))?;
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 16000);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);

    let samples: Vec<i16> = reader.into_samples::<i16>().collect::<Result<_, _>>()?;
    assert_eq!(samples.len(), 8000);
    assert_eq!(samples[0], 0);
    assert_eq!(samples[7999], 4);

    Ok(())
}

#[test]
fn test_empty_turn_is_still_a_valid_wav() -> Result<()> {
    let turn = TurnRecorder::new(16000, 1).finish()?;

    assert_eq!(turn.sample_count, 0);
    assert_eq!(turn.duration_ms, 0);
    assert!(turn.wav.starts_with(b"RIFF"));

    let reader = hound::WavReader::new(Cursor::new(turn.wav))?;
    assert_eq!(reader.len(), 0);

    Ok(())
}

#[test]
fn test_first_frame_sets_the_format() -> Result<()> {
    let mut recorder = TurnRecorder::new(16000, 1);
    recorder.push(&frame(vec![1, 2, 3, 4], 48000, 2, 0));

    let turn = recorder.finish()?;
    let reader = hound::WavReader::new(Cursor::new(turn.wav))?;
    assert_eq!(reader.spec().sample_rate, 48000);
    assert_eq!(reader.spec().channels, 2);

    Ok(())
}

#[test]
fn test_wav_output_writes_mono_at_target_rate() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("reply.wav");

    let mut output = WavOutput::create(&path, 16000)?;
    // 100ms of stereo 32kHz: mixed down and halved in rate
    output.write_frame(&AudioFrame {
        samples: vec![1000; 6400],
        sample_rate: 32000,
        channels: 2,
        timestamp_ms: 0,
        source: AudioStreamSource::Synthesized,
    })?;
    assert_eq!(output.samples_written(), 1600);
    output.close()?;

    let audio = AudioFile::open(&path)?;
    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples.len(), 1600);
    assert!(audio.samples.iter().all(|&s| s == 1000));

    Ok(())
}

#[test]
fn test_wav_output_finalizes_on_drop() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("dropped.wav");

    {
        let mut output = WavOutput::create(&path, 16000)?;
        output.write_frame(&frame(vec![5; 160], 16000, 1, 0))?;
    }

    let audio = AudioFile::open(&path)?;
    assert_eq!(audio.samples.len(), 160);

    Ok(())
}

#[test]
fn test_wav_output_close_is_idempotent() -> Result<()> {
    let dir = TempDir::new()?;
    let mut output = WavOutput::create(dir.path().join("twice.wav"), 16000)?;

    output.close()?;
    output.close()?;
    // Writes after close are ignored
    output.write_frame(&frame(vec![1; 16], 16000, 1, 0))?;
    assert_eq!(output.samples_written(), 0);

    Ok(())
}
