// Decoding of synthesized reply audio (mp3 / wav / ogg) into PCM frames

use anyhow::{anyhow, Context, Result};
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use super::backend::{AudioFrame, AudioStreamSource};

/// Fully decoded clip, interleaved i16
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn duration_ms(&self) -> u64 {
        let per_channel = self.samples.len() as u64 / self.channels.max(1) as u64;
        per_channel * 1000 / self.sample_rate.max(1) as u64
    }

    /// Split into frames of roughly `frame_ms` each
    pub fn into_frames(self, frame_ms: u64) -> Vec<AudioFrame> {
        let channels = self.channels.max(1) as usize;
        let per_frame = (self.sample_rate as u64 * frame_ms.max(1) / 1000).max(1) as usize * channels;

        self.samples
            .chunks(per_frame)
            .enumerate()
            .map(|(i, chunk)| AudioFrame {
                samples: chunk.to_vec(),
                sample_rate: self.sample_rate,
                channels: self.channels,
                timestamp_ms: i as u64 * frame_ms,
                source: AudioStreamSource::Synthesized,
            })
            .collect()
    }
}

/// Decode an encoded clip; `format` is an extension hint such as "mp3"
pub fn decode_audio(bytes: Vec<u8>, format: &str) -> Result<DecodedAudio> {
    if bytes.is_empty() {
        anyhow::bail!("Empty audio payload");
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    let extension = format.trim().trim_start_matches("audio/").to_ascii_lowercase();
    if !extension.is_empty() {
        hint.with_extension(if extension == "mpeg" { "mp3" } else { extension.as_str() });
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .context("Unrecognized audio container")?;
    let mut reader = probed.format;

    let track = reader
        .default_track()
        .ok_or_else(|| anyhow!("Audio payload has no tracks"))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Unsupported audio codec")?;

    let mut samples = Vec::new();

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e).context("Failed to read audio packet"),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;

                let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("Skipping undecodable packet: {}", e);
            }
            Err(e) => return Err(e).context("Failed to decode audio"),
        }
    }

    if sample_rate == 0 || channels == 0 {
        anyhow::bail!("Audio payload has no decodable stream");
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}
