//! Payload decoder using symphonia
//!
//! Turns an encoded audio payload (WAV, MP3, Ogg Vorbis, FLAC) into
//! interleaved stereo f32 samples.
//!
//! - Mono payloads are duplicated to stereo
//! - Multi-channel payloads are downmixed to stereo
//! - A payload that yields no frames is a decode error

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::warn;

/// Container format of an encoded payload, sniffed from its magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Wav,
    Mp3,
    Ogg,
    Flac,
    Unknown,
}

impl AudioFormat {
    fn extension(&self) -> Option<&'static str> {
        match self {
            AudioFormat::Wav => Some("wav"),
            AudioFormat::Mp3 => Some("mp3"),
            AudioFormat::Ogg => Some("ogg"),
            AudioFormat::Flac => Some("flac"),
            AudioFormat::Unknown => None,
        }
    }

    /// MIME type reported alongside synthesized audio
    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Ogg => "audio/ogg",
            AudioFormat::Flac => "audio/flac",
            AudioFormat::Unknown => "application/octet-stream",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension().unwrap_or("unknown"))
    }
}

/// Identify the container format from the first bytes of a payload
pub fn sniff_format(bytes: &[u8]) -> AudioFormat {
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        AudioFormat::Wav
    } else if bytes.starts_with(b"ID3") || (bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0) {
        AudioFormat::Mp3
    } else if bytes.starts_with(b"OggS") {
        AudioFormat::Ogg
    } else if bytes.starts_with(b"fLaC") {
        AudioFormat::Flac
    } else {
        AudioFormat::Unknown
    }
}

/// Decoded stereo PCM
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedAudio {
    /// Interleaved stereo f32 samples [L, R, L, R, ...]
    pub samples: Vec<f32>,

    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    /// Playing time at the native sample rate
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

/// Decode a complete in-memory payload to stereo f32
pub fn decode_payload(bytes: &[u8]) -> Result<DecodedAudio> {
    if bytes.is_empty() {
        return Err(Error::Decode("empty payload".to_string()));
    }

    let format_tag = sniff_format(bytes);
    let mut hint = Hint::new();
    if let Some(ext) = format_tag.extension() {
        hint.with_extension(ext);
    }

    let cursor = Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::Decode(format!("unrecognised payload ({}): {}", format_tag, e)))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| Error::Decode("no audio track found".to_string()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let mut sample_rate = codec_params.sample_rate.unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(format!("unsupported codec: {}", e)))?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(Error::Decode(format!("read failed: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                // Corrupt frame; skip it and keep going
                warn!("Skipping undecodable packet: {}", msg);
                continue;
            }
            Err(e) => return Err(Error::Decode(format!("decode failed: {}", e))),
        };

        let spec = *decoded.spec();
        if sample_rate == 0 {
            sample_rate = spec.rate;
        }
        let channels = spec.channels.count();
        let frames = decoded.frames();
        if frames == 0 || channels == 0 {
            continue;
        }

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_planar_ref(decoded);
        append_stereo(&mut samples, buffer.samples(), channels, frames);
    }

    if samples.is_empty() {
        return Err(Error::Decode("payload contains no audio frames".to_string()));
    }
    if sample_rate == 0 {
        return Err(Error::Decode("payload has no sample rate".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Append planar samples as interleaved stereo
fn append_stereo(out: &mut Vec<f32>, planar: &[f32], channels: usize, frames: usize) {
    let plane = |ch: usize| &planar[ch * frames..(ch + 1) * frames];
    out.reserve(frames * 2);

    match channels {
        1 => {
            for &sample in plane(0) {
                out.push(sample);
                out.push(sample);
            }
        }
        2 => {
            let (left, right) = (plane(0), plane(1));
            for i in 0..frames {
                out.push(left[i]);
                out.push(right[i]);
            }
        }
        _ => {
            // Even channels to the left, odd to the right
            let scale = channels as f32 / 2.0;
            for i in 0..frames {
                let mut left = 0.0f32;
                let mut right = 0.0f32;
                for ch in 0..channels {
                    let sample = planar[ch * frames + i];
                    if ch % 2 == 0 {
                        left += sample;
                    } else {
                        right += sample;
                    }
                }
                out.push(left / scale);
                out.push(right / scale);
            }
        }
    }
}

// ========================================
// Tests
// ========================================
