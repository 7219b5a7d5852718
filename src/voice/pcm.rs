//! PCM sample conversion and wire framing
//!
//! Outbound audio is 16-bit little-endian mono PCM, base64 encoded, tagged
//! with an `audio/pcm;rate=N` content type. Inbound audio uses the same
//! encoding at the output rate.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;

use crate::{Error, Result};

/// Sample rate for microphone frames sent to the model
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of audio returned by the model
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Channel count of audio returned by the model
pub const OUTPUT_CHANNELS: u16 = 1;

/// Samples per outbound frame
pub const BLOCK_SIZE: usize = 256;

/// Scale between normalized floats and 16-bit integers
const I16_SCALE: f32 = 32768.0;

/// Convert a normalized sample to 16-bit PCM
///
/// Computes `round(s * 32768)` and clamps to the `i16` range so loud input
/// saturates instead of wrapping around.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * I16_SCALE)
        .round()
        .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

/// Convert a 16-bit PCM sample to a normalized float
#[must_use]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / I16_SCALE
}

/// Encode normalized samples as 16-bit little-endian PCM bytes
#[must_use]
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| f32_to_i16(s).to_le_bytes())
        .collect()
}

/// Decode 16-bit little-endian PCM bytes into normalized samples
///
/// # Errors
///
/// Returns `Error::Decode` if the byte count is odd
pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16_to_f32(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// Content type tag for raw PCM at the given rate
#[must_use]
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// One outbound block of microphone audio, ready for the wire
///
/// Serializes as `{ "data": ..., "mimeType": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFrame {
    /// Base64 encoded PCM16LE samples
    pub data: String,
    /// Content type declaring the sample rate
    pub mime_type: String,
    /// Number of samples in the frame
    #[serde(skip)]
    pub sample_count: usize,
    /// Declared input sample rate
    #[serde(skip)]
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Encode a block of normalized samples
    #[must_use]
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        Self {
            data: STANDARD.encode(encode_pcm16(samples)),
            mime_type: pcm_mime_type(sample_rate),
            sample_count: samples.len(),
            sample_rate,
        }
    }

    /// Decode the frame back into normalized samples
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if the payload is not valid base64 PCM16
    pub fn samples(&self) -> Result<Vec<f32>> {
        let bytes = STANDARD
            .decode(&self.data)
            .map_err(|e| Error::Decode(e.to_string()))?;
        decode_pcm16(&bytes)
    }
}

/// A decoded block of model audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    /// Interleaved normalized samples
    pub samples: Vec<f32>,
    /// Samples per second per channel
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
}

impl AudioSegment {
    /// Number of frames (samples per channel)
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    /// Playback duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }
}

/// Decode a base64 PCM16 payload into a playable segment
///
/// # Errors
///
/// Returns `Error::Decode` for invalid base64, odd byte counts, empty
/// payloads, or sample counts that do not divide into whole frames
pub fn decode_segment(payload: &str, sample_rate: u32, channels: u16) -> Result<AudioSegment> {
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| Error::Decode(format!("invalid base64: {e}")))?;

    if bytes.is_empty() {
        return Err(Error::Decode("empty audio payload".to_string()));
    }

    let samples = decode_pcm16(&bytes)?;
    if samples.len() % usize::from(channels.max(1)) != 0 {
        return Err(Error::Decode(format!(
            "{} samples do not divide into {channels} channels",
            samples.len()
        )));
    }

    Ok(AudioSegment {
        samples,
        sample_rate,
        channels,
    })
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| wav_error("writer", &e))?;

        for &sample in samples {
            writer
                .write_sample(f32_to_i16(sample))
                .map_err(|e| wav_error("write", &e))?;
        }

        writer
            .finalize()
            .map_err(|e| wav_error("finalize", &e))?;
    }

    Ok(cursor.into_inner())
}

fn wav_error(stage: &str, e: &hound::Error) -> Error {
    Error::Audio(format!("wav {stage}: {e}"))
}
