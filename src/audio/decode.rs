//! PCM16 payload decoding.
//!
//! The synthesis service returns speech as a base64 string wrapping raw
//! little-endian signed 16-bit mono samples at 24 kHz.  [`decode`] turns that
//! payload into a [`DecodedAudio`] buffer of normalised `f32` samples ready
//! for the [`PlaybackEngine`](crate::audio::PlaybackEngine).
//!
//! ```rust
//! use voice_commander::audio::decode;
//!
//! // Two frames: 0x0000 and 0x7FFF (little-endian).
//! let audio = decode("AAD/fw==").unwrap();
//! assert_eq!(audio.frame_count(), 2);
//! assert_eq!(audio.sample_rate, 24_000);
//! assert!((audio.samples[1] - 0.99997).abs() < 1e-4);
//! ```

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

/// Sample rate guaranteed by the synthesis service.
pub const SYNTHESIS_SAMPLE_RATE: u32 = 24_000;

/// Channel count guaranteed by the synthesis service.
pub const SYNTHESIS_CHANNELS: u16 = 1;

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

/// Errors raised while decoding a synthesized audio payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The payload is not valid base64.
    #[error("invalid base64 audio payload: {0}")]
    InvalidBase64(String),

    /// WAV encoding of a decoded buffer failed.
    #[error("failed to encode WAV: {0}")]
    Wav(String),
}

// ---------------------------------------------------------------------------
// DecodedAudio
// ---------------------------------------------------------------------------

/// A mono buffer of normalised samples plus its stream metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Amplitudes in `[-1.0, 1.0)`, one per frame.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count (always 1 for synthesized speech).
    pub channels: u16,
}

impl DecodedAudio {
    /// Number of frames in the buffer.
    pub fn frame_count(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    /// Playback length of the buffer.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / f64::from(self.sample_rate))
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Encode the buffer as a 16-bit PCM WAV file.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        encode_wav(&self.samples, self.sample_rate, self.channels)
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode a base64 PCM16 payload at the synthesis sample rate (24 kHz).
///
/// # Errors
///
/// Returns [`DecodeError::InvalidBase64`] when the payload cannot be decoded.
/// A trailing partial frame is dropped rather than treated as an error.
pub fn decode(base64: &str) -> Result<DecodedAudio, DecodeError> {
    decode_with_rate(base64, SYNTHESIS_SAMPLE_RATE)
}

/// Decode a base64 PCM16 payload, tagging it with a caller-supplied rate.
///
/// The rate is never derived from the stream itself.
pub fn decode_with_rate(base64: &str, sample_rate: u32) -> Result<DecodedAudio, DecodeError> {
    // Some relays wrap long payloads across lines.
    let compact: String = base64.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| DecodeError::InvalidBase64(e.to_string()))?;

    Ok(DecodedAudio {
        samples: pcm16_to_f32(&bytes),
        sample_rate,
        channels: SYNTHESIS_CHANNELS,
    })
}

/// Convert little-endian signed 16-bit PCM bytes to `f32` in `[-1.0, 1.0)`.
///
/// An odd trailing byte is ignored.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    if bytes.len() % 2 != 0 {
        log::debug!(
            "decode: dropping trailing partial frame ({} bytes total)",
            bytes.len()
        );
    }

    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}

/// Encode normalised samples as a 16-bit PCM WAV file in memory.
pub fn encode_wav(samples: &[f32], sample_rate: u32, channels: u16) -> Result<Vec<u8>, DecodeError> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| DecodeError::Wav(e.to_string()))?;
        for &s in samples {
            let value = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
            writer
                .write_sample(value)
                .map_err(|e| DecodeError::Wav(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| DecodeError::Wav(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    #[test]
    fn sample_count_is_half_the_byte_length() {
        let bytes: Vec<u8> = (0..=255u8).cycle().take(1_000).collect();
        let audio = decode(&encode(&bytes)).unwrap();
        assert_eq!(audio.samples.len(), 500);
        assert_eq!(audio.frame_count(), 500);
    }

    #[test]
    fn samples_stay_in_half_open_unit_range() {
        let bytes: Vec<u8> = (0..=255u8).cycle().take(4_096).collect();
        let audio = decode(&encode(&bytes)).unwrap();
        for &s in &audio.samples {
            assert!((-1.0..1.0).contains(&s), "sample out of range: {s}");
        }
    }

    #[test]
    fn alternating_zero_and_max_pattern() {
        let bytes = [0x00, 0x00, 0xFF, 0x7F, 0x00, 0x00, 0xFF, 0x7F];
        let audio = decode(&encode(&bytes)).unwrap();
        assert_eq!(audio.samples.len(), 4);
        assert!(audio.samples[0].abs() < 1e-6);
        assert!((audio.samples[1] - 0.99997).abs() < 1e-4);
        assert!(audio.samples[2].abs() < 1e-6);
        assert!((audio.samples[3] - 0.99997).abs() < 1e-4);
    }

    #[test]
    fn most_negative_value_maps_to_minus_one() {
        let audio = decode(&encode(&[0x00, 0x80])).unwrap();
        assert_eq!(audio.samples, vec![-1.0]);
    }

    #[test]
    fn trailing_partial_frame_is_dropped() {
        let audio = decode(&encode(&[0x00, 0x40, 0x12])).unwrap();
        assert_eq!(audio.samples.len(), 1);
        assert!((audio.samples[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn metadata_is_fixed_by_caller() {
        let audio = decode(&encode(&[0, 0])).unwrap();
        assert_eq!(audio.sample_rate, 24_000);
        assert_eq!(audio.channels, 1);

        let audio = decode_with_rate(&encode(&[0, 0]), 16_000).unwrap();
        assert_eq!(audio.sample_rate, 16_000);
    }

    #[test]
    fn invalid_base64_is_a_typed_error() {
        let err = decode("not base64 at all!").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidBase64(_)));
    }

    #[test]
    fn embedded_line_breaks_are_tolerated() {
        let payload = format!("{}\n{}", "AAD/", "fw==");
        let audio = decode(&payload).unwrap();
        assert_eq!(audio.samples.len(), 2);
    }

    #[test]
    fn empty_payload_yields_empty_buffer() {
        let audio = decode("").unwrap();
        assert!(audio.is_empty());
        assert_eq!(audio.duration(), Duration::ZERO);
    }

    #[test]
    fn duration_of_one_second() {
        let audio = DecodedAudio {
            samples: vec![0.0; 24_000],
            sample_rate: 24_000,
            channels: 1,
        };
        assert_eq!(audio.duration(), Duration::from_secs(1));
    }

    #[test]
    fn wav_bytes_have_riff_header() {
        let audio = decode(&encode(&[0x00, 0x40, 0x00, 0xC0])).unwrap();
        let wav = audio.to_wav_bytes().unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");

        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 24_000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.into_samples().map(Result::unwrap).collect();
        assert_eq!(samples, vec![16_383, -16_383]);
    }
}
