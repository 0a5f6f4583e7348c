//! Sample-rate conversion and channel mixing.
//!
//! Two directions use this module:
//!
//! * microphone capture → 16 kHz mono for the transcription service
//!   ([`downmix_to_mono`] then [`resample_to_16k`]);
//! * 24 kHz synthesized speech → the output device's native rate when the
//!   device cannot open a 24 kHz stream ([`resample`]).
//!
//! Conversion is linear interpolation, which is adequate for speech.

/// Rate expected by the transcription service.
pub const TRANSCRIPTION_SAMPLE_RATE: u32 = 16_000;

/// Mix interleaved multi-channel audio down to mono by averaging channels.
///
/// ```rust
/// use voice_commander::audio::downmix_to_mono;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = downmix_to_mono(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = usize::from(n);
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Resample mono `samples` from `from_rate` to `to_rate` Hz.
///
/// Output length is `ceil(len * to_rate / from_rate)`.  Equal rates return
/// a copy; a zero rate yields an empty buffer.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }
    if samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let src_pos = i as f64 / ratio;
            let idx = src_pos as usize;
            let frac = (src_pos - idx as f64) as f32;

            match (samples.get(idx), samples.get(idx + 1)) {
                (Some(&a), Some(&b)) => a * (1.0 - frac) + b * frac,
                (Some(&a), None) => a,
                _ => 0.0,
            }
        })
        .collect()
}

/// Resample mono audio to the transcription rate (16 kHz).
pub fn resample_to_16k(samples: &[f32], source_rate: u32) -> Vec<f32> {
    resample(samples, source_rate, TRANSCRIPTION_SAMPLE_RATE)
}
