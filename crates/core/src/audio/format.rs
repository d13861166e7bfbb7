//! PCM sample format conversion utilities
//!
//! Conversions between little-endian 16-bit PCM bytes, `i16` samples and
//! normalized `f32` samples:
//! - I16 → F32: divide by 32768, giving the half-open range [-1.0, 1.0)
//! - F32 → I16: multiply by 32768, round, clamp to the i16 range

/// Width of one 16-bit PCM sample in bytes
pub const PCM16_SAMPLE_WIDTH: usize = 2;

/// Convert i16 samples to f32 (range: -32768..32767 → -1.0..1.0)
///
/// # Example
/// ```
/// use voicerelay_core::audio::format::i16_to_f32;
///
/// let f32_samples = i16_to_f32(&[0, 16384, -32768]);
///
/// assert_eq!(f32_samples[0], 0.0);
/// assert_eq!(f32_samples[1], 0.5);
/// assert_eq!(f32_samples[2], -1.0);
/// ```
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Convert f32 samples to i16 (range: -1.0..1.0 → -32768..32767)
///
/// Values outside the range are clamped.
///
/// # Example
/// ```
/// use voicerelay_core::audio::format::f32_to_i16;
///
/// let i16_samples = f32_to_i16(&[0.0, 0.5, 1.0, -1.0]);
///
/// assert_eq!(i16_samples, vec![0, 16384, 32767, -32768]);
/// ```
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| f32_sample_to_i16(s)).collect()
}

fn f32_sample_to_i16(sample: f32) -> i16 {
    (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

/// Number of complete 16-bit samples in `len` bytes
pub fn whole_samples(len: usize) -> usize {
    len / PCM16_SAMPLE_WIDTH
}

/// Decode little-endian 16-bit PCM bytes into normalized f32 samples
///
/// Only complete samples are decoded; a trailing odd byte is ignored.
///
/// # Example
/// ```
/// use voicerelay_core::audio::format::pcm16_le_to_f32;
///
/// // 0x4000 = 16384, 0x8000 = -32768
/// let samples = pcm16_le_to_f32(&[0x00, 0x40, 0x00, 0x80, 0xff]);
///
/// assert_eq!(samples, vec![0.5, -1.0]);
/// ```
pub fn pcm16_le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(PCM16_SAMPLE_WIDTH)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

/// Encode normalized f32 samples as little-endian 16-bit PCM bytes
pub fn f32_to_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * PCM16_SAMPLE_WIDTH);
    for &sample in samples {
        out.extend_from_slice(&f32_sample_to_i16(sample).to_le_bytes());
    }
    out
}
