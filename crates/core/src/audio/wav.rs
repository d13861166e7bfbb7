//! Canonical WAV container assembly
//!
//! Wraps raw PCM bytes in the 44-byte canonical RIFF/WAVE header:
//!
//! ```text
//! offset  size  field
//!      0     4  "RIFF"
//!      4     4  36 + data length (LE)
//!      8     4  "WAVE"
//!     12     4  "fmt "
//!     16     4  16 (fmt chunk size)
//!     20     2  1 (PCM)
//!     22     2  channels
//!     24     4  sample rate
//!     28     4  byte rate
//!     32     2  block align
//!     34     2  bits per sample
//!     36     4  "data"
//!     40     4  data length
//!     44        PCM bytes
//! ```

use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the canonical header in bytes
pub const WAV_HEADER_LEN: usize = 44;

const PCM_FORMAT_CODE: u16 = 1;

/// Layout of the PCM payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Bits per sample
    pub bits_per_sample: u16,
}

impl WavSpec {
    /// Mono 16-bit PCM at `sample_rate`
    pub fn mono_pcm16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }
}

/// RIFF chunk size and data length for a payload of `len` bytes
///
/// Both header fields are 32-bit; larger payloads cannot be described.
fn chunk_sizes(len: usize) -> Result<(u32, u32)> {
    let too_large = || Error::InvalidData(format!("PCM payload of {} bytes does not fit a WAV header", len));
    let data_len = u32::try_from(len).map_err(|_| too_large())?;
    let riff_len = data_len.checked_add(36).ok_or_else(too_large)?;
    Ok((riff_len, data_len))
}

/// Build a WAV file from raw PCM bytes
///
/// # Errors
///
/// `Error::InvalidData` when the payload exceeds the 32-bit size fields.
pub fn encode_wav(pcm: &[u8], spec: WavSpec) -> Result<Bytes> {
    let (riff_len, data_len) = chunk_sizes(pcm.len())?;
    let mut out = BytesMut::with_capacity(WAV_HEADER_LEN + pcm.len());

    out.put_slice(b"RIFF");
    out.put_u32_le(riff_len);
    out.put_slice(b"WAVE");

    out.put_slice(b"fmt ");
    out.put_u32_le(16);
    out.put_u16_le(PCM_FORMAT_CODE);
    out.put_u16_le(spec.channels);
    out.put_u32_le(spec.sample_rate);
    out.put_u32_le(spec.byte_rate());
    out.put_u16_le(spec.block_align());
    out.put_u16_le(spec.bits_per_sample);

    out.put_slice(b"data");
    out.put_u32_le(data_len);
    out.put_slice(pcm);

    Ok(out.freeze())
}

/// Build a mono 16-bit WAV file from raw PCM bytes
pub fn encode_wav_mono16(pcm: &[u8], sample_rate: u32) -> Result<Bytes> {
    encode_wav(pcm, WavSpec::mono_pcm16(sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_layout_for_100_bytes() {
        let wav = encode_wav_mono16(&[0u8; 100], 24_000).unwrap();

        assert_eq!(wav.len(), 144);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes([wav[4], wav[5], wav[6], wav[7]]), 136);
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(u32::from_le_bytes([wav[16], wav[17], wav[18], wav[19]]), 16);
        assert_eq!(u16::from_le_bytes([wav[20], wav[21]]), 1);
        assert_eq!(u16::from_le_bytes([wav[22], wav[23]]), 1);
        assert_eq!(u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]), 24_000);
        assert_eq!(u32::from_le_bytes([wav[28], wav[29], wav[30], wav[31]]), 48_000);
        assert_eq!(u16::from_le_bytes([wav[32], wav[33]]), 2);
        assert_eq!(u16::from_le_bytes([wav[34], wav[35]]), 16);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]), 100);
    }

    #[test]
    fn test_empty_payload() {
        let wav = encode_wav_mono16(&[], 48_000).unwrap();
        assert_eq!(wav.len(), WAV_HEADER_LEN);
        assert_eq!(u32::from_le_bytes([wav[4], wav[5], wav[6], wav[7]]), 36);
    }

    #[test]
    fn test_readable_by_hound() {
        let samples: Vec<i16> = vec![0, 1000, -1000, i16::MAX, i16::MIN];
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        let wav = encode_wav_mono16(&pcm, 24_000).unwrap();
        let mut reader = hound::WavReader::new(Cursor::new(wav.to_vec())).unwrap();

        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 24_000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, hound::SampleFormat::Int);

        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, samples);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        assert_eq!(chunk_sizes(100).unwrap(), (136, 100));
        assert_eq!(chunk_sizes(u32::MAX as usize - 36).unwrap(), (u32::MAX, u32::MAX - 36));

        let err = chunk_sizes(u32::MAX as usize - 35).unwrap_err();
        assert_eq!(err.kind().as_str(), "INVALID_DATA");
        assert!(chunk_sizes(u32::MAX as usize).is_err());
    }
}
