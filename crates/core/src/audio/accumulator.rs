//! Chunked PCM decoding
//!
//! `PcmAccumulator` turns an arbitrarily split little-endian 16-bit PCM byte
//! stream into normalized f32 blocks. Bytes are appended with [`feed`] and
//! decoded once at least `min_bytes` are buffered. A buffer below the
//! threshold is not an error: the caller simply feeds more bytes.
//!
//! Two chunking policies are supported (see [`ChunkPolicy`]). The default
//! decodes every complete sample available once the threshold is met, which
//! keeps latency low when the network delivers bursts. `FixedWindow` emits
//! blocks of exactly `min_bytes` instead.
//!
//! [`feed`]: PcmAccumulator::feed

use super::buffer::PcmBlock;
use super::format::{pcm16_le_to_f32, whole_samples, PCM16_SAMPLE_WIDTH};
use bytes::BytesMut;
use serde::{Deserialize, Serialize};

/// How `drain_ready` slices the buffered bytes into blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkPolicy {
    /// Decode all complete samples once the threshold is met
    #[default]
    DrainAvailable,
    /// Decode fixed windows of `min_bytes` (rounded down to whole samples)
    FixedWindow,
}

/// Append-only PCM byte accumulator with threshold-gated decoding
#[derive(Debug)]
pub struct PcmAccumulator {
    /// Undecoded bytes; index 0 is always the start of the next sample
    buffer: BytesMut,
    /// Sample rate stamped on produced blocks
    sample_rate: u32,
    /// Chunking policy
    policy: ChunkPolicy,
    /// Total bytes decoded so far
    consumed: u64,
    /// Bytes dropped at flush (never more than one per flush)
    discarded: u64,
}

impl PcmAccumulator {
    /// Create an accumulator for a mono stream at `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        Self {
            buffer: BytesMut::new(),
            sample_rate,
            policy: ChunkPolicy::default(),
            consumed: 0,
            discarded: 0,
        }
    }

    /// Use a different chunking policy
    pub fn with_policy(mut self, policy: ChunkPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Active chunking policy
    pub fn policy(&self) -> ChunkPolicy {
        self.policy
    }

    /// Append raw bytes; an empty slice is a no-op
    pub fn feed(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of buffered, not yet decoded bytes
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes decoded into blocks so far
    pub fn consumed_bytes(&self) -> u64 {
        self.consumed
    }

    /// Total bytes discarded by `flush`
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }

    /// Decode whatever the policy allows once `min_bytes` are buffered
    ///
    /// Returns an empty vector while fewer than `min_bytes` bytes are
    /// buffered. The consumed span is always a whole number of samples.
    pub fn drain_ready(&mut self, min_bytes: usize) -> Vec<PcmBlock> {
        let threshold = min_bytes.max(PCM16_SAMPLE_WIDTH);
        let mut blocks = Vec::new();

        match self.policy {
            ChunkPolicy::DrainAvailable => {
                while self.buffer.len() >= threshold {
                    let span = whole_samples(self.buffer.len()) * PCM16_SAMPLE_WIDTH;
                    blocks.push(self.take(span));
                }
            }
            ChunkPolicy::FixedWindow => {
                let window = whole_samples(threshold) * PCM16_SAMPLE_WIDTH;
                while self.buffer.len() >= threshold {
                    blocks.push(self.take(window));
                }
            }
        }

        blocks
    }

    /// Decode every remaining complete sample, ignoring the threshold
    ///
    /// A leftover odd byte cannot form a sample and is discarded. Returns
    /// `None` when not even one sample remains.
    pub fn flush(&mut self) -> Option<PcmBlock> {
        let span = whole_samples(self.buffer.len()) * PCM16_SAMPLE_WIDTH;
        let block = if span > 0 { Some(self.take(span)) } else { None };

        if !self.buffer.is_empty() {
            tracing::debug!(bytes = self.buffer.len(), "Discarding partial PCM sample at flush");
            self.discarded += self.buffer.len() as u64;
            self.buffer.clear();
        }

        block
    }

    fn take(&mut self, span: usize) -> PcmBlock {
        debug_assert!(span % PCM16_SAMPLE_WIDTH == 0);
        let bytes = self.buffer.split_to(span);
        self.consumed += span as u64;
        PcmBlock::new(pcm16_le_to_f32(&bytes), self.sample_rate)
    }
}
