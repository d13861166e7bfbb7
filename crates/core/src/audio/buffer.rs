//! Decoded audio block types

use std::sync::Arc;
use std::time::Duration;

/// A block of normalized mono f32 samples produced by the PCM accumulator
///
/// Samples are shared behind an `Arc` so a block can be handed to a playback
/// sink without copying.
#[derive(Clone, PartialEq)]
pub struct PcmBlock {
    /// Normalized samples in [-1.0, 1.0)
    samples: Arc<[f32]>,
    /// Sample rate in Hz
    sample_rate: u32,
}

impl PcmBlock {
    /// Create a new block (takes ownership)
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Samples in playback order
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Shared handle to the samples (zero-copy)
    pub fn shared_samples(&self) -> Arc<[f32]> {
        Arc::clone(&self.samples)
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if block is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Duration as a `Duration`
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs())
    }
}

impl std::fmt::Debug for PcmBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PcmBlock({} samples @ {}Hz)",
            self.samples.len(),
            self.sample_rate
        )
    }
}

/// A block placed on the audio clock, ready for the output sink
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledBlock {
    /// The decoded samples
    pub block: PcmBlock,
    /// Start time on the audio clock, in seconds
    pub start_time: f64,
    /// Duration in seconds
    pub duration: f64,
}

impl ScheduledBlock {
    /// Audio clock time at which this block finishes playing
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Sample rate of the scheduled samples
    pub fn sample_rate(&self) -> u32 {
        self.block.sample_rate()
    }
}
