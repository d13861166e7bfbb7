//! Gapless playback scheduling
//!
//! Places decoded blocks back-to-back on a monotonic audio clock. The first
//! block starts `lead_time` after the clock reading at scheduling time to
//! absorb jitter; every later block starts where the previous one ended,
//! unless production fell behind real time, in which case it starts now.
//! A block is never scheduled before the clock value passed in.

use super::buffer::{PcmBlock, ScheduledBlock};
use std::time::{Duration, Instant};

/// Source of audio clock readings in seconds
pub trait AudioClock: Send + Sync {
    /// Current clock value in seconds; never decreases
    fn now(&self) -> f64;
}

/// `AudioClock` backed by `std::time::Instant`, zeroed at construction
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// How the scheduler estimates progress before the terminal block
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressEstimate {
    /// Fixed percentage per scheduled chunk
    PerChunk {
        /// Percentage added per chunk
        step: f64,
        /// Ceiling until the terminal block
        cap: f64,
    },
    /// Scheduled seconds relative to an expected total duration
    ExpectedDuration {
        /// Expected total audio length in seconds
        expected_secs: f64,
        /// Ceiling until the terminal block
        cap: f64,
    },
}

impl Default for ProgressEstimate {
    fn default() -> Self {
        ProgressEstimate::PerChunk {
            step: 5.0,
            cap: 95.0,
        }
    }
}

/// Converts decoded blocks into gapless scheduled intervals
#[derive(Debug, Clone)]
pub struct PlaybackScheduler {
    /// Delay applied to the very first block
    lead_time: f64,
    /// Where the next block should start; unset until the first block
    next_start: Option<f64>,
    /// Stream sample rate used for the cumulative duration
    sample_rate: u32,
    /// Samples scheduled so far
    total_samples: u64,
    /// Blocks scheduled so far
    total_chunks: u64,
    /// Progress estimator
    estimate: ProgressEstimate,
    /// Last reported progress percentage
    progress: f64,
    /// Set once the terminal block is scheduled
    completed: bool,
}

impl PlaybackScheduler {
    /// Default lead time before the first block
    pub const DEFAULT_LEAD_TIME: Duration = Duration::from_millis(100);

    /// Create a scheduler for a stream at `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        Self {
            lead_time: Self::DEFAULT_LEAD_TIME.as_secs_f64(),
            next_start: None,
            sample_rate,
            total_samples: 0,
            total_chunks: 0,
            estimate: ProgressEstimate::default(),
            progress: 0.0,
            completed: false,
        }
    }

    /// Override the first-block lead time
    pub fn with_lead_time(mut self, lead_time: Duration) -> Self {
        self.lead_time = lead_time.as_secs_f64();
        self
    }

    /// Override the progress estimator
    pub fn with_progress_estimate(mut self, estimate: ProgressEstimate) -> Self {
        self.estimate = estimate;
        self
    }

    /// Place `block` on the clock and return its scheduled interval
    pub fn schedule(&mut self, block: PcmBlock, clock_now: f64) -> ScheduledBlock {
        let start_time = match self.next_start {
            None => clock_now + self.lead_time,
            Some(next) if next < clock_now => {
                tracing::debug!(
                    behind_ms = (clock_now - next) * 1000.0,
                    "Playback fell behind real time, clamping to now"
                );
                clock_now
            }
            Some(next) => next,
        };

        let duration = block.duration_secs();
        self.next_start = Some(start_time + duration);
        self.total_samples += block.len() as u64;
        self.total_chunks += 1;
        self.update_progress();

        ScheduledBlock {
            block,
            start_time,
            duration,
        }
    }

    /// Schedule the terminal block (if any) and mark the stream complete
    pub fn schedule_final(
        &mut self,
        block: Option<PcmBlock>,
        clock_now: f64,
    ) -> Option<ScheduledBlock> {
        let scheduled = block.map(|b| self.schedule(b, clock_now));
        self.complete();
        scheduled
    }

    /// Mark the stream complete; progress becomes 100%
    pub fn complete(&mut self) {
        self.completed = true;
        self.progress = 100.0;
    }

    /// Progress percentage; non-decreasing, below 100 until complete
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Whether the terminal block has been scheduled
    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// Clock time at which the next block would start, if any was scheduled
    pub fn next_start(&self) -> Option<f64> {
        self.next_start
    }

    /// Samples scheduled so far
    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// Blocks scheduled so far
    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Cumulative audio duration derived from the sample counter
    pub fn total_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.total_samples as f64 / self.sample_rate as f64)
    }

    fn update_progress(&mut self) {
        if self.completed {
            return;
        }
        let estimate = match self.estimate {
            ProgressEstimate::PerChunk { step, cap } => {
                (self.total_chunks as f64 * step).min(cap.min(99.9))
            }
            ProgressEstimate::ExpectedDuration { expected_secs, cap } => {
                if expected_secs <= 0.0 {
                    0.0
                } else {
                    (self.total_duration().as_secs_f64() / expected_secs * 100.0)
                        .min(cap.min(99.9))
                }
            }
        };
        self.progress = self.progress.max(estimate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn block(samples: usize) -> PcmBlock {
        PcmBlock::new(vec![0.0; samples], 24_000)
    }

    #[test]
    fn test_first_block_gets_lead_time() {
        let mut scheduler = PlaybackScheduler::new(24_000);
        let scheduled = scheduler.schedule(block(2400), 10.0);
        assert!((scheduled.start_time - 10.1).abs() < 1e-9);
        assert!((scheduled.duration - 0.1).abs() < 1e-9);
        assert!((scheduler.next_start().unwrap() - 10.2).abs() < 1e-9);
    }

    #[test]
    fn test_back_to_back_abutment() {
        let mut scheduler = PlaybackScheduler::new(24_000);
        let first = scheduler.schedule(block(2400), 0.0);
        let second = scheduler.schedule(block(4800), 0.05);
        assert!((second.start_time - first.end_time()).abs() < 1e-9);
    }

    #[test]
    fn test_clamps_when_behind() {
        let mut scheduler = PlaybackScheduler::new(24_000);
        scheduler.schedule(block(2400), 0.0);
        let late = scheduler.schedule(block(2400), 5.0);
        assert_eq!(late.start_time, 5.0);
        assert!((scheduler.next_start().unwrap() - 5.1).abs() < 1e-9);
    }

    #[test]
    fn test_never_schedules_in_the_past() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut scheduler = PlaybackScheduler::new(24_000).with_lead_time(Duration::ZERO);
        let mut now = 0.0;

        for _ in 0..10_000 {
            now += rng.gen_range(0.0..0.3);
            let scheduled = scheduler.schedule(block(rng.gen_range(0..4800)), now);
            assert!(scheduled.start_time >= now);
        }
    }

    #[test]
    fn test_progress_monotonic_and_capped() {
        let mut scheduler = PlaybackScheduler::new(24_000);
        let mut last = 0.0;
        for _ in 0..50 {
            scheduler.schedule(block(100), 0.0);
            assert!(scheduler.progress() >= last);
            assert!(scheduler.progress() < 100.0);
            last = scheduler.progress();
        }
        assert_eq!(scheduler.progress(), 95.0);

        scheduler.schedule_final(Some(block(100)), 0.0);
        assert_eq!(scheduler.progress(), 100.0);
        assert!(scheduler.is_complete());
    }

    #[test]
    fn test_expected_duration_progress() {
        let mut scheduler =
            PlaybackScheduler::new(24_000).with_progress_estimate(ProgressEstimate::ExpectedDuration {
                expected_secs: 1.0,
                cap: 95.0,
            });
        scheduler.schedule(block(12_000), 0.0);
        assert!((scheduler.progress() - 50.0).abs() < 1e-6);
        scheduler.schedule(block(24_000), 0.0);
        assert_eq!(scheduler.progress(), 95.0);
    }

    #[test]
    fn test_duration_from_sample_counter() {
        let mut scheduler = PlaybackScheduler::new(48_000);
        for _ in 0..3 {
            scheduler.schedule(PcmBlock::new(vec![0.0; 16_000], 48_000), 100.0);
        }
        assert_eq!(scheduler.total_samples(), 48_000);
        assert_eq!(scheduler.total_chunks(), 3);
        assert_eq!(scheduler.total_duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_final_without_block() {
        let mut scheduler = PlaybackScheduler::new(24_000);
        assert!(scheduler.schedule_final(None, 0.0).is_none());
        assert_eq!(scheduler.progress(), 100.0);
        assert_eq!(scheduler.total_duration(), Duration::ZERO);
    }
}
