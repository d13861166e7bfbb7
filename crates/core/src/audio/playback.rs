//! Byte stream to scheduled playback
//!
//! [`PlaybackPipeline`] decodes PCM bytes through a [`PcmAccumulator`] and
//! places every block on the clock with a [`PlaybackScheduler`], one chunk at
//! a time. `drive_playback` runs a pipeline over a chunked byte stream (for
//! example the body of an HTTP streaming response). The sink sees blocks
//! strictly in arrival order.

use super::accumulator::{ChunkPolicy, PcmAccumulator};
use super::buffer::ScheduledBlock;
use super::scheduler::{AudioClock, PlaybackScheduler, ProgressEstimate};
use crate::config::PlaybackConfig;
use crate::Result;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::time::Duration;

/// Receives scheduled audio and progress from the playback driver
pub trait PlaybackSink {
    /// A block is ready for the output device
    fn on_block(&mut self, block: ScheduledBlock);

    /// Progress changed (percentage, 0-100)
    fn on_progress(&mut self, _percent: f64) {}
}

/// Sink that keeps every scheduled block in memory
#[derive(Debug, Default)]
pub struct BlockCollector {
    pub blocks: Vec<ScheduledBlock>,
    pub progress: Vec<f64>,
}

impl PlaybackSink for BlockCollector {
    fn on_block(&mut self, block: ScheduledBlock) {
        self.blocks.push(block);
    }

    fn on_progress(&mut self, percent: f64) {
        self.progress.push(percent);
    }
}

/// One sink callback, recorded in order
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Block(ScheduledBlock),
    Progress(f64),
}

impl PlaybackEvent {
    /// Replay this event on `sink`
    pub fn deliver_to<K: PlaybackSink + ?Sized>(self, sink: &mut K) {
        match self {
            PlaybackEvent::Block(block) => sink.on_block(block),
            PlaybackEvent::Progress(percent) => sink.on_progress(percent),
        }
    }
}

impl PlaybackSink for Vec<PlaybackEvent> {
    fn on_block(&mut self, block: ScheduledBlock) {
        self.push(PlaybackEvent::Block(block));
    }

    fn on_progress(&mut self, percent: f64) {
        self.push(PlaybackEvent::Progress(percent));
    }
}

/// Decoder and scheduler parameters for one stream
#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    pub sample_rate: u32,
    pub min_chunk_bytes: usize,
    pub chunk_policy: ChunkPolicy,
    pub lead_time: Duration,
    pub progress: ProgressEstimate,
}

impl PlaybackSettings {
    /// Settings for a stream at `sample_rate` with everything else from `config`
    pub fn from_config(config: &PlaybackConfig, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            min_chunk_bytes: config.min_chunk_bytes,
            chunk_policy: config.chunk_policy,
            lead_time: Duration::from_millis(config.lead_time_ms),
            progress: ProgressEstimate::PerChunk {
                step: config.progress_step,
                cap: config.progress_cap,
            },
        }
    }
}

/// Totals reported once the stream ends
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSummary {
    /// Raw bytes received from the stream
    pub bytes_received: u64,
    /// Samples scheduled
    pub total_samples: u64,
    /// Blocks scheduled
    pub total_chunks: u64,
    /// `total_samples / sample_rate`
    pub duration: Duration,
}

/// Incremental decode-and-schedule state for one stream
#[derive(Debug)]
pub struct PlaybackPipeline {
    accumulator: PcmAccumulator,
    scheduler: PlaybackScheduler,
    min_chunk_bytes: usize,
    bytes_received: u64,
}

impl PlaybackPipeline {
    pub fn new(settings: &PlaybackSettings) -> Self {
        Self {
            accumulator: PcmAccumulator::new(settings.sample_rate).with_policy(settings.chunk_policy),
            scheduler: PlaybackScheduler::new(settings.sample_rate)
                .with_lead_time(settings.lead_time)
                .with_progress_estimate(settings.progress),
            min_chunk_bytes: settings.min_chunk_bytes,
            bytes_received: 0,
        }
    }

    /// Feed raw bytes and schedule every block that became ready
    ///
    /// Each block reaches the sink followed by the progress after it.
    /// Returns the number of blocks scheduled.
    pub fn push<K>(&mut self, chunk: &[u8], clock_now: f64, sink: &mut K) -> usize
    where
        K: PlaybackSink + ?Sized,
    {
        if self.scheduler.is_complete() {
            tracing::warn!(bytes = chunk.len(), "Audio after end of stream ignored");
            return 0;
        }

        self.bytes_received += chunk.len() as u64;
        self.accumulator.feed(chunk);

        let blocks = self.accumulator.drain_ready(self.min_chunk_bytes);
        let count = blocks.len();
        for block in blocks {
            let scheduled = self.scheduler.schedule(block, clock_now);
            sink.on_block(scheduled);
            sink.on_progress(self.scheduler.progress());
        }
        count
    }

    /// Schedule the remainder as the terminal block and report 100%
    ///
    /// Only the first call has an effect.
    pub fn finish<K>(&mut self, clock_now: f64, sink: &mut K)
    where
        K: PlaybackSink + ?Sized,
    {
        if self.scheduler.is_complete() {
            return;
        }
        if let Some(scheduled) = self.scheduler.schedule_final(self.accumulator.flush(), clock_now) {
            sink.on_block(scheduled);
        }
        sink.on_progress(self.scheduler.progress());
    }

    pub fn progress(&self) -> f64 {
        self.scheduler.progress()
    }

    pub fn is_complete(&self) -> bool {
        self.scheduler.is_complete()
    }

    /// Totals so far
    pub fn summary(&self) -> PlaybackSummary {
        PlaybackSummary {
            bytes_received: self.bytes_received,
            total_samples: self.scheduler.total_samples(),
            total_chunks: self.scheduler.total_chunks(),
            duration: self.scheduler.total_duration(),
        }
    }
}

/// Decode and schedule a PCM byte stream until it ends
///
/// The first stream error aborts playback and is returned as-is; blocks
/// already handed to the sink stay delivered.
pub async fn drive_playback<S, C, K>(
    stream: S,
    settings: &PlaybackSettings,
    clock: &C,
    sink: &mut K,
) -> Result<PlaybackSummary>
where
    S: Stream<Item = Result<Bytes>>,
    C: AudioClock + ?Sized,
    K: PlaybackSink + ?Sized,
{
    futures::pin_mut!(stream);

    let mut pipeline = PlaybackPipeline::new(settings);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        pipeline.push(&chunk, clock.now(), sink);
    }
    pipeline.finish(clock.now(), sink);

    let summary = pipeline.summary();
    tracing::debug!(
        bytes = summary.bytes_received,
        chunks = summary.total_chunks,
        duration_ms = summary.duration.as_millis() as u64,
        "Playback stream finished"
    );

    Ok(summary)
}
