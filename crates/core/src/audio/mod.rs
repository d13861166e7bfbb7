//! Audio decoding, scheduling and container assembly

pub mod accumulator;
pub mod buffer;
pub mod format;
pub mod playback;
pub mod scheduler;
pub mod wav;

pub use accumulator::{ChunkPolicy, PcmAccumulator};
pub use buffer::{PcmBlock, ScheduledBlock};
pub use playback::{
    drive_playback, BlockCollector, PlaybackEvent, PlaybackPipeline, PlaybackSettings, PlaybackSink, PlaybackSummary,
};
pub use scheduler::{AudioClock, MonotonicClock, PlaybackScheduler, ProgressEstimate};
pub use wav::{encode_wav, encode_wav_mono16, WavSpec, WAV_HEADER_LEN};
