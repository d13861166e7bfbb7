//! Integration test for the streaming playback pipeline
//!
//! Feeds PCM16 byte streams split at arbitrary boundaries through
//! `drive_playback` and checks:
//! 1. No sample is lost, duplicated or reordered
//! 2. Blocks are scheduled back-to-back with no gaps or overlaps
//! 3. Progress is monotonic and only reaches 100 at the end
//! 4. The accumulated PCM round-trips through a WAV container

use bytes::Bytes;
use futures::stream;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;
use voicerelay_core::audio::format::{f32_to_pcm16_le, pcm16_le_to_f32};
use voicerelay_core::audio::{
    drive_playback, encode_wav_mono16, AudioClock, BlockCollector, ChunkPolicy, PlaybackSettings,
    ProgressEstimate,
};
use voicerelay_core::config::PlaybackConfig;
use voicerelay_core::{Error, Result};

/// Clock that advances a fixed step on every reading
struct SteppingClock {
    now: Mutex<f64>,
    step: f64,
}

impl SteppingClock {
    fn new(step: f64) -> Self {
        Self {
            now: Mutex::new(0.0),
            step,
        }
    }
}

impl AudioClock for SteppingClock {
    fn now(&self) -> f64 {
        let mut now = self.now.lock().unwrap();
        let value = *now;
        *now += self.step;
        value
    }
}

fn sine_pcm(samples: usize, sample_rate: u32) -> Vec<u8> {
    let signal: Vec<f32> = (0..samples)
        .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / sample_rate as f32).sin() * 0.5)
        .collect();
    f32_to_pcm16_le(&signal)
}

fn split_randomly(data: &[u8], rng: &mut StdRng) -> Vec<Result<Bytes>> {
    let mut chunks = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let len = rng.gen_range(1..=4096).min(data.len() - offset);
        chunks.push(Ok(Bytes::copy_from_slice(&data[offset..offset + len])));
        offset += len;
    }
    chunks
}

fn settings(policy: ChunkPolicy) -> PlaybackSettings {
    let mut settings = PlaybackSettings::from_config(&PlaybackConfig::default(), 48_000);
    settings.chunk_policy = policy;
    settings
}

#[tokio::test]
async fn test_random_splits_preserve_every_sample() {
    let pcm = sine_pcm(48_000, 48_000);
    let expected = pcm16_le_to_f32(&pcm);

    for (seed, policy) in [
        (7u64, ChunkPolicy::DrainAvailable),
        (11, ChunkPolicy::DrainAvailable),
        (7, ChunkPolicy::FixedWindow),
        (23, ChunkPolicy::FixedWindow),
    ] {
        let mut rng = StdRng::seed_from_u64(seed);
        let chunks = split_randomly(&pcm, &mut rng);
        let mut sink = BlockCollector::default();

        let summary = drive_playback(
            stream::iter(chunks),
            &settings(policy),
            &SteppingClock::new(0.0),
            &mut sink,
        )
        .await
        .unwrap();

        let played: Vec<f32> = sink
            .blocks
            .iter()
            .flat_map(|b| b.block.samples().iter().copied())
            .collect();

        assert_eq!(played, expected, "seed {} policy {:?}", seed, policy);
        assert_eq!(summary.bytes_received, pcm.len() as u64);
        assert_eq!(summary.total_samples, 48_000);
        assert_eq!(summary.duration, Duration::from_secs(1));
    }
}

#[tokio::test]
async fn test_blocks_are_gapless_when_ahead_of_clock() {
    let pcm = sine_pcm(24_000, 48_000);
    let mut rng = StdRng::seed_from_u64(3);
    let mut sink = BlockCollector::default();

    drive_playback(
        stream::iter(split_randomly(&pcm, &mut rng)),
        &settings(ChunkPolicy::DrainAvailable),
        &SteppingClock::new(0.001),
        &mut sink,
    )
    .await
    .unwrap();

    assert!(sink.blocks.len() > 1);
    assert!((sink.blocks[0].start_time - 0.1).abs() < 1e-9);
    for pair in sink.blocks.windows(2) {
        assert!((pair[1].start_time - pair[0].end_time()).abs() < 1e-9);
    }
}

#[tokio::test]
async fn test_late_blocks_start_at_clock() {
    let pcm = sine_pcm(9_600, 48_000);
    let chunks: Vec<Result<Bytes>> = pcm
        .chunks(4_800)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    let mut sink = BlockCollector::default();

    // Each reading advances one second, far beyond the 50ms blocks.
    drive_playback(
        stream::iter(chunks),
        &PlaybackSettings {
            min_chunk_bytes: 4_800,
            ..settings(ChunkPolicy::DrainAvailable)
        },
        &SteppingClock::new(1.0),
        &mut sink,
    )
    .await
    .unwrap();

    for pair in sink.blocks.windows(2) {
        assert!(pair[1].start_time >= pair[0].end_time());
    }
    assert!((sink.blocks[1].start_time - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_progress_monotonic_and_capped() {
    let pcm = sine_pcm(48_000 * 3, 48_000);
    let chunks: Vec<Result<Bytes>> = pcm
        .chunks(9_600)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    let mut sink = BlockCollector::default();

    let mut settings = settings(ChunkPolicy::DrainAvailable);
    settings.progress = ProgressEstimate::PerChunk {
        step: 5.0,
        cap: 95.0,
    };

    drive_playback(stream::iter(chunks), &settings, &SteppingClock::new(0.0), &mut sink)
        .await
        .unwrap();

    let (last, before) = sink.progress.split_last().unwrap();
    assert_eq!(*last, 100.0);
    assert!(before.iter().all(|p| *p <= 95.0));
    for pair in sink.progress.windows(2) {
        assert!(pair[1] >= pair[0]);
    }
}

#[tokio::test]
async fn test_stream_error_keeps_delivered_blocks() {
    let chunks = vec![
        Ok(Bytes::from(vec![0u8; 9_600])),
        Err(Error::UpstreamHttp {
            status: 500,
            body: "backend crashed".to_string(),
        }),
    ];
    let mut sink = BlockCollector::default();

    let err = drive_playback(
        stream::iter(chunks),
        &settings(ChunkPolicy::DrainAvailable),
        &SteppingClock::new(0.0),
        &mut sink,
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind().as_str(), "UPSTREAM_HTTP_ERROR");
    assert_eq!(sink.blocks.len(), 1);
}

#[test]
fn test_wav_container_reads_back() {
    let pcm = sine_pcm(2_400, 24_000);
    let wav = encode_wav_mono16(&pcm, 24_000).unwrap();

    let reader = hound::WavReader::new(Cursor::new(wav.to_vec())).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 24_000);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);

    let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
    let expected: Vec<i16> = pcm
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();
    assert_eq!(samples, expected);
}
