//! Caller-side realtime synthesis
//!
//! Runs the same bridge task as the server, with an in-process client, and
//! hands back the accumulated PCM. `play` additionally streams scheduled
//! blocks and progress to a [`PlaybackSink`] while the session runs.

use crate::bridge::{BridgeMode, BridgeOutcome, ConnectionBridge, SynthesisRequest};
use crate::client::DetachedClient;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;
use voicerelay_core::audio::{encode_wav_mono16, AudioClock, PlaybackSink};
use voicerelay_core::config::RelayConfig;
use voicerelay_core::session::CloseDisposition;
use voicerelay_core::{Error, Result};

/// Synthesized audio
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOutput {
    /// Raw PCM16 little-endian mono
    pub pcm: Bytes,
    pub sample_rate: u32,
    /// The upstream closed before finishing; `pcm` is partial
    pub partial: bool,
}

impl SynthesisOutput {
    /// PCM wrapped in a canonical WAV container
    pub fn wav(&self) -> Result<Bytes> {
        encode_wav_mono16(&self.pcm, self.sample_rate)
    }

    /// Audio length derived from the sample count
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let samples = self.pcm.len() / 2;
        Duration::from_secs_f64(samples as f64 / self.sample_rate as f64)
    }
}

/// Synthesizes text over the realtime upstream
#[derive(Debug, Clone)]
pub struct RealtimeSynthesizer {
    config: Arc<RelayConfig>,
    counter: Arc<AtomicU64>,
}

impl RealtimeSynthesizer {
    pub fn new(config: Arc<RelayConfig>) -> Self {
        Self {
            config,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Synthesize `text`, optionally with a voice other than the configured one
    ///
    /// # Errors
    ///
    /// `Error::Config` without a credential, `Error::ConnectTimeout`,
    /// `Error::Protocol` for upstream errors and `Error::ClosedWithoutAudio`
    /// when the upstream closes before sending any audio.
    pub async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<SynthesisOutput> {
        let bridge = self.open_bridge(text, voice)?;
        Ok(into_output(bridge.run().await?))
    }

    /// Synthesize `text` and schedule its audio on `clock` as it arrives
    ///
    /// `sink` receives every scheduled block followed by the progress after
    /// it, in arrival order, while the session runs; the last progress
    /// report is 100 once the stream ends. Errors are those of
    /// [`synthesize`](Self::synthesize); blocks delivered before a failure
    /// stay delivered.
    pub async fn play<K>(
        &self,
        text: &str,
        voice: Option<&str>,
        clock: Arc<dyn AudioClock>,
        sink: &mut K,
    ) -> Result<SynthesisOutput>
    where
        K: PlaybackSink + ?Sized,
    {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let bridge = self
            .open_bridge(text, voice)?
            .with_clock(clock)
            .with_playback_events(events_tx);

        let run = bridge.run();
        tokio::pin!(run);
        let outcome = loop {
            tokio::select! {
                outcome = &mut run => break outcome,
                Some(event) = events_rx.recv() => event.deliver_to(sink),
            }
        };

        // The bridge is gone; deliver what it queued last
        while let Ok(event) = events_rx.try_recv() {
            event.deliver_to(sink);
        }

        Ok(into_output(outcome?))
    }

    fn open_bridge(&self, text: &str, voice: Option<&str>) -> Result<ConnectionBridge<DetachedClient>> {
        if text.trim().is_empty() {
            return Err(Error::InvalidData("synthesis text must not be empty".to_string()));
        }

        let id = format!("synth-{}", self.counter.fetch_add(1, Ordering::Relaxed) + 1);
        let mode = BridgeMode::Synthesize(SynthesisRequest {
            text: text.to_string(),
            voice: voice.map(str::to_string),
        });

        ConnectionBridge::open(id, DetachedClient::silent(), Arc::clone(&self.config), mode)
    }
}

fn into_output(outcome: BridgeOutcome) -> SynthesisOutput {
    let partial = !matches!(outcome.disposition, CloseDisposition::Finished);
    if partial {
        warn!(
            connection_id = %outcome.connection_id,
            audio_bytes = outcome.stats.audio_bytes,
            "Returning partial synthesis"
        );
    }

    SynthesisOutput {
        pcm: outcome.audio.unwrap_or_default(),
        sample_rate: outcome.sample_rate,
        partial,
    }
}
