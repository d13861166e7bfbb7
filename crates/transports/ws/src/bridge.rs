//! Connection bridge
//!
//! Binds one client to one upstream realtime connection. A single task owns
//! the [`Connection`] context, the [`SessionMachine`] and the audio buffers;
//! it waits on the client, the upstream handshake, the upstream socket and
//! the fallback timer at once and never blocks on any one of them.
//!
//! Two modes:
//! - **Relay**: frames pass through both ways, kind preserved. The session
//!   machine observes upstream text frames to know when the session is over.
//! - **Synthesize**: the bridge drives the protocol itself for one text and
//!   delivers the result to the client as a WAV frame.
//!
//! Decoded audio runs through a [`PlaybackPipeline`] (synthesis, and relay
//! with accumulation), so blocks are scheduled on the playback clock as
//! they arrive. Synthesis clients see `synthesis.progress` frames; local
//! listeners can subscribe to every [`PlaybackEvent`].

use crate::client::{frame_to_message, ClientChannel};
use crate::connection::{ClientFrameDisposition, Connection, ConnectionState, ConnectionStats};
use crate::upstream::{self, UpstreamSocket};
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, info_span, trace, warn, Instrument};
use voicerelay_core::audio::{
    encode_wav_mono16, AudioClock, MonotonicClock, PlaybackEvent, PlaybackPipeline, PlaybackSettings,
};
use voicerelay_core::config::{RelayConfig, SessionSettings};
use voicerelay_core::protocol::{Frame, FrameKind};
use voicerelay_core::session::{CloseDisposition, SessionAction, SessionMachine, SessionState};
use voicerelay_core::{Error, Result};

/// One synthesis job
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    /// Overrides the configured voice
    pub voice: Option<String>,
}

/// How the bridge treats the client
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeMode {
    /// Transparent relay; the client drives the protocol
    Relay {
        /// Decode upstream audio for duration statistics
        accumulate_audio: bool,
    },
    /// The bridge drives the protocol for one request
    Synthesize(SynthesisRequest),
}

impl BridgeMode {
    /// Mode from a handshake query string
    ///
    /// `text` selects synthesis (with optional `voice`); otherwise relay,
    /// with `accumulate=1` enabling audio accumulation.
    pub fn from_query(query: Option<&str>) -> Result<Self> {
        let mut text = None;
        let mut voice = None;
        let mut accumulate_audio = false;

        for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            match key.as_ref() {
                "text" => text = Some(value.into_owned()),
                "voice" if !value.trim().is_empty() => voice = Some(value.into_owned()),
                "accumulate" => accumulate_audio = matches!(value.as_ref(), "1" | "true" | "yes"),
                _ => {}
            }
        }

        match text {
            Some(text) if text.trim().is_empty() => {
                Err(Error::InvalidData("synthesis text must not be empty".to_string()))
            }
            Some(text) => Ok(BridgeMode::Synthesize(SynthesisRequest { text, voice })),
            None => Ok(BridgeMode::Relay { accumulate_audio }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeMode::Relay { .. } => "relay",
            BridgeMode::Synthesize(_) => "synthesize",
        }
    }
}

/// Final report of a bridged connection
#[derive(Debug, Clone)]
pub struct BridgeOutcome {
    pub connection_id: String,
    pub connection_state: ConnectionState,
    pub session_state: SessionState,
    pub disposition: CloseDisposition,
    pub stats: ConnectionStats,
    /// Accumulated PCM16 (synthesis mode only)
    pub audio: Option<Bytes>,
    pub sample_rate: u32,
    /// `total_samples / sample_rate`
    pub audio_duration: Duration,
}

/// Client frame announcing a finished synthesis; the WAV follows as binary
#[derive(Debug, Serialize)]
struct SynthesisCompleted {
    #[serde(rename = "type")]
    event_type: &'static str,
    audio_bytes: u64,
    duration_secs: f64,
    /// The upstream closed before the session finished
    partial: bool,
}

/// Client frame reporting scheduled playback progress
#[derive(Debug, Serialize)]
struct SynthesisProgress {
    #[serde(rename = "type")]
    event_type: &'static str,
    percent: f64,
    chunks: u64,
}

/// Client frame carrying a bridge error
#[derive(Debug, Serialize)]
struct ClientError<'a> {
    #[serde(rename = "type")]
    event_type: &'static str,
    code: &'static str,
    message: &'a str,
}

/// Why the event loop stopped
enum Flow {
    Continue,
    Finished,
    ClientClosed,
    UpstreamClosed,
}

/// One client bound to one upstream
pub struct ConnectionBridge<C> {
    conn: Connection,
    client: C,
    client_open: bool,
    mode: BridgeMode,
    machine: SessionMachine,
    config: Arc<RelayConfig>,
    connect: Option<JoinHandle<Result<UpstreamSocket>>>,
    upstream: Option<UpstreamSocket>,
    fallback_at: Option<Instant>,
    playback: Option<PlaybackPipeline>,
    clock: Arc<dyn AudioClock>,
    playback_events: Option<mpsc::UnboundedSender<PlaybackEvent>>,
    pcm: BytesMut,
}

impl<C: ClientChannel> ConnectionBridge<C> {
    /// Start the upstream handshake in the background and return at once in
    /// `Connecting`
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// `Error::Config` when no upstream credential is configured; nothing is
    /// spawned in that case.
    pub fn open(
        id: impl Into<String>,
        client: C,
        config: Arc<RelayConfig>,
        mode: BridgeMode,
    ) -> Result<Self> {
        let request = upstream::build_request(&config.upstream)?;
        let settings = session_settings(&config.session, &mode);
        let playback_settings = PlaybackSettings::from_config(&config.playback, settings.sample_rate);

        let (machine, playback) = match &mode {
            BridgeMode::Synthesize(req) => (
                SessionMachine::driver(settings, req.text.clone()),
                Some(PlaybackPipeline::new(&playback_settings)),
            ),
            BridgeMode::Relay { accumulate_audio } => (
                SessionMachine::observer(settings),
                accumulate_audio.then(|| PlaybackPipeline::new(&playback_settings)),
            ),
        };

        let upstream_config = config.upstream.clone();
        let connect =
            tokio::spawn(async move { upstream::connect(request, &upstream_config).await });

        Ok(Self {
            conn: Connection::new(id),
            client,
            client_open: true,
            mode,
            machine,
            config,
            connect: Some(connect),
            upstream: None,
            fallback_at: None,
            playback,
            clock: Arc::new(MonotonicClock::new()),
            playback_events: None,
            pcm: BytesMut::new(),
        })
    }

    /// Schedule playback against `clock` instead of a fresh monotonic clock
    pub fn with_clock(mut self, clock: Arc<dyn AudioClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Forward every scheduled block and progress update to `events`
    ///
    /// Only modes that decode audio produce events: synthesis, and relay
    /// with accumulation.
    pub fn with_playback_events(mut self, events: mpsc::UnboundedSender<PlaybackEvent>) -> Self {
        self.playback_events = Some(events);
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run until either side closes, the session ends or something fails
    ///
    /// Returns the outcome for finished sessions and for closes after some
    /// audio arrived. A close before any audio is `Error::ClosedWithoutAudio`.
    pub async fn run(self) -> Result<BridgeOutcome> {
        let span = info_span!("connection", id = %self.conn.id(), mode = self.mode.as_str());
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) -> Result<BridgeOutcome> {
        info!("Bridge started, upstream connecting");

        let exit = self.event_loop().await;

        self.fallback_at = None;
        if let Some(handle) = self.connect.take() {
            handle.abort();
        }

        let result = match exit {
            Ok(Flow::Finished) => {
                self.conn.close();
                self.finish_playback().await;
                self.deliver_synthesis(false).await;
                Ok(())
            }
            Ok(Flow::ClientClosed) | Ok(Flow::UpstreamClosed) | Ok(Flow::Continue) => {
                self.conn.close();
                match self.machine.close_disposition() {
                    CloseDisposition::ClosedWithoutAudio => Err(Error::ClosedWithoutAudio),
                    CloseDisposition::ClosedEarly { audio_bytes } => {
                        warn!(
                            audio_bytes,
                            state = %self.machine.state(),
                            "Connection closed before the session finished"
                        );
                        self.finish_playback().await;
                        self.deliver_synthesis(true).await;
                        Ok(())
                    }
                    CloseDisposition::Finished => {
                        self.finish_playback().await;
                        Ok(())
                    }
                    CloseDisposition::Errored => Ok(()),
                }
            }
            Err(e) => {
                if !self.conn.is_finished() {
                    self.conn.close();
                }
                Err(e)
            }
        };

        if let Err(e) = &result {
            // The upstream error frame itself already reached a relay client.
            let forwarded = matches!(self.mode, BridgeMode::Relay { .. })
                && matches!(e, Error::Protocol(_));
            if !forwarded {
                self.send_client_error(e).await;
            }
        }

        self.close_both().await;

        let outcome = self.outcome();
        let stats = &outcome.stats;
        info!(
            state = %outcome.connection_state,
            session = %outcome.session_state,
            client_frames = stats.client_frames,
            upstream_frames = stats.upstream_frames,
            queued_frames = stats.queued_frames,
            audio_bytes = stats.audio_bytes,
            total_chunks = stats.total_chunks,
            duration_ms = outcome.audio_duration.as_millis() as u64,
            "Connection closed"
        );

        result.map(|_| outcome)
    }

    async fn event_loop(&mut self) -> Result<Flow> {
        loop {
            let fallback_at = self.fallback_at;

            let flow = tokio::select! {
                frame = self.client.recv(), if self.client_open => match frame {
                    Some(Ok(frame)) => self.handle_client_frame(frame).await?,
                    Some(Err(e)) => {
                        self.client_open = false;
                        return Err(e);
                    }
                    None => {
                        info!("Client closed");
                        self.client_open = false;
                        Flow::ClientClosed
                    }
                },
                joined = join_connect(&mut self.connect) => {
                    self.connect = None;
                    match joined {
                        Ok(socket) => self.on_upstream_open(socket).await?,
                        Err(e) => {
                            warn!(error = %e, "Upstream connection failed");
                            self.conn.fail();
                            return Err(e);
                        }
                    }
                },
                msg = next_upstream(&mut self.upstream) => self.handle_upstream_message(msg).await?,
                _ = sleep_opt(fallback_at) => {
                    self.fallback_at = None;
                    let actions = self.machine.on_fallback_timeout();
                    self.apply_actions(actions).await?
                },
            };

            match flow {
                Flow::Continue => {}
                done => return Ok(done),
            }
        }
    }

    async fn on_upstream_open(&mut self, socket: UpstreamSocket) -> Result<Flow> {
        self.upstream = Some(socket);
        let pending = self.conn.on_upstream_open();
        info!(flushed = pending.len(), "Upstream open");

        for frame in pending {
            self.send_upstream(frame).await?;
        }
        Ok(Flow::Continue)
    }

    async fn handle_client_frame(&mut self, frame: Frame) -> Result<Flow> {
        if let BridgeMode::Synthesize(_) = self.mode {
            debug!(kind = ?frame.kind(), "Ignoring client frame while synthesizing");
            return Ok(Flow::Continue);
        }

        match self.conn.on_client_frame(frame) {
            ClientFrameDisposition::Forward(frame) => self.send_upstream(frame).await?,
            ClientFrameDisposition::Queued { depth } => {
                debug!(depth, "Upstream still connecting, frame queued")
            }
            ClientFrameDisposition::Rejected(err) => self.send_client_error(&err).await,
        }
        Ok(Flow::Continue)
    }

    async fn handle_upstream_message(
        &mut self,
        msg: Option<std::result::Result<Message, WsError>>,
    ) -> Result<Flow> {
        let msg = match msg {
            None | Some(Ok(Message::Close(_))) => {
                info!("Upstream closed");
                self.upstream = None;
                return Ok(Flow::UpstreamClosed);
            }
            Some(Err(e)) => {
                self.upstream = None;
                return Err(Error::Transport(format!("upstream socket: {}", e)));
            }
            Some(Ok(msg)) => msg,
        };

        let relaying = matches!(self.mode, BridgeMode::Relay { .. });

        match msg {
            Message::Text(text) => {
                let seq = self.conn.on_upstream_frame(FrameKind::Text);
                if relaying {
                    self.send_to_client(Frame::Text(text.clone())).await?;
                }
                match self.machine.on_text_frame(&text) {
                    Ok(actions) => self.apply_actions(actions).await,
                    Err(e) => {
                        warn!(seq, error = %e, "Undecodable upstream text frame");
                        Ok(Flow::Continue)
                    }
                }
            }
            Message::Binary(data) => {
                self.conn.on_upstream_frame(FrameKind::Binary);
                let data = Bytes::from(data);
                if relaying {
                    self.send_to_client(Frame::Binary(data.clone())).await?;
                }
                let actions = self.machine.on_binary(data);
                self.apply_actions(actions).await
            }
            _ => Ok(Flow::Continue),
        }
    }

    async fn apply_actions(&mut self, actions: Vec<SessionAction>) -> Result<Flow> {
        for action in actions {
            match action {
                SessionAction::Send(msg) => {
                    debug!(event = msg.event_type(), event_id = msg.event_id(), "Sending control message");
                    let frame = msg.to_frame()?;
                    self.send_upstream(frame).await?;
                }
                SessionAction::StartFallbackTimer(delay) => {
                    self.fallback_at = Some(Instant::now() + delay);
                }
                SessionAction::CancelFallbackTimer => self.fallback_at = None,
                SessionAction::AppendAudio(audio) => self.append_audio(audio).await,
                SessionAction::Finished => {
                    info!(audio_bytes = self.machine.audio_bytes(), "Session finished");
                    return Ok(Flow::Finished);
                }
                SessionAction::Failed(message) => {
                    warn!(error = %message, "Upstream reported an error");
                    return Err(Error::Protocol(message));
                }
            }
        }
        Ok(Flow::Continue)
    }

    async fn append_audio(&mut self, audio: Bytes) {
        self.conn.stats_mut().audio_bytes += audio.len() as u64;

        if let BridgeMode::Synthesize(_) = self.mode {
            self.pcm.extend_from_slice(&audio);
        }

        let now = self.clock.now();
        let mut events = Vec::new();
        if let Some(playback) = self.playback.as_mut() {
            playback.push(&audio, now, &mut events);
        }
        self.emit_playback(events).await;
    }

    /// Schedule the remaining samples as the terminal block
    async fn finish_playback(&mut self) {
        let now = self.clock.now();
        let mut events = Vec::new();
        if let Some(playback) = self.playback.as_mut() {
            playback.finish(now, &mut events);
        }
        self.emit_playback(events).await;
    }

    async fn emit_playback(&mut self, events: Vec<PlaybackEvent>) {
        if events.is_empty() {
            return;
        }
        let Some(summary) = self.playback.as_ref().map(PlaybackPipeline::summary) else {
            return;
        };
        let stats = self.conn.stats_mut();
        stats.total_samples = summary.total_samples;
        stats.total_chunks = summary.total_chunks;

        let synthesizing = matches!(self.mode, BridgeMode::Synthesize(_));
        for event in events {
            if let PlaybackEvent::Progress(percent) = &event {
                trace!(percent, chunks = summary.total_chunks, "Playback progress");
                if synthesizing {
                    self.send_progress(*percent, summary.total_chunks).await;
                }
            }

            let listener_gone = match &self.playback_events {
                Some(tx) => tx.send(event).is_err(),
                None => false,
            };
            if listener_gone {
                debug!("Playback listener dropped");
                self.playback_events = None;
            }
        }
    }

    async fn send_progress(&mut self, percent: f64, chunks: u64) {
        let progress = SynthesisProgress {
            event_type: "synthesis.progress",
            percent,
            chunks,
        };
        let sent = match serde_json::to_string(&progress) {
            Ok(text) => self.send_to_client(Frame::Text(text)).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            debug!(error = %e, "Could not report progress to client");
        }
    }

    /// Send the completion frame and the WAV to a synthesis client
    async fn deliver_synthesis(&mut self, partial: bool) {
        if !matches!(self.mode, BridgeMode::Synthesize(_)) || !self.client_open {
            return;
        }
        if let Err(e) = self.send_synthesis(partial).await {
            warn!(error = %e, partial, "Failed to deliver synthesis result");
        }
    }

    async fn send_synthesis(&mut self, partial: bool) -> Result<()> {
        let sample_rate = self.machine.settings().sample_rate;
        let wav = encode_wav_mono16(&self.pcm, sample_rate)?;
        let completed = SynthesisCompleted {
            event_type: "synthesis.completed",
            audio_bytes: self.pcm.len() as u64,
            duration_secs: self.audio_duration().as_secs_f64(),
            partial,
        };
        self.send_to_client(Frame::Text(serde_json::to_string(&completed)?))
            .await?;
        self.send_to_client(Frame::Binary(wav)).await
    }

    async fn send_upstream(&mut self, frame: Frame) -> Result<()> {
        let seq = self.conn.next_seq();
        let upstream = self
            .upstream
            .as_mut()
            .ok_or_else(|| Error::ConnectionClosed("not open yet".to_string()))?;

        trace!(seq, kind = ?frame.kind(), bytes = frame.len(), "Client -> upstream");
        upstream
            .send(frame_to_message(frame))
            .await
            .map_err(|e| Error::Transport(format!("upstream send: {}", e)))
    }

    async fn send_to_client(&mut self, frame: Frame) -> Result<()> {
        if !self.client_open {
            return Ok(());
        }
        self.client.send(frame).await.inspect_err(|_| {
            self.client_open = false;
        })
    }

    async fn send_client_error(&mut self, err: &Error) {
        let message = err.to_string();
        let payload = ClientError {
            event_type: "error",
            code: err.kind().as_str(),
            message: &message,
        };
        match serde_json::to_string(&payload) {
            Ok(text) => {
                if let Err(e) = self.send_to_client(Frame::Text(text)).await {
                    debug!(error = %e, "Could not report error to client");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode client error"),
        }
    }

    /// Best-effort close of both sides, each bounded by the grace period
    async fn close_both(&mut self) {
        let grace = self.config.upstream.close_grace();

        if let Some(mut upstream) = self.upstream.take() {
            match timeout(grace, upstream.close(None)).await {
                Ok(Ok(())) => debug!("Upstream closed cleanly"),
                Ok(Err(e)) => debug!(error = %e, "Upstream close failed"),
                Err(_) => debug!(grace_ms = grace.as_millis() as u64, "Upstream close timed out"),
            }
        }

        if self.client_open {
            self.client_open = false;
            match timeout(grace, self.client.close()).await {
                Ok(Ok(())) => debug!("Client closed cleanly"),
                Ok(Err(e)) => debug!(error = %e, "Client close failed"),
                Err(_) => debug!(grace_ms = grace.as_millis() as u64, "Client close timed out"),
            }
        }
    }

    fn audio_duration(&self) -> Duration {
        self.playback
            .as_ref()
            .map(|playback| playback.summary().duration)
            .unwrap_or(Duration::ZERO)
    }

    fn outcome(&mut self) -> BridgeOutcome {
        let audio = match self.mode {
            BridgeMode::Synthesize(_) => Some(std::mem::take(&mut self.pcm).freeze()),
            BridgeMode::Relay { .. } => None,
        };

        BridgeOutcome {
            connection_id: self.conn.id().to_string(),
            connection_state: self.conn.state(),
            session_state: self.machine.state(),
            disposition: self.machine.close_disposition(),
            stats: self.conn.stats().clone(),
            audio,
            sample_rate: self.machine.settings().sample_rate,
            audio_duration: self.audio_duration(),
        }
    }
}

fn session_settings(base: &SessionSettings, mode: &BridgeMode) -> SessionSettings {
    let mut settings = base.clone();
    if let BridgeMode::Synthesize(SynthesisRequest {
        voice: Some(voice), ..
    }) = mode
    {
        settings.voice = voice.clone();
    }
    settings
}

/// Resolves when the handshake task finishes; pends forever without one
async fn join_connect(handle: &mut Option<JoinHandle<Result<UpstreamSocket>>>) -> Result<UpstreamSocket> {
    match handle {
        Some(handle) => match handle.await {
            Ok(result) => result,
            Err(e) => Err(Error::Transport(format!("upstream connect task failed: {}", e))),
        },
        None => std::future::pending().await,
    }
}

/// Next upstream message; pends forever while the upstream is not open
async fn next_upstream(
    upstream: &mut Option<UpstreamSocket>,
) -> Option<std::result::Result<Message, WsError>> {
    match upstream {
        Some(socket) => socket.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
