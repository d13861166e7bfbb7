//! Integration test for the realtime synthesis session flow
//!
//! Runs `SessionMachine` against a scripted upstream over tokio channels,
//! with the fallback timer on tokio's paused clock:
//! 1. Happy path with acknowledgment
//! 2. Silent upstream that never acknowledges the configuration
//! 3. Upstream error mid-stream
//! 4. Audio accumulated in arrival order and wrapped as WAV

use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use voicerelay_core::audio::{encode_wav_mono16, WAV_HEADER_LEN};
use voicerelay_core::config::SessionSettings;
use voicerelay_core::protocol::{OutboundMessage, ServerEvent};
use voicerelay_core::session::{CloseDisposition, SessionAction, SessionMachine, SessionState};

/// Upstream behaviors exercised by the tests
#[derive(Clone, Copy)]
enum Script {
    /// Acknowledges `session.update`, streams audio, finishes
    Cooperative,
    /// Never sends `session.updated`
    SilentOnUpdate,
    /// Sends an error after the first audio delta
    FailsMidStream,
}

/// Outcome of one driven session
struct Run {
    sent: Vec<&'static str>,
    audio: Vec<u8>,
    state: SessionState,
    failure: Option<String>,
    disposition: CloseDisposition,
}

async fn scripted_upstream(
    script: Script,
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    inbound: mpsc::UnboundedSender<ServerEvent>,
) {
    let _ = inbound.send(ServerEvent::SessionCreated {
        session_id: Some("sess_test".to_string()),
    });

    while let Some(msg) = outbound.recv().await {
        match msg.event_type() {
            "session.update" => {
                if !matches!(script, Script::SilentOnUpdate) {
                    let _ = inbound.send(ServerEvent::SessionUpdated);
                }
            }
            "input_text_buffer.commit" => {
                let _ = inbound.send(ServerEvent::ResponseCreated);
                let _ = inbound.send(ServerEvent::AudioDelta(Bytes::from_static(&[1, 0, 2, 0])));
                if matches!(script, Script::FailsMidStream) {
                    let _ = inbound.send(ServerEvent::Error {
                        message: "synthesis failed".to_string(),
                    });
                    return;
                }
                let _ = inbound.send(ServerEvent::AudioDelta(Bytes::from_static(&[3, 0, 4, 0])));
                let _ = inbound.send(ServerEvent::ResponseDone);
            }
            "session.finish" => {
                let _ = inbound.send(ServerEvent::SessionFinished);
                return;
            }
            _ => {}
        }
    }
}

async fn run_session(script: Script) -> Run {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, mut in_rx) = mpsc::unbounded_channel();
    tokio::spawn(scripted_upstream(script, out_rx, in_tx));

    let mut machine = SessionMachine::driver(SessionSettings::default(), "Good morning");
    let mut fallback: Option<Instant> = None;
    let mut run = Run {
        sent: Vec::new(),
        audio: Vec::new(),
        state: SessionState::AwaitCreated,
        failure: None,
        disposition: CloseDisposition::ClosedWithoutAudio,
    };

    loop {
        let deadline = fallback;
        let actions = tokio::select! {
            event = in_rx.recv() => match event {
                Some(event) => machine.on_event(event),
                None => break,
            },
            _ = async {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => {
                fallback = None;
                machine.on_fallback_timeout()
            }
        };

        let mut done = false;
        for action in actions {
            match action {
                SessionAction::Send(msg) => {
                    run.sent.push(msg.event_type());
                    let _ = out_tx.send(msg);
                }
                SessionAction::StartFallbackTimer(delay) => fallback = Some(Instant::now() + delay),
                SessionAction::CancelFallbackTimer => fallback = None,
                SessionAction::AppendAudio(bytes) => run.audio.extend_from_slice(&bytes),
                SessionAction::Finished => done = true,
                SessionAction::Failed(message) => {
                    run.failure = Some(message);
                    done = true;
                }
            }
        }
        if done {
            break;
        }
    }

    run.state = machine.state();
    run.disposition = machine.close_disposition();
    run
}

#[tokio::test(start_paused = true)]
async fn test_cooperative_upstream_finishes() {
    let run = run_session(Script::Cooperative).await;

    assert_eq!(
        run.sent,
        vec![
            "session.update",
            "input_text_buffer.append",
            "input_text_buffer.commit",
            "session.finish"
        ]
    );
    assert_eq!(run.state, SessionState::Finished);
    assert_eq!(run.disposition, CloseDisposition::Finished);
    assert_eq!(run.audio, vec![1, 0, 2, 0, 3, 0, 4, 0]);
}

#[tokio::test(start_paused = true)]
async fn test_silent_upstream_triggers_fallback_once() {
    let started = Instant::now();
    let run = run_session(Script::SilentOnUpdate).await;

    assert_eq!(run.state, SessionState::Finished);
    assert_eq!(
        run.sent
            .iter()
            .filter(|t| **t == "input_text_buffer.append")
            .count(),
        1
    );
    assert_eq!(run.sent.last().copied(), Some("session.finish"));
    assert!(started.elapsed() >= Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn test_error_mid_stream_reports_failure() {
    let run = run_session(Script::FailsMidStream).await;

    assert_eq!(run.state, SessionState::Errored);
    assert_eq!(run.failure.as_deref(), Some("synthesis failed"));
    assert_eq!(run.disposition, CloseDisposition::Errored);
    assert_eq!(run.audio, vec![1, 0, 2, 0]);
    assert!(!run.sent.contains(&"session.finish"));
}

#[tokio::test(start_paused = true)]
async fn test_finished_audio_wraps_as_wav() {
    let run = run_session(Script::Cooperative).await;
    let wav = encode_wav_mono16(&run.audio, 24_000).unwrap();

    assert_eq!(wav.len(), WAV_HEADER_LEN + run.audio.len());
    assert_eq!(&wav[..4], b"RIFF");
    assert_eq!(&wav[WAV_HEADER_LEN..], &run.audio[..]);
}

#[test]
fn test_upstream_closing_early_is_classified() {
    let mut machine = SessionMachine::driver(SessionSettings::default(), "hi");
    machine.on_event(ServerEvent::SessionCreated { session_id: None });
    assert_eq!(machine.close_disposition(), CloseDisposition::ClosedWithoutAudio);

    machine.on_event(ServerEvent::SessionUpdated);
    machine.on_binary(Bytes::from_static(&[0, 0]));
    assert_eq!(
        machine.close_disposition(),
        CloseDisposition::ClosedEarly { audio_bytes: 2 }
    );
}
