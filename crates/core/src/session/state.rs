use crate::config::SessionSettings;
use crate::protocol::{OutboundMessage, ServerEvent};
use crate::{Error, Result};
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, warn};

/// Lifecycle state of one upstream synthesis session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    AwaitCreated,
    AwaitUpdated,
    InputSent,
    AwaitDone,
    Finishing,
    Finished,
    Errored,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Finished | SessionState::Errored)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::AwaitCreated => "AWAIT_CREATED",
            SessionState::AwaitUpdated => "AWAIT_UPDATED",
            SessionState::InputSent => "INPUT_SENT",
            SessionState::AwaitDone => "AWAIT_DONE",
            SessionState::Finishing => "FINISHING",
            SessionState::Finished => "FINISHED",
            SessionState::Errored => "ERRORED",
        }
    }

    /// States in which audio is accepted
    fn accepts_audio(&self) -> bool {
        matches!(
            self,
            SessionState::InputSent | SessionState::AwaitDone | SessionState::Finishing
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the machine drives the protocol or only tracks it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Sends configuration, input and finish; arms the fallback timer
    Driver,
    /// Follows the same transitions but never emits outbound messages or
    /// timers (the client drives the protocol through the relay)
    Observer,
}

/// Side effect requested by the machine
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Send a control message upstream
    Send(OutboundMessage),
    /// Arm the fallback timer
    StartFallbackTimer(Duration),
    /// Disarm the fallback timer
    CancelFallbackTimer,
    /// Append audio to the connection's accumulator, in arrival order
    AppendAudio(Bytes),
    /// Session reached FINISHED; close with the accumulated audio
    Finished,
    /// Session reached ERRORED; report the message and close
    Failed(String),
}

/// How a connection ended from the session's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDisposition {
    Finished,
    Errored,
    /// Closed before FINISHED with zero audio bytes
    ClosedWithoutAudio,
    /// Closed before FINISHED after some audio arrived
    ClosedEarly { audio_bytes: u64 },
}

/// Explicit-state machine for the realtime synthesis protocol
#[derive(Debug)]
pub struct SessionMachine {
    role: SessionRole,
    settings: SessionSettings,
    input_text: String,
    state: SessionState,
    /// Input append/commit already went out; guards the fallback path
    input_sent: bool,
    /// `session.finish` still owed after `response.done`
    finish_pending: bool,
    session_id: Option<String>,
    audio_bytes: u64,
}

impl SessionMachine {
    /// Machine that drives a session synthesizing `input_text`
    pub fn driver(settings: SessionSettings, input_text: impl Into<String>) -> Self {
        Self::new(SessionRole::Driver, settings, input_text.into())
    }

    /// Machine that only tracks a client-driven session
    pub fn observer(settings: SessionSettings) -> Self {
        Self::new(SessionRole::Observer, settings, String::new())
    }

    fn new(role: SessionRole, settings: SessionSettings, input_text: String) -> Self {
        Self {
            role,
            settings,
            input_text,
            state: SessionState::AwaitCreated,
            input_sent: false,
            finish_pending: false,
            session_id: None,
            audio_bytes: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Audio bytes accepted so far
    pub fn audio_bytes(&self) -> u64 {
        self.audio_bytes
    }

    pub fn input_sent(&self) -> bool {
        self.input_sent
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Decode a text frame and apply it
    pub fn on_text_frame(&mut self, text: &str) -> Result<Vec<SessionAction>> {
        let event = ServerEvent::decode(text)?;
        Ok(self.on_event(event))
    }

    /// Apply one upstream event
    pub fn on_event(&mut self, event: ServerEvent) -> Vec<SessionAction> {
        if self.state.is_terminal() {
            debug!(state = %self.state, event = event.name(), "Ignoring event after terminal state");
            return Vec::new();
        }

        let mut actions = Vec::new();

        match (self.state, event) {
            (_, ServerEvent::Error { message }) => {
                self.state = SessionState::Errored;
                actions.push(SessionAction::CancelFallbackTimer);
                actions.push(SessionAction::Failed(message));
            }

            (SessionState::AwaitCreated, ServerEvent::SessionCreated { session_id }) => {
                self.session_id = session_id;
                self.state = SessionState::AwaitUpdated;
                actions.push(SessionAction::Send(OutboundMessage::session_update(
                    &self.settings,
                )));
                actions.push(SessionAction::StartFallbackTimer(
                    self.settings.fallback_delay(),
                ));
            }

            (SessionState::AwaitUpdated, ServerEvent::SessionUpdated) => {
                actions.push(SessionAction::CancelFallbackTimer);
                self.send_input(&mut actions);
            }

            (
                SessionState::InputSent | SessionState::AwaitDone | SessionState::Finishing,
                ServerEvent::SessionUpdated,
            ) => {
                debug!(state = %self.state, "Late session.updated, input already sent");
            }

            (SessionState::InputSent, ServerEvent::ResponseCreated) => {
                self.state = SessionState::AwaitDone;
            }

            (state, ServerEvent::AudioDelta(audio)) => {
                if let Some(action) = self.accept_audio(state, audio) {
                    actions.push(action);
                }
            }

            (SessionState::InputSent | SessionState::AwaitDone, ServerEvent::ResponseDone) => {
                if self.finish_pending {
                    self.finish_pending = false;
                    self.state = SessionState::Finishing;
                    actions.push(SessionAction::Send(OutboundMessage::finish()));
                } else {
                    debug!(state = %self.state, "response.done without pending finish");
                }
            }

            (SessionState::Finishing, ServerEvent::SessionFinished) => {
                self.state = SessionState::Finished;
                actions.push(SessionAction::Finished);
            }

            (_, ServerEvent::Other { event_type }) => {
                debug!(state = %self.state, event = %event_type, "Unhandled upstream event");
            }

            (state, event) => {
                warn!(state = %state, event = event.name(), "Unexpected session transition ignored");
            }
        }

        self.filter_for_role(actions)
    }

    /// Apply a binary audio frame
    pub fn on_binary(&mut self, audio: Bytes) -> Vec<SessionAction> {
        if self.state.is_terminal() {
            debug!(state = %self.state, bytes = audio.len(), "Ignoring audio after terminal state");
            return Vec::new();
        }
        self.accept_audio(self.state, audio).into_iter().collect()
    }

    /// The fallback timer fired
    ///
    /// Sends input only if still waiting for `session.updated` and input has
    /// not gone out yet, so it acts at most once per session.
    pub fn on_fallback_timeout(&mut self) -> Vec<SessionAction> {
        if self.state != SessionState::AwaitUpdated || self.input_sent {
            debug!(state = %self.state, "Fallback timer fired with nothing to do");
            return Vec::new();
        }

        warn!(
            fallback_ms = self.settings.fallback_ms,
            "No session.updated received, sending input anyway"
        );
        let mut actions = Vec::new();
        self.send_input(&mut actions);
        self.filter_for_role(actions)
    }

    /// Classify a close of the connection in the current state
    pub fn close_disposition(&self) -> CloseDisposition {
        match self.state {
            SessionState::Finished => CloseDisposition::Finished,
            SessionState::Errored => CloseDisposition::Errored,
            _ if self.audio_bytes == 0 => CloseDisposition::ClosedWithoutAudio,
            _ => CloseDisposition::ClosedEarly {
                audio_bytes: self.audio_bytes,
            },
        }
    }

    /// Error to report for a close in the current state, if any
    pub fn close_error(&self) -> Option<Error> {
        match self.close_disposition() {
            CloseDisposition::ClosedWithoutAudio => Some(Error::ClosedWithoutAudio),
            _ => None,
        }
    }

    fn send_input(&mut self, actions: &mut Vec<SessionAction>) {
        if self.input_sent {
            return;
        }
        self.input_sent = true;
        self.finish_pending = true;
        self.state = SessionState::InputSent;

        if self.role == SessionRole::Driver {
            actions.push(SessionAction::Send(OutboundMessage::append_text(
                self.input_text.clone(),
            )));
            actions.push(SessionAction::Send(OutboundMessage::commit()));
        }
    }

    fn accept_audio(&mut self, state: SessionState, audio: Bytes) -> Option<SessionAction> {
        let accepted = state.accepts_audio()
            || (self.role == SessionRole::Observer
                && matches!(state, SessionState::AwaitCreated | SessionState::AwaitUpdated));

        if !accepted {
            warn!(state = %state, bytes = audio.len(), "Audio before input was sent, dropping");
            return None;
        }

        if matches!(
            state,
            SessionState::InputSent | SessionState::AwaitCreated | SessionState::AwaitUpdated
        ) {
            // Observer sessions may see audio before any acknowledgment.
            self.input_sent = true;
            self.state = SessionState::AwaitDone;
            if state != SessionState::InputSent {
                self.finish_pending = true;
            }
        }

        self.audio_bytes += audio.len() as u64;
        Some(SessionAction::AppendAudio(audio))
    }

    fn filter_for_role(&self, actions: Vec<SessionAction>) -> Vec<SessionAction> {
        match self.role {
            SessionRole::Driver => actions,
            SessionRole::Observer => actions
                .into_iter()
                .filter(|a| {
                    !matches!(
                        a,
                        SessionAction::Send(_)
                            | SessionAction::StartFallbackTimer(_)
                            | SessionAction::CancelFallbackTimer
                    )
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> SessionMachine {
        SessionMachine::driver(SessionSettings::default(), "Hello there")
    }

    fn sent_types(actions: &[SessionAction]) -> Vec<&'static str> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Send(msg) => Some(msg.event_type()),
                _ => None,
            })
            .collect()
    }

    fn created() -> ServerEvent {
        ServerEvent::SessionCreated { session_id: None }
    }

    #[test]
    fn test_created_sends_config_and_arms_timer() {
        let mut m = driver();
        let actions = m.on_event(created());

        assert_eq!(m.state(), SessionState::AwaitUpdated);
        assert_eq!(sent_types(&actions), vec!["session.update"]);
        assert!(actions.contains(&SessionAction::StartFallbackTimer(Duration::from_millis(500))));
    }

    #[test]
    fn test_happy_path() {
        let mut m = driver();
        m.on_event(created());

        let actions = m.on_event(ServerEvent::SessionUpdated);
        assert_eq!(actions[0], SessionAction::CancelFallbackTimer);
        assert_eq!(
            sent_types(&actions),
            vec!["input_text_buffer.append", "input_text_buffer.commit"]
        );
        assert_eq!(m.state(), SessionState::InputSent);

        let actions = m.on_event(ServerEvent::AudioDelta(Bytes::from_static(&[1, 2])));
        assert_eq!(actions, vec![SessionAction::AppendAudio(Bytes::from_static(&[1, 2]))]);
        assert_eq!(m.state(), SessionState::AwaitDone);

        let actions = m.on_event(ServerEvent::ResponseDone);
        assert_eq!(sent_types(&actions), vec!["session.finish"]);
        assert_eq!(m.state(), SessionState::Finishing);

        let actions = m.on_binary(Bytes::from_static(&[3, 4]));
        assert_eq!(actions.len(), 1);

        let actions = m.on_event(ServerEvent::SessionFinished);
        assert_eq!(actions, vec![SessionAction::Finished]);
        assert_eq!(m.state(), SessionState::Finished);
        assert_eq!(m.audio_bytes(), 4);
        assert_eq!(m.close_disposition(), CloseDisposition::Finished);
    }

    #[test]
    fn test_fallback_then_late_updated_sends_once() {
        let mut m = driver();
        m.on_event(created());

        let first = m.on_fallback_timeout();
        assert_eq!(sent_types(&first).len(), 2);

        let late = m.on_event(ServerEvent::SessionUpdated);
        assert!(late.is_empty());
        assert!(m.on_fallback_timeout().is_empty());
        assert_eq!(m.state(), SessionState::InputSent);
    }

    #[test]
    fn test_updated_then_stale_timer_sends_once() {
        let mut m = driver();
        m.on_event(created());

        let first = m.on_event(ServerEvent::SessionUpdated);
        assert_eq!(sent_types(&first).len(), 2);

        assert!(m.on_fallback_timeout().is_empty());
    }

    #[test]
    fn test_timer_before_created_is_noop() {
        let mut m = driver();
        assert!(m.on_fallback_timeout().is_empty());
        assert_eq!(m.state(), SessionState::AwaitCreated);
    }

    #[test]
    fn test_error_from_any_state() {
        for steps in 0..3 {
            let mut m = driver();
            if steps >= 1 {
                m.on_event(created());
            }
            if steps >= 2 {
                m.on_event(ServerEvent::SessionUpdated);
            }
            let actions = m.on_event(ServerEvent::Error {
                message: "boom".to_string(),
            });
            assert!(actions.contains(&SessionAction::Failed("boom".to_string())));
            assert_eq!(m.state(), SessionState::Errored);
            assert!(m.on_event(ServerEvent::SessionFinished).is_empty());
        }
    }

    #[test]
    fn test_response_done_without_input_is_ignored() {
        let mut m = driver();
        assert!(m.on_event(ServerEvent::ResponseDone).is_empty());
        assert_eq!(m.state(), SessionState::AwaitCreated);
    }

    #[test]
    fn test_finished_before_finishing_is_ignored() {
        let mut m = driver();
        m.on_event(created());
        m.on_event(ServerEvent::SessionUpdated);
        assert!(m.on_event(ServerEvent::SessionFinished).is_empty());
        assert_eq!(m.state(), SessionState::InputSent);
    }

    #[test]
    fn test_audio_before_input_dropped_for_driver() {
        let mut m = driver();
        m.on_event(created());
        assert!(m.on_binary(Bytes::from_static(&[0, 0])).is_empty());
        assert_eq!(m.audio_bytes(), 0);
    }

    #[test]
    fn test_close_dispositions() {
        let mut m = driver();
        m.on_event(created());
        assert_eq!(m.close_disposition(), CloseDisposition::ClosedWithoutAudio);
        assert!(matches!(m.close_error(), Some(Error::ClosedWithoutAudio)));

        m.on_event(ServerEvent::SessionUpdated);
        m.on_binary(Bytes::from_static(&[0, 0, 0, 0]));
        assert_eq!(
            m.close_disposition(),
            CloseDisposition::ClosedEarly { audio_bytes: 4 }
        );
        assert!(m.close_error().is_none());
    }

    #[test]
    fn test_observer_tracks_without_sending() {
        let mut m = SessionMachine::observer(SessionSettings::default());

        assert!(m.on_event(created()).is_empty());
        assert_eq!(m.state(), SessionState::AwaitUpdated);
        assert!(m.on_fallback_timeout().is_empty());
        assert_eq!(m.state(), SessionState::InputSent);

        let actions = m.on_event(ServerEvent::ResponseDone);
        assert!(actions.is_empty());
        assert_eq!(m.state(), SessionState::Finishing);

        assert_eq!(m.on_event(ServerEvent::SessionFinished), vec![SessionAction::Finished]);
    }

    #[test]
    fn test_observer_accepts_early_audio() {
        let mut m = SessionMachine::observer(SessionSettings::default());
        m.on_event(created());
        let actions = m.on_binary(Bytes::from_static(&[9, 9]));
        assert_eq!(actions.len(), 1);
        assert_eq!(m.state(), SessionState::AwaitDone);
        m.on_event(ServerEvent::ResponseDone);
        assert_eq!(m.state(), SessionState::Finishing);
    }

    #[test]
    fn test_text_frame_decode_errors_propagate() {
        let mut m = driver();
        assert!(m.on_text_frame("{").is_err());
        let actions = m
            .on_text_frame(r#"{"event_id":"x","type":"session.created","session":{"id":"s1"}}"#)
            .unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(m.session_id(), Some("s1"));
    }
}
