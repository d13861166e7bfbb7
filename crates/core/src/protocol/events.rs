//! Inbound upstream events
//!
//! Text frames from the upstream are JSON objects whose `type` field selects
//! the behavior. Audio arrives either inline as base64 in
//! `response.audio.delta` or as separate binary frames.

use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;

pub const SESSION_CREATED: &str = "session.created";
pub const SESSION_UPDATED: &str = "session.updated";
pub const RESPONSE_CREATED: &str = "response.created";
pub const RESPONSE_AUDIO_DELTA: &str = "response.audio.delta";
pub const RESPONSE_DONE: &str = "response.done";
pub const SESSION_FINISHED: &str = "session.finished";
pub const ERROR: &str = "error";

/// Decoded upstream event
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SessionCreated { session_id: Option<String> },
    SessionUpdated,
    ResponseCreated,
    /// Decoded audio from an inline base64 delta
    AudioDelta(Bytes),
    ResponseDone,
    SessionFinished,
    Error { message: String },
    /// Any event type the bridge does not act on
    Other { event_type: String },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    session: Option<SessionInfo>,
}

#[derive(Debug, Deserialize)]
struct SessionInfo {
    #[serde(default)]
    id: Option<String>,
}

impl ServerEvent {
    /// Decode a text frame
    ///
    /// # Errors
    ///
    /// `Error::Serialization` when the frame is not a JSON object with a
    /// `type`; `Error::InvalidData` for an undecodable audio delta.
    pub fn decode(text: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(text)?;

        let event = match envelope.event_type.as_str() {
            SESSION_CREATED => ServerEvent::SessionCreated {
                session_id: envelope.session.and_then(|s| s.id),
            },
            SESSION_UPDATED => ServerEvent::SessionUpdated,
            RESPONSE_CREATED => ServerEvent::ResponseCreated,
            RESPONSE_AUDIO_DELTA => {
                let delta = envelope.delta.unwrap_or_default();
                let audio = STANDARD
                    .decode(delta.as_bytes())
                    .map_err(|e| Error::InvalidData(format!("bad audio delta: {}", e)))?;
                ServerEvent::AudioDelta(Bytes::from(audio))
            }
            RESPONSE_DONE => ServerEvent::ResponseDone,
            SESSION_FINISHED => ServerEvent::SessionFinished,
            ERROR => ServerEvent::Error {
                message: error_message(envelope.error.as_ref(), envelope.message, text),
            },
            other => ServerEvent::Other {
                event_type: other.to_string(),
            },
        };

        Ok(event)
    }

    /// Event type name as it appears on the wire
    pub fn name(&self) -> &str {
        match self {
            ServerEvent::SessionCreated { .. } => SESSION_CREATED,
            ServerEvent::SessionUpdated => SESSION_UPDATED,
            ServerEvent::ResponseCreated => RESPONSE_CREATED,
            ServerEvent::AudioDelta(_) => RESPONSE_AUDIO_DELTA,
            ServerEvent::ResponseDone => RESPONSE_DONE,
            ServerEvent::SessionFinished => SESSION_FINISHED,
            ServerEvent::Error { .. } => ERROR,
            ServerEvent::Other { event_type } => event_type,
        }
    }
}

fn error_message(error: Option<&Value>, message: Option<String>, raw: &str) -> String {
    match error {
        Some(Value::Object(obj)) => {
            if let Some(Value::String(msg)) = obj.get("message") {
                return msg.clone();
            }
        }
        Some(Value::String(msg)) => return msg.clone(),
        _ => {}
    }
    message.unwrap_or_else(|| raw.to_string())
}
