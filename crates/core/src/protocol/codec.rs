//! Outbound control message codec
//!
//! The upstream parses control messages order-sensitively, so every message
//! type is a dedicated struct whose declared field order is the wire order:
//! `event_id` first, then `type`, then the payload. Serialization goes
//! straight from the struct (never through a map), which keeps the output
//! byte-stable.

use super::frame::Frame;
use crate::config::SessionSettings;
use crate::Result;
use serde::Serialize;
use uuid::Uuid;

pub const SESSION_UPDATE: &str = "session.update";
pub const INPUT_TEXT_APPEND: &str = "input_text_buffer.append";
pub const INPUT_TEXT_COMMIT: &str = "input_text_buffer.commit";
pub const SESSION_FINISH: &str = "session.finish";

/// Generate a fresh event id (`event_` + 32 hex chars)
pub fn new_event_id() -> String {
    format!("event_{}", Uuid::new_v4().simple())
}

/// `session.update`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionUpdate {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub session: SessionParams,
}

/// Session parameters carried by `session.update`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionParams {
    pub voice: String,
    pub mode: String,
    pub response_format: String,
    pub sample_rate: u32,
}

/// `input_text_buffer.append`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputTextAppend {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub text: String,
}

/// Payload-free control message (`input_text_buffer.commit`, `session.finish`)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BareEvent {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: &'static str,
}

/// Any control message the bridge sends upstream
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    SessionUpdate(SessionUpdate),
    AppendText(InputTextAppend),
    Commit(BareEvent),
    Finish(BareEvent),
}

impl OutboundMessage {
    /// Configuration message for `settings`
    pub fn session_update(settings: &SessionSettings) -> Self {
        OutboundMessage::SessionUpdate(SessionUpdate {
            event_id: new_event_id(),
            event_type: SESSION_UPDATE,
            session: SessionParams {
                voice: settings.voice.clone(),
                mode: settings.mode.clone(),
                response_format: settings.response_format.clone(),
                sample_rate: settings.sample_rate,
            },
        })
    }

    pub fn append_text(text: impl Into<String>) -> Self {
        OutboundMessage::AppendText(InputTextAppend {
            event_id: new_event_id(),
            event_type: INPUT_TEXT_APPEND,
            text: text.into(),
        })
    }

    pub fn commit() -> Self {
        OutboundMessage::Commit(BareEvent {
            event_id: new_event_id(),
            event_type: INPUT_TEXT_COMMIT,
        })
    }

    pub fn finish() -> Self {
        OutboundMessage::Finish(BareEvent {
            event_id: new_event_id(),
            event_type: SESSION_FINISH,
        })
    }

    pub fn event_id(&self) -> &str {
        match self {
            OutboundMessage::SessionUpdate(m) => &m.event_id,
            OutboundMessage::AppendText(m) => &m.event_id,
            OutboundMessage::Commit(m) | OutboundMessage::Finish(m) => &m.event_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            OutboundMessage::SessionUpdate(m) => m.event_type,
            OutboundMessage::AppendText(m) => m.event_type,
            OutboundMessage::Commit(m) | OutboundMessage::Finish(m) => m.event_type,
        }
    }

    /// Compact JSON in declared field order
    pub fn encode(&self) -> Result<String> {
        let text = match self {
            OutboundMessage::SessionUpdate(m) => serde_json::to_string(m)?,
            OutboundMessage::AppendText(m) => serde_json::to_string(m)?,
            OutboundMessage::Commit(m) | OutboundMessage::Finish(m) => serde_json::to_string(m)?,
        };
        Ok(text)
    }

    /// Encode as a text frame
    pub fn to_frame(&self) -> Result<Frame> {
        Ok(Frame::Text(self.encode()?))
    }
}
