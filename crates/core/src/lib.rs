//! VoiceRelay Core - transport-free pieces of the speech relay
//!
//! This crate holds everything the relay needs that does not touch a socket:
//!
//! - **protocol**: frames, the order-stable outbound codec and inbound events
//! - **session**: the realtime synthesis state machine
//! - **audio**: PCM16 decoding, chunk accumulation, playback scheduling, WAV
//! - **config**: TOML and environment configuration
//!
//! Transports (`voicerelay-ws`, `voicerelay-http`) depend on this crate and
//! carry out the actions it computes.
//!
//! # Example
//!
//! ```
//! use voicerelay_core::config::SessionSettings;
//! use voicerelay_core::protocol::ServerEvent;
//! use voicerelay_core::session::{SessionMachine, SessionState};
//!
//! let mut machine = SessionMachine::driver(SessionSettings::default(), "Hello");
//! let actions = machine.on_event(ServerEvent::SessionCreated { session_id: None });
//!
//! assert_eq!(machine.state(), SessionState::AwaitUpdated);
//! assert_eq!(actions.len(), 2);
//! ```

#![warn(clippy::all)]

pub mod audio;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;

pub use error::{Error, ErrorKind, Result};
