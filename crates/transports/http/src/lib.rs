//! HTTP chunked-streaming transport for VoiceRelay
//!
//! The request/response variant of the relay: no full-duplex session, no
//! state machine. A speech request goes out as a JSON POST and the backend's
//! chunked PCM body comes back as a byte stream that is passed through
//! unchanged. Decoding happens at the caller, typically with
//! [`voicerelay_core::audio::drive_playback`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   POST /v1/audio/speech   ┌─────────────────┐   POST   ┌─────────┐
//! │   caller    │ ────────────────────────▶ │ HttpProxyServer │ ───────▶ │ backend │
//! │ (playback)  │ ◀──── chunked PCM ─────── │  (passthrough)  │ ◀─────── │         │
//! └─────────────┘                           └─────────────────┘          └─────────┘
//! ```
//!
//! [`StreamingBackendClient`] is usable on its own when there is no proxy in
//! between.

#![warn(clippy::all)]

pub mod client;
pub mod error;
pub mod server;

pub use client::{BackendStream, ByteStream, EncodedAudio, SpeechRequest, StreamingBackendClient};
pub use error::{Error, Result};
pub use server::{ErrorResponse, HttpProxyServer};
