//! WebSocket transport for VoiceRelay
//!
//! Binds client connections to the realtime synthesis upstream.
//!
//! # Architecture
//!
//! ```text
//! client ──▶ BridgeServer ──▶ ConnectionBridge (one task per client)
//!                               ├─ Connection      (state, FIFO pending queue, stats)
//!                               ├─ SessionMachine  (protocol lifecycle)
//!                               └─ PlaybackPipeline (decode and schedule audio)
//!                                      │
//!                                      ▼
//!                                  upstream (wss, bearer auth)
//! ```
//!
//! `RealtimeSynthesizer` runs the same bridge with an in-process client for
//! callers that just want audio back.

#![warn(clippy::all)]

pub mod bridge;
pub mod client;
pub mod connection;
pub mod server;
pub mod synthesizer;
pub mod upstream;

pub use bridge::{BridgeMode, BridgeOutcome, ConnectionBridge, SynthesisRequest};
pub use client::{ClientChannel, DetachedClient, DetachedHandle, WsClient};
pub use connection::{ClientFrameDisposition, Connection, ConnectionState, ConnectionStats};
pub use server::BridgeServer;
pub use synthesizer::{RealtimeSynthesizer, SynthesisOutput};
