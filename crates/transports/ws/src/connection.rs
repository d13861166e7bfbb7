//! Per-connection context
//!
//! Everything one bridged connection mutates lives here and is owned by the
//! single task running that connection: lifecycle state, the pending queue
//! used while the upstream is still connecting, the diagnostic sequence
//! counter and the frame statistics.

use std::collections::VecDeque;
use voicerelay_core::protocol::{Frame, FrameKind};
use voicerelay_core::Error;

/// Lifecycle of a bridged connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upstream handshake in flight; client frames are queued
    Connecting,
    /// Both sides up; frames are forwarded immediately
    Open,
    /// Closed by either side
    Closed,
    /// Upstream could not be established or failed
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Open => "OPEN",
            ConnectionState::Closed => "CLOSED",
            ConnectionState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with a frame the client sent
#[derive(Debug)]
pub enum ClientFrameDisposition {
    /// Forward to the upstream now
    Forward(Frame),
    /// Held in the pending queue until the upstream opens
    Queued { depth: usize },
    /// The connection can no longer carry frames
    Rejected(Error),
}

/// Per-connection counters, logged on close
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Frames received from the client
    pub client_frames: u64,
    /// Frames received from the upstream
    pub upstream_frames: u64,
    /// Client frames that waited in the pending queue
    pub queued_frames: u64,
    /// Frames rejected after close
    pub rejected_frames: u64,
    /// Audio bytes accepted by the session
    pub audio_bytes: u64,
    /// Samples scheduled for playback
    pub total_samples: u64,
    /// Blocks scheduled for playback
    pub total_chunks: u64,
}

/// One client connection bound to one upstream connection
#[derive(Debug)]
pub struct Connection {
    id: String,
    state: ConnectionState,
    pending: VecDeque<Frame>,
    seq: u64,
    stats: ConnectionStats,
}

impl Connection {
    /// New connection in `Connecting`
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: ConnectionState::Connecting,
            pending: VecDeque::new(),
            seq: 0,
            stats: ConnectionStats::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut ConnectionStats {
        &mut self.stats
    }

    /// Frames waiting for the upstream
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Next diagnostic sequence number; strictly increasing per connection
    pub fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Route a client frame according to the lifecycle state
    pub fn on_client_frame(&mut self, frame: Frame) -> ClientFrameDisposition {
        self.stats.client_frames += 1;

        match self.state {
            ConnectionState::Open => ClientFrameDisposition::Forward(frame),
            ConnectionState::Connecting => {
                self.pending.push_back(frame);
                self.stats.queued_frames += 1;
                ClientFrameDisposition::Queued {
                    depth: self.pending.len(),
                }
            }
            ConnectionState::Closed | ConnectionState::Failed => {
                self.stats.rejected_frames += 1;
                ClientFrameDisposition::Rejected(Error::ConnectionClosed(
                    self.state.as_str().to_lowercase(),
                ))
            }
        }
    }

    /// The upstream is up: switch to `Open` and hand back the queued frames
    /// in arrival order
    ///
    /// Returns an empty queue (and changes nothing) unless the connection was
    /// still connecting.
    pub fn on_upstream_open(&mut self) -> Vec<Frame> {
        if self.state != ConnectionState::Connecting {
            tracing::warn!(connection_id = %self.id, state = %self.state, "Upstream opened in unexpected state");
            return Vec::new();
        }
        self.state = ConnectionState::Open;
        self.pending.drain(..).collect()
    }

    /// Count an upstream frame and return its sequence number
    pub fn on_upstream_frame(&mut self, kind: FrameKind) -> u64 {
        self.stats.upstream_frames += 1;
        let seq = self.next_seq();
        tracing::trace!(connection_id = %self.id, seq, ?kind, "Upstream frame");
        seq
    }

    /// Mark closed; drops anything still queued
    pub fn close(&mut self) {
        if self.state != ConnectionState::Failed {
            self.state = ConnectionState::Closed;
        }
        self.pending.clear();
    }

    /// Mark failed; drops anything still queued
    pub fn fail(&mut self) {
        self.state = ConnectionState::Failed;
        self.pending.clear();
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, ConnectionState::Closed | ConnectionState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_queued_frames_flush_in_fifo_order() {
        let mut conn = Connection::new("c1");
        let frames = vec![
            Frame::Text("one".to_string()),
            Frame::Binary(Bytes::from_static(&[1, 2])),
            Frame::Text("three".to_string()),
        ];

        for (i, frame) in frames.iter().cloned().enumerate() {
            match conn.on_client_frame(frame) {
                ClientFrameDisposition::Queued { depth } => assert_eq!(depth, i + 1),
                other => panic!("expected queued, got {:?}", other),
            }
        }

        assert_eq!(conn.on_upstream_open(), frames);
        assert_eq!(conn.state(), ConnectionState::Open);
        assert_eq!(conn.pending_len(), 0);
    }

    #[test]
    fn test_frame_kind_preserved_through_queue() {
        let mut conn = Connection::new("c1");
        conn.on_client_frame(Frame::Binary(Bytes::from_static(b"{}")));
        conn.on_client_frame(Frame::Text("{}".to_string()));

        let kinds: Vec<FrameKind> = conn.on_upstream_open().iter().map(Frame::kind).collect();
        assert_eq!(kinds, vec![FrameKind::Binary, FrameKind::Text]);
    }

    #[test]
    fn test_open_forwards_immediately() {
        let mut conn = Connection::new("c1");
        conn.on_upstream_open();
        assert!(matches!(
            conn.on_client_frame(Frame::Text("x".to_string())),
            ClientFrameDisposition::Forward(Frame::Text(_))
        ));
        assert_eq!(conn.stats().queued_frames, 0);
    }

    #[test]
    fn test_closed_rejects_without_enqueue() {
        for fail in [false, true] {
            let mut conn = Connection::new("c1");
            if fail {
                conn.fail();
            } else {
                conn.close();
            }
            match conn.on_client_frame(Frame::Text("late".to_string())) {
                ClientFrameDisposition::Rejected(err) => {
                    assert_eq!(err.kind().as_str(), "CONNECTION_CLOSED")
                }
                other => panic!("expected rejection, got {:?}", other),
            }
            assert_eq!(conn.pending_len(), 0);
            assert_eq!(conn.stats().rejected_frames, 1);
        }
    }

    #[test]
    fn test_second_open_is_noop() {
        let mut conn = Connection::new("c1");
        conn.on_upstream_open();
        conn.on_client_frame(Frame::Text("x".to_string()));
        assert!(conn.on_upstream_open().is_empty());
    }

    #[test]
    fn test_failed_stays_failed_on_close() {
        let mut conn = Connection::new("c1");
        conn.fail();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let mut conn = Connection::new("c1");
        let a = conn.on_upstream_frame(FrameKind::Text);
        let b = conn.next_seq();
        let c = conn.on_upstream_frame(FrameKind::Binary);
        assert!(a < b && b < c);
        assert_eq!(conn.stats().upstream_frames, 2);
    }
}
