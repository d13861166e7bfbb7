//! Client side of a bridged connection
//!
//! The bridge talks to its client through [`ClientChannel`], so the same task
//! can serve a WebSocket peer or an in-process caller.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use voicerelay_core::protocol::Frame;
use voicerelay_core::{Error, Result};

/// Bidirectional frame channel to the client
#[async_trait]
pub trait ClientChannel: Send {
    /// Next frame from the client; `None` once the client has closed
    ///
    /// Must be cancel-safe: it is polled inside `tokio::select!`.
    async fn recv(&mut self) -> Option<Result<Frame>>;

    /// Send a frame to the client
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Close the client side
    async fn close(&mut self) -> Result<()>;
}

/// Convert a tungstenite message to a frame; control messages yield `None`
pub fn message_to_frame(msg: Message) -> Option<Frame> {
    match msg {
        Message::Text(text) => Some(Frame::Text(text)),
        Message::Binary(data) => Some(Frame::Binary(Bytes::from(data))),
        _ => None,
    }
}

/// Convert a frame to a tungstenite message of the same kind
pub fn frame_to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data.to_vec()),
    }
}

/// Client connected over WebSocket
pub struct WsClient<S> {
    stream: WebSocketStream<S>,
    closed: bool,
}

impl<S> WsClient<S> {
    pub fn new(stream: WebSocketStream<S>) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

#[async_trait]
impl<S> ClientChannel for WsClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Option<Result<Frame>> {
        if self.closed {
            return None;
        }
        loop {
            match self.stream.next().await? {
                Ok(Message::Close(_)) => {
                    self.closed = true;
                    return None;
                }
                Ok(msg) => {
                    if let Some(frame) = message_to_frame(msg) {
                        return Some(Ok(frame));
                    }
                }
                Err(e) => {
                    self.closed = true;
                    return Some(Err(Error::Transport(format!("client socket: {}", e))));
                }
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.stream
            .send(frame_to_message(frame))
            .await
            .map_err(|e| Error::Transport(format!("client send: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| Error::Transport(format!("client close: {}", e)))
    }
}

/// In-process client backed by channels
///
/// Without an inbound channel the client never sends anything and never
/// closes; without an outbound channel frames sent to it are dropped.
#[derive(Debug, Default)]
pub struct DetachedClient {
    inbound: Option<mpsc::UnboundedReceiver<Frame>>,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
}

/// Caller end of a [`DetachedClient`]
#[derive(Debug)]
pub struct DetachedHandle {
    /// Frames to deliver to the bridge as if the client sent them;
    /// dropping it closes the client side
    pub to_bridge: mpsc::UnboundedSender<Frame>,
    /// Frames the bridge sent to the client
    pub from_bridge: mpsc::UnboundedReceiver<Frame>,
}

impl DetachedClient {
    /// Client that neither sends nor listens
    pub fn silent() -> Self {
        Self::default()
    }

    /// Client wired to a caller-held handle
    pub fn pair() -> (Self, DetachedHandle) {
        let (to_bridge, inbound) = mpsc::unbounded_channel();
        let (outbound, from_bridge) = mpsc::unbounded_channel();
        (
            Self {
                inbound: Some(inbound),
                outbound: Some(outbound),
            },
            DetachedHandle {
                to_bridge,
                from_bridge,
            },
        )
    }
}

#[async_trait]
impl ClientChannel for DetachedClient {
    async fn recv(&mut self) -> Option<Result<Frame>> {
        match self.inbound.as_mut() {
            Some(rx) => rx.recv().await.map(Ok),
            None => std::future::pending().await,
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<()> {
        if let Some(tx) = &self.outbound {
            tx.send(frame)
                .map_err(|_| Error::ConnectionClosed("closed by the caller".to_string()))?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.inbound = None;
        self.outbound = None;
        Ok(())
    }
}
