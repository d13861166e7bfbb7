//! WebSocket bridge server
//!
//! Accepts client WebSocket connections and runs one [`ConnectionBridge`]
//! task per connection. The bridge mode is read from the handshake query
//! string (see [`BridgeMode::from_query`]).

use crate::bridge::{BridgeMode, ConnectionBridge};
use crate::client::{ClientChannel, WsClient};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{debug, error, info, warn};
use voicerelay_core::config::RelayConfig;
use voicerelay_core::protocol::Frame;
use voicerelay_core::{Error, Result};

/// WebSocket server running one bridge per client
pub struct BridgeServer {
    listener: TcpListener,
    config: Arc<RelayConfig>,
    next_id: AtomicU64,
}

impl BridgeServer {
    /// Bind the listener
    pub async fn bind(addr: SocketAddr, config: Arc<RelayConfig>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "WebSocket bridge listening");
        Ok(Self {
            listener,
            config,
            next_id: AtomicU64::new(0),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves
    ///
    /// Connections already running keep going until they close on their own.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = self.listener.accept() => match result {
                    Ok((stream, peer_addr)) => {
                        let id = format!("conn-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
                        let config = Arc::clone(&self.config);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer_addr, id.clone(), config).await {
                                if e.is_fatal() {
                                    warn!(connection_id = %id, error = %e, code = %e.kind(), "Connection ended with error");
                                } else {
                                    debug!(connection_id = %id, error = %e, "Connection ended");
                                }
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept WebSocket connection: {}", e),
                },
                _ = &mut shutdown => {
                    info!("WebSocket bridge received shutdown signal");
                    break;
                }
            }
        }

        info!("WebSocket bridge accept loop exited");
        Ok(())
    }
}

/// Handshake with one client and run its bridge to completion
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    id: String,
    config: Arc<RelayConfig>,
) -> Result<()> {
    let mut query: Option<String> = None;
    let ws = accept_hdr_async(stream, |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        query = req.uri().query().map(str::to_owned);
        Ok(resp)
    })
    .await
    .map_err(|e| Error::Transport(format!("client handshake failed: {}", e)))?;

    info!(connection_id = %id, peer = %peer_addr, "Accepted WebSocket client");
    let mut client = WsClient::new(ws);

    let mode = match BridgeMode::from_query(query.as_deref()) {
        Ok(mode) => mode,
        Err(e) => {
            reject(&mut client, &e).await;
            return Err(e);
        }
    };
    if let Err(e) = config.upstream.credential() {
        reject(&mut client, &e).await;
        return Err(e);
    }

    ConnectionBridge::open(id, client, config, mode)?
        .run()
        .await
        .map(|_| ())
}

async fn reject<C: ClientChannel>(client: &mut C, err: &Error) {
    let payload = serde_json::json!({
        "type": "error",
        "code": err.kind().as_str(),
        "message": err.to_string(),
    });
    if let Err(e) = client.send(Frame::Text(payload.to_string())).await {
        debug!(error = %e, "Could not report rejection to client");
    }
    if let Err(e) = client.close().await {
        debug!(error = %e, "Client close failed after rejection");
    }
}
