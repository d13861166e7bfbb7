//! Upstream realtime endpoint connector

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use voicerelay_core::config::UpstreamConfig;
use voicerelay_core::{Error, Result};

/// Established upstream socket
pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build the authenticated handshake request
///
/// # Errors
///
/// `Error::Config` when the credential is missing or the URL is invalid.
pub fn build_request(config: &UpstreamConfig) -> Result<Request> {
    let api_key = config.credential()?;
    let url = config.endpoint_url()?;

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::Config(format!("invalid upstream request: {}", e)))?;

    let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
        .map_err(|e| Error::Config(format!("invalid upstream API key: {}", e)))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    Ok(request)
}

/// Connect to the upstream, bounded by the configured connect timeout
///
/// # Errors
///
/// `Error::ConnectTimeout` when the handshake exceeds the bound,
/// `Error::Transport` when it fails.
pub async fn connect(request: Request, config: &UpstreamConfig) -> Result<UpstreamSocket> {
    let timeout = config.connect_timeout();
    debug!(uri = %request.uri(), timeout_ms = timeout.as_millis() as u64, "Connecting upstream");

    let (socket, response) = tokio::time::timeout(timeout, connect_async(request))
        .await
        .map_err(|_| Error::ConnectTimeout {
            timeout_ms: config.connect_timeout_ms,
        })?
        .map_err(|e| Error::Transport(format!("upstream handshake failed: {}", e)))?;

    info!(status = %response.status(), "Upstream connected");
    Ok(socket)
}
