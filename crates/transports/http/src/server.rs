//! Speech proxy server
//!
//! Provides HTTP endpoints in front of the speech backend:
//! - POST /v1/audio/speech - Streamed passthrough, or a complete blob
//! - GET /health - Health check
//!
//! Streamed bodies are forwarded chunk by chunk as the backend produces them.

use crate::client::{SpeechRequest, StreamingBackendClient};
use crate::error::{Error, Result};
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

const SAMPLE_RATE_HEADER: &str = "x-sample-rate";

/// State shared across handlers
#[derive(Clone)]
struct ProxyState {
    backend: Arc<StreamingBackendClient>,
}

/// HTTP proxy in front of a streaming speech backend
pub struct HttpProxyServer {
    listener: TcpListener,
    state: ProxyState,
}

impl HttpProxyServer {
    /// Bind the listener
    pub async fn bind(addr: SocketAddr, backend: StreamingBackendClient) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Server(format!("Failed to bind: {}", e)))?;

        Ok(Self {
            listener,
            state: ProxyState {
                backend: Arc::new(backend),
            },
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| Error::Server(format!("No local address: {}", e)))
    }

    /// Build the router with all endpoints
    fn build_router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/v1/audio/speech", post(speech_handler))
            .with_state(self.state.clone())
            .layer(
                tower::ServiceBuilder::new()
                    .layer(tower_http::trace::TraceLayer::new_for_http())
                    .layer(tower_http::cors::CorsLayer::permissive()),
            )
    }

    /// Serve until `shutdown` resolves
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();
        info!(addr = %self.local_addr()?, backend = %self.state.backend.config().url, "Speech proxy listening");

        axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Server(format!("Server error: {}", e)))?;

        info!("Speech proxy stopped");
        Ok(())
    }
}

/// Health check endpoint
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Request body for POST /v1/audio/speech
#[derive(Debug, Deserialize)]
struct ProxyRequest {
    input: String,
    #[serde(default)]
    voice: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    response_format: Option<String>,
}

impl ProxyRequest {
    fn into_speech_request(self, backend: &StreamingBackendClient) -> SpeechRequest {
        let mut request = backend.speech_request(&self.input, self.voice.as_deref(), self.stream);
        if let Some(model) = self.model {
            request.model = model;
        }
        if let Some(format) = self.response_format {
            request.response_format = format;
        }
        request
    }
}

/// POST /v1/audio/speech
async fn speech_handler(
    State(state): State<ProxyState>,
    Json(request): Json<ProxyRequest>,
) -> Result<Response> {
    if request.input.trim().is_empty() {
        return Err(Error::InvalidRequest("input must not be empty".to_string()));
    }

    let request = request.into_speech_request(&state.backend);
    info!(voice = %request.voice, stream = request.stream, "Proxying speech request");

    if request.stream {
        let upstream = state.backend.open_response(&request).await?;
        let content_type = upstream
            .content_type
            .unwrap_or_else(|| "audio/pcm".to_string());
        let headers = [
            (header::CONTENT_TYPE, content_type),
            (
                HeaderName::from_static(SAMPLE_RATE_HEADER),
                state.backend.config().sample_rate.to_string(),
            ),
        ];
        return Ok((headers, Body::from_stream(upstream.body)).into_response());
    }

    let audio = state.backend.fetch(&request).await?;
    let content_type = audio
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());
    Ok(([(header::CONTENT_TYPE, content_type)], audio.bytes).into_response())
}

/// Error response body for structured error responses
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "UPSTREAM_HTTP_ERROR", "INVALID_DATA")
    pub error_type: String,
    /// Human-readable error message
    pub message: String,
    /// Backend status code (only for upstream HTTP errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Raw backend body text (only for upstream HTTP errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let (status, body) = match &self {
            Error::Core(voicerelay_core::Error::UpstreamHttp { status, body }) => {
                (Some(*status), Some(body.clone()))
            }
            _ => (None, None),
        };
        warn!(code = %self.kind(), error = %self, "Speech request failed");

        (
            status_code,
            Json(ErrorResponse {
                error_type: self.kind().as_str().to_string(),
                message: self.to_string(),
                status,
                body,
            }),
        )
            .into_response()
    }
}
