//! Streaming speech backend client
//!
//! Talks to a backend that answers a speech request with either a chunked
//! body of raw PCM16 (when `stream` is set) or a complete encoded blob.
//!
//! # Usage
//!
//! ```no_run
//! use voicerelay_core::config::HttpBackendConfig;
//! use voicerelay_http::StreamingBackendClient;
//! use futures::StreamExt;
//!
//! # async fn demo() -> voicerelay_http::Result<()> {
//! let client = StreamingBackendClient::new(HttpBackendConfig::default())?;
//! let request = client.speech_request("Hello there", None, true);
//! let mut stream = client.open_stream(&request).await?;
//! while let Some(chunk) = stream.next().await {
//!     let _bytes = chunk?;
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{transport_error, Error, Result};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use voicerelay_core::audio::{drive_playback, AudioClock, PlaybackSettings, PlaybackSink, PlaybackSummary};
use voicerelay_core::config::{HttpBackendConfig, PlaybackConfig};

/// Chunked response body, forwarded chunk by chunk as the backend sends it
pub type ByteStream = BoxStream<'static, voicerelay_core::Result<Bytes>>;

/// Request body for the speech endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechRequest {
    /// Model / service identifier
    pub model: String,
    /// Text to speak
    pub input: String,
    pub voice: String,
    /// Ask for a chunked raw PCM body
    pub stream: bool,
    /// Desired sample or container format
    pub response_format: String,
}

/// An open streaming response
pub struct BackendStream {
    /// Content type the backend declared, if any
    pub content_type: Option<String>,
    pub body: ByteStream,
}

impl std::fmt::Debug for BackendStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendStream")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// A complete encoded audio response
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedAudio {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// HTTP client for a streaming speech backend
#[derive(Debug, Clone)]
pub struct StreamingBackendClient {
    config: HttpBackendConfig,
    client: reqwest::Client,
}

impl StreamingBackendClient {
    /// Create a client for the configured backend
    ///
    /// # Errors
    ///
    /// `CONFIG_ERROR` when the URL is empty or not http(s).
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        if config.url.is_empty() {
            return Err(voicerelay_core::Error::Config("HTTP backend url cannot be empty".to_string()).into());
        }
        if !config.url.starts_with("http://") && !config.url.starts_with("https://") {
            return Err(voicerelay_core::Error::Config(format!(
                "HTTP backend url must start with http:// or https://, got: {}",
                config.url
            ))
            .into());
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &HttpBackendConfig {
        &self.config
    }

    /// Build a request with the configured model and format
    ///
    /// Non-streaming requests ask for `mp3`.
    pub fn speech_request(&self, input: &str, voice: Option<&str>, stream: bool) -> SpeechRequest {
        SpeechRequest {
            model: self.config.model.clone(),
            input: input.to_string(),
            voice: voice.unwrap_or(&self.config.voice).to_string(),
            stream,
            response_format: if stream {
                self.config.response_format.clone()
            } else {
                "mp3".to_string()
            },
        }
    }

    fn build_auth_header(&self) -> Option<String> {
        self.config.credential().map(|key| format!("Bearer {}", key))
    }

    /// POST the request and fail on non-2xx
    async fn send(&self, request: &SpeechRequest) -> Result<reqwest::Response> {
        debug!(
            url = %self.config.url,
            model = %request.model,
            voice = %request.voice,
            stream = request.stream,
            chars = request.input.chars().count(),
            "Sending speech request"
        );

        let mut builder = self.client.post(&self.config.url).json(request);
        if let Some(auth) = self.build_auth_header() {
            builder = builder.header("authorization", auth);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error("speech request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!(status = status.as_u16(), body = %body, "Speech backend rejected request");
            return Err(voicerelay_core::Error::UpstreamHttp {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        Ok(response)
    }

    /// Open a streaming response, keeping the backend's content type
    pub async fn open_response(&self, request: &SpeechRequest) -> Result<BackendStream> {
        let response = self.send(request).await?;
        let content_type = content_type(&response);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| transport_error("stream interrupted", e)))
            .boxed();

        Ok(BackendStream { content_type, body })
    }

    /// Open a streaming response and return its body
    ///
    /// Chunks are yielded as they arrive; nothing is buffered or decoded.
    ///
    /// # Errors
    ///
    /// `UPSTREAM_HTTP_ERROR` with the backend's status and body text on
    /// non-2xx.
    pub async fn open_stream(&self, request: &SpeechRequest) -> Result<ByteStream> {
        Ok(self.open_response(request).await?.body)
    }

    /// Fetch a complete encoded blob (non-streaming)
    pub async fn synthesize(&self, input: &str, voice: Option<&str>) -> Result<EncodedAudio> {
        if input.trim().is_empty() {
            return Err(Error::InvalidRequest("input must not be empty".to_string()));
        }

        self.fetch(&self.speech_request(input, voice, false)).await
    }

    /// Send `request` and read the whole body
    pub async fn fetch(&self, request: &SpeechRequest) -> Result<EncodedAudio> {
        let response = self.send(request).await?;
        let content_type = content_type(&response);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error("reading speech body failed", e))?;

        debug!(bytes = bytes.len(), content_type = ?content_type, "Received encoded speech");
        Ok(EncodedAudio { bytes, content_type })
    }

    /// Stream `input` and schedule it for playback
    ///
    /// The body is decoded at the configured backend sample rate.
    pub async fn play<C, K>(
        &self,
        input: &str,
        voice: Option<&str>,
        playback: &PlaybackConfig,
        clock: &C,
        sink: &mut K,
    ) -> Result<PlaybackSummary>
    where
        C: AudioClock + ?Sized,
        K: PlaybackSink + ?Sized,
    {
        let request = self.speech_request(input, voice, true);
        let stream = self.open_stream(&request).await?;
        let settings = PlaybackSettings::from_config(playback, self.config.sample_rate);
        Ok(drive_playback(stream, &settings, clock, sink).await?)
    }
}

fn content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
