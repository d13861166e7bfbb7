//! Configuration types for VoiceRelay
//!
//! Loaded from TOML (every field has a default), then overridden from the
//! environment. Process-wide and read-only once a server starts.

use crate::audio::ChunkPolicy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Environment variable overriding `upstream.url`
pub const ENV_UPSTREAM_URL: &str = "VOICERELAY_UPSTREAM_URL";
/// Environment variable overriding `upstream.api_key`
pub const ENV_UPSTREAM_API_KEY: &str = "VOICERELAY_UPSTREAM_API_KEY";
/// Environment variable overriding `http_backend.url`
pub const ENV_HTTP_BACKEND_URL: &str = "VOICERELAY_HTTP_BACKEND_URL";
/// Environment variable overriding `http_backend.api_key`
pub const ENV_HTTP_BACKEND_API_KEY: &str = "VOICERELAY_HTTP_BACKEND_API_KEY";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Realtime WebSocket upstream
    pub upstream: UpstreamConfig,

    /// Synthesis session parameters sent in `session.update`
    pub session: SessionSettings,

    /// HTTP chunked-streaming backend
    pub http_backend: HttpBackendConfig,

    /// Caller-side decoding and scheduling
    pub playback: PlaybackConfig,
}

/// Realtime upstream endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// WebSocket URL (ws:// or wss://)
    pub url: String,

    /// Bearer credential; the bridge refuses to open without it
    pub api_key: Option<String>,

    /// Model appended as the `model` query parameter (empty: none)
    pub model: String,

    /// Upper bound on the upstream handshake (default: 30000)
    pub connect_timeout_ms: u64,

    /// Grace period when closing the counterpart side (default: 1000)
    pub close_grace_ms: u64,
}

/// Parameters of one synthesis session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Voice identifier
    pub voice: String,

    /// Upstream commit mode
    pub mode: String,

    /// Output audio format requested from the upstream
    pub response_format: String,

    /// Output sample rate in Hz (default: 24000)
    pub sample_rate: u32,

    /// Wait for `session.updated` before sending input anyway (default: 500)
    pub fallback_ms: u64,
}

/// HTTP streaming backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpBackendConfig {
    /// Speech endpoint (http:// or https://)
    pub url: String,

    /// Bearer credential
    pub api_key: Option<String>,

    /// Model / service identifier sent in the request body
    pub model: String,

    /// Voice used when a request names none
    pub voice: String,

    /// Raw PCM sample rate of streamed responses (default: 48000)
    pub sample_rate: u32,

    /// Sample format requested when streaming
    pub response_format: String,

    /// Whole-request timeout (default: 120000)
    pub request_timeout_ms: u64,
}

/// Decoder and scheduler tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Delay before the first block (default: 100)
    pub lead_time_ms: u64,

    /// Bytes buffered before a decode pass (default: 9600)
    pub min_chunk_bytes: usize,

    /// Decode everything available or fixed windows
    pub chunk_policy: ChunkPolicy,

    /// Progress added per scheduled chunk (default: 5.0)
    pub progress_step: f64,

    /// Progress ceiling before the terminal block (default: 95.0)
    pub progress_cap: f64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "wss://dashscope.aliyuncs.com/api-ws/v1/realtime".to_string(),
            api_key: None,
            model: "qwen-tts-realtime".to_string(),
            connect_timeout_ms: 30_000,
            close_grace_ms: 1_000,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            voice: "Cherry".to_string(),
            mode: "commit".to_string(),
            response_format: "pcm".to_string(),
            sample_rate: 24_000,
            fallback_ms: 500,
        }
    }
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000/v1/audio/speech".to_string(),
            api_key: None,
            model: "tts-1".to_string(),
            voice: "default".to_string(),
            sample_rate: 48_000,
            response_format: "pcm".to_string(),
            request_timeout_ms: 120_000,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            lead_time_ms: 100,
            min_chunk_bytes: 9600,
            chunk_policy: ChunkPolicy::DrainAvailable,
            progress_step: 5.0,
            progress_cap: 95.0,
        }
    }
}

impl UpstreamConfig {
    /// The configured credential
    ///
    /// # Errors
    ///
    /// `Error::Config` when no non-empty key is configured.
    pub fn credential(&self) -> Result<&str> {
        match self.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(Error::Config(format!(
                "no API key configured for upstream {}",
                self.url
            ))),
        }
    }

    /// Upstream URL with the `model` query parameter applied
    pub fn endpoint_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| Error::Config(format!("invalid upstream url {}: {}", self.url, e)))?;
        let has_model = url.query_pairs().any(|(k, _)| k == "model");
        if !self.model.is_empty() && !has_model {
            url.query_pairs_mut().append_pair("model", &self.model);
        }
        Ok(url)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

impl SessionSettings {
    pub fn fallback_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_ms)
    }
}

impl HttpBackendConfig {
    /// The configured credential, if any
    pub fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl RelayConfig {
    /// Parse a TOML document; missing fields take their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("invalid config: {}", e)))
    }

    /// Read and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply `VOICERELAY_*` environment overrides
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_UPSTREAM_URL) {
            self.upstream.url = url;
        }
        if let Some(key) = lookup(ENV_UPSTREAM_API_KEY) {
            self.upstream.api_key = Some(key);
        }
        if let Some(url) = lookup(ENV_HTTP_BACKEND_URL) {
            self.http_backend.url = url;
        }
        if let Some(key) = lookup(ENV_HTTP_BACKEND_API_KEY) {
            self.http_backend.api_key = Some(key);
        }
    }

    /// Validate configuration
    ///
    /// Credentials are not required here; a missing upstream key only fails
    /// the bridge when a connection is opened.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for bad URLs, zero sample rates or zero
    /// timeouts.
    pub fn validate(&self) -> Result<()> {
        check_scheme(&self.upstream.url, &["ws", "wss"], "upstream.url")?;
        check_scheme(&self.http_backend.url, &["http", "https"], "http_backend.url")?;

        if self.session.sample_rate == 0 {
            return Err(Error::Config("session.sample_rate must be > 0".to_string()));
        }
        if self.http_backend.sample_rate == 0 {
            return Err(Error::Config(
                "http_backend.sample_rate must be > 0".to_string(),
            ));
        }
        if self.upstream.connect_timeout_ms == 0 {
            return Err(Error::Config(
                "upstream.connect_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.http_backend.request_timeout_ms == 0 {
            return Err(Error::Config(
                "http_backend.request_timeout_ms must be > 0".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.playback.progress_cap) {
            return Err(Error::Config(format!(
                "playback.progress_cap must be within 0-100, got {}",
                self.playback.progress_cap
            )));
        }

        Ok(())
    }
}

fn check_scheme(raw: &str, allowed: &[&str], field: &str) -> Result<()> {
    if raw.is_empty() {
        return Err(Error::Config(format!("{} cannot be empty", field)));
    }
    let url = Url::parse(raw).map_err(|e| Error::Config(format!("{} is invalid: {}", field, e)))?;
    if !allowed.contains(&url.scheme()) {
        return Err(Error::Config(format!(
            "{} must use one of {:?}, got: {}",
            field,
            allowed,
            url.scheme()
        )));
    }
    Ok(())
}
