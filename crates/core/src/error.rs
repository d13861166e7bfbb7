//! Error types for VoiceRelay Core

use thiserror::Error;

/// Result type alias for VoiceRelay Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while bridging or decoding a synthesis session
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid configuration (credential, endpoint, sample rate)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upstream handshake did not complete within the connect bound
    #[error("Upstream connect timed out after {timeout_ms}ms")]
    ConnectTimeout {
        /// Connect bound in milliseconds
        timeout_ms: u64,
    },

    /// Upstream sent an `error` event; the message is surfaced verbatim
    #[error("{0}")]
    Protocol(String),

    /// Connection closed before a single audio byte arrived
    #[error("Connection closed without audio")]
    ClosedWithoutAudio,

    /// Non-2xx response on the HTTP streaming path
    #[error("Upstream HTTP {status}: {body}")]
    UpstreamHttp {
        /// Upstream status code
        status: u16,
        /// Raw upstream body text
        body: String,
    },

    /// Frame submitted on a connection that is already closed or failed
    #[error("Connection is {0}")]
    ConnectionClosed(String),

    /// Transport-level failure (socket, TLS, HTTP client)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed inbound data (bad base64, bad envelope)
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Caller-facing error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing credential or endpoint; never retried
    Config,
    /// Upstream handshake exceeded its bound
    ConnectTimeout,
    /// Upstream reported an error event
    Protocol,
    /// Closed before any audio arrived
    ClosedWithoutAudio,
    /// Non-2xx on the HTTP streaming path
    UpstreamHttp,
    /// Frame sent after close
    ConnectionClosed,
    /// Socket or client failure
    Transport,
    /// Undecodable payload
    InvalidData,
}

impl ErrorKind {
    /// Wire code used in client error frames and HTTP error bodies
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "CONFIG_ERROR",
            ErrorKind::ConnectTimeout => "CONNECT_TIMEOUT",
            ErrorKind::Protocol => "PROTOCOL_ERROR",
            ErrorKind::ClosedWithoutAudio => "CLOSED_WITHOUT_AUDIO",
            ErrorKind::UpstreamHttp => "UPSTREAM_HTTP_ERROR",
            ErrorKind::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorKind::Transport => "TRANSPORT_ERROR",
            ErrorKind::InvalidData => "INVALID_DATA",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::ConnectTimeout { .. } => ErrorKind::ConnectTimeout,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::ClosedWithoutAudio => ErrorKind::ClosedWithoutAudio,
            Error::UpstreamHttp { .. } => ErrorKind::UpstreamHttp,
            Error::ConnectionClosed(_) => ErrorKind::ConnectionClosed,
            Error::Transport(_) | Error::Io(_) => ErrorKind::Transport,
            Error::InvalidData(_) | Error::Serialization(_) => ErrorKind::InvalidData,
        }
    }

    /// Whether the error ends the connection it occurred on
    ///
    /// Everything except a rejected client frame is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::ConnectionClosed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes() {
        assert_eq!(Error::Config("x".into()).kind().as_str(), "CONFIG_ERROR");
        assert_eq!(
            Error::ConnectTimeout { timeout_ms: 30_000 }.kind().as_str(),
            "CONNECT_TIMEOUT"
        );
        assert_eq!(Error::ClosedWithoutAudio.kind(), ErrorKind::ClosedWithoutAudio);
        assert_eq!(
            Error::UpstreamHttp {
                status: 503,
                body: "busy".into()
            }
            .kind()
            .to_string(),
            "UPSTREAM_HTTP_ERROR"
        );
    }

    #[test]
    fn test_protocol_message_verbatim() {
        let err = Error::Protocol("Invalid voice: Nobody".to_string());
        assert_eq!(err.to_string(), "Invalid voice: Nobody");
    }

    #[test]
    fn test_upstream_http_display_carries_status_and_body() {
        let err = Error::UpstreamHttp {
            status: 401,
            body: "{\"error\":\"bad key\"}".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("401"));
        assert!(text.contains("bad key"));
    }
}
