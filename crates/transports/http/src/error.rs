//! Error types for the HTTP transport

use axum::http::StatusCode;
use thiserror::Error;
use voicerelay_core::ErrorKind;

/// HTTP transport error
#[derive(Debug, Error)]
pub enum Error {
    /// Error raised by the relay core (config, upstream status, stream errors)
    #[error(transparent)]
    Core(#[from] voicerelay_core::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Request rejected before reaching the backend
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Server-side failure (bind, serve)
    #[error("Server error: {0}")]
    Server(String),
}

/// Result type for HTTP transport operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Caller-facing error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Core(e) => e.kind(),
            Error::Http(_) | Error::Server(_) => ErrorKind::Transport,
            Error::InvalidRequest(_) => ErrorKind::InvalidData,
        }
    }

    /// Status code the proxy answers with
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::UpstreamHttp | ErrorKind::Transport => StatusCode::BAD_GATEWAY,
            ErrorKind::ConnectTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::InvalidData => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for voicerelay_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Core(e) => e,
            Error::InvalidRequest(msg) => voicerelay_core::Error::InvalidData(msg),
            other => voicerelay_core::Error::Transport(other.to_string()),
        }
    }
}

/// Map a reqwest failure to the core taxonomy
pub(crate) fn transport_error(context: &str, err: reqwest::Error) -> voicerelay_core::Error {
    voicerelay_core::Error::Transport(format!("{}: {}", context, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let upstream = Error::Core(voicerelay_core::Error::UpstreamHttp {
            status: 503,
            body: "busy".to_string(),
        });
        assert_eq!(upstream.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(upstream.kind().as_str(), "UPSTREAM_HTTP_ERROR");

        let config = Error::Core(voicerelay_core::Error::Config("no url".to_string()));
        assert_eq!(config.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let bad = Error::InvalidRequest("empty input".to_string());
        assert_eq!(bad.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_into_core_keeps_variant() {
        let err: voicerelay_core::Error = Error::Core(voicerelay_core::Error::UpstreamHttp {
            status: 401,
            body: "nope".to_string(),
        })
        .into();
        assert!(matches!(err, voicerelay_core::Error::UpstreamHttp { status: 401, .. }));
    }
}
