//! Transport frames
//!
//! A frame is either a text (JSON control) message or a binary (raw audio)
//! message. The kind travels with the payload so relays can forward it
//! without reinterpreting it.

use bytes::Bytes;

/// Frame kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Text,
    Binary,
}

/// A single transport message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame
    Text(String),
    /// Binary frame, bytes kept exactly as received
    Binary(Bytes),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Text(_) => FrameKind::Text,
            Frame::Binary(_) => FrameKind::Binary,
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(text) => Some(text),
            Frame::Binary(_) => None,
        }
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame::Text(text)
    }
}

impl From<Bytes> for Frame {
    fn from(bytes: Bytes) -> Self {
        Frame::Binary(bytes)
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Frame::Binary(Bytes::from(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_len() {
        let text = Frame::from("{}".to_string());
        let binary = Frame::from(vec![1u8, 2, 3]);

        assert_eq!(text.kind(), FrameKind::Text);
        assert_eq!(binary.kind(), FrameKind::Binary);
        assert_eq!(binary.len(), 3);
        assert_eq!(text.as_text(), Some("{}"));
        assert!(binary.as_text().is_none());
        assert!(Frame::Binary(Bytes::new()).is_empty());
    }
}
