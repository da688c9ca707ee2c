//! Error taxonomy for the protocol core.
//!
//! Transport and handshake failures are fatal for a session; everything else
//! is scoped to a single message, request or collection and leaves the
//! session running.

use thiserror::Error;

/// Unified error type surfaced by the core.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O or WebSocket failure. Fatal; the session closes.
    #[error("transport error: {0}")]
    Transport(String),

    /// Cipher, DH or protobuf failure during the Noise handshake. Fatal.
    #[error("handshake failure: {0}")]
    Handshake(String),

    /// Per-message decryption or MAC failure. The message is dropped.
    #[error("decryption failure: {0}")]
    Decryption(String),

    /// App-state MAC mismatch. The collection resets and retries.
    #[error("mac mismatch: {0}")]
    MacMismatch(String),

    /// Malformed node or missing required attribute. The node is dropped.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An iq went unanswered within its deadline. The session stays open.
    #[error("request {0} timed out")]
    RequestTimeout(String),

    /// The session closed while the operation was pending.
    #[error("session closed")]
    SessionClosed,

    /// Key/session store failure.
    #[error("store error: {0}")]
    Store(String),
}

/// Classifying kind, reported through the `Event::Error` surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Handshake,
    Decryption,
    MacMismatch,
    Protocol,
    RequestTimeout,
    SessionClosed,
    Store,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(_) => ErrorKind::Transport,
            Error::Handshake(_) => ErrorKind::Handshake,
            Error::Decryption(_) => ErrorKind::Decryption,
            Error::MacMismatch(_) => ErrorKind::MacMismatch,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::RequestTimeout(_) => ErrorKind::RequestTimeout,
            Error::SessionClosed => ErrorKind::SessionClosed,
            Error::Store(_) => ErrorKind::Store,
        }
    }

    /// Whether this error must tear the whole session down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Handshake(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<prost::DecodeError> for Error {
    fn from(e: prost::DecodeError) -> Self {
        Error::Protocol(format!("protobuf decode: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::SessionClosed.kind(), ErrorKind::SessionClosed);
        assert_eq!(
            Error::MacMismatch("snapshot".into()).kind(),
            ErrorKind::MacMismatch
        );
    }

    #[test]
    fn test_fatality() {
        assert!(Error::Transport("broken pipe".into()).is_fatal());
        assert!(Error::Handshake("bad server hello".into()).is_fatal());
        assert!(!Error::Decryption("bad mac".into()).is_fatal());
        assert!(!Error::RequestTimeout("12ab".into()).is_fatal());
    }
}
