//! Error types for the relay and the command channel.
//!
//! Each component owns one error enum, matching the failure classes it
//! can produce:
//!
//! - [`ConnectError`]: opening the control socket failed.
//! - [`SendError`]: a command could not be written.
//! - [`StreamError`]: the upstream video session ended abnormally.
//!
//! [`BotlinkError`] wraps all three for callers that do not care which
//! component failed.

use std::io;
use std::time::Duration;

use thiserror::Error;

// ── ConnectError ─────────────────────────────────────────────────

/// Failure classes observed when opening a TCP connection.
///
/// Every class means the same thing to the caller (the connection is
/// unavailable); the distinction exists for logging and status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    InvalidAddress,
    Timeout,
    Refused,
    Reset,
    PermissionDenied,
    Other,
}

impl ConnectErrorKind {
    /// Classify an I/O error raised by `connect(2)` or a later socket call.
    pub fn classify(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::Refused,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => Self::Reset,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::InvalidInput | io::ErrorKind::AddrNotAvailable => Self::InvalidAddress,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for ConnectErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvalidAddress => "invalid address",
            Self::Timeout => "timeout",
            Self::Refused => "refused",
            Self::Reset => "reset",
            Self::PermissionDenied => "permission denied",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Opening the control connection failed.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Host or port did not pass syntactic validation or resolution.
    #[error("invalid address {addr}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    /// The TCP handshake did not complete within the connect timeout.
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),

    /// `disconnect` was called while the attempt was still in flight.
    #[error("connection attempt aborted by disconnect")]
    Aborted,

    /// The socket layer reported an error.
    #[error("{kind} connecting to {addr}: {source}")]
    Io {
        kind: ConnectErrorKind,
        addr: String,
        #[source]
        source: io::Error,
    },
}

impl ConnectError {
    pub(crate) fn io(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            kind: ConnectErrorKind::classify(&source),
            addr: addr.into(),
            source,
        }
    }

    /// The failure class of this error.
    pub fn kind(&self) -> ConnectErrorKind {
        match self {
            Self::InvalidAddress { .. } => ConnectErrorKind::InvalidAddress,
            Self::Timeout(_) => ConnectErrorKind::Timeout,
            Self::Aborted => ConnectErrorKind::Other,
            Self::Io { kind, .. } => *kind,
        }
    }
}

// ── SendError ────────────────────────────────────────────────────

/// Failure classes for a command write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorKind {
    ShortWrite,
    Reset,
    BrokenPipe,
    Other,
}

impl SendErrorKind {
    pub fn classify(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WriteZero => Self::ShortWrite,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => Self::Reset,
            io::ErrorKind::BrokenPipe => Self::BrokenPipe,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for SendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ShortWrite => "short write",
            Self::Reset => "connection reset",
            Self::BrokenPipe => "broken pipe",
            Self::Other => "socket error",
        };
        f.write_str(s)
    }
}

/// A command could not be delivered to the control socket.
#[derive(Debug, Error)]
pub enum SendError {
    /// The channel is not in the `Connected` state.
    #[error("not connected")]
    NotConnected,

    /// The command was empty or whitespace only.
    #[error("command cannot be empty")]
    EmptyCommand,

    /// The write failed; the connection has been closed.
    #[error("send failed ({kind}): {source}")]
    Failed {
        kind: SendErrorKind,
        #[source]
        source: io::Error,
    },
}

impl From<io::Error> for SendError {
    fn from(source: io::Error) -> Self {
        SendError::Failed {
            kind: SendErrorKind::classify(&source),
            source,
        }
    }
}

// ── StreamError ──────────────────────────────────────────────────

/// The upstream video session terminated.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The HTTP request could not be sent or the body stream broke.
    #[error("upstream http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The upstream answered with a non-success status.
    #[error("upstream returned status {0}")]
    Status(u16),

    /// The connect step exceeded its deadline.
    #[error("upstream connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The upstream ended the body.
    #[error("upstream closed the stream")]
    UpstreamClosed,

    /// Reading from the body failed.
    #[error("upstream read error: {0}")]
    Io(#[from] io::Error),

    /// A frame failed structural validation. Skipped, never fatal.
    #[error("frame {sequence} failed to decode")]
    Decode { sequence: u64 },

    /// Too many bytes accumulated without a complete frame.
    #[error("unmatched buffer too large: {size} bytes (max {max})")]
    BufferOverflow { size: usize, max: usize },
}

// ── BotlinkError ─────────────────────────────────────────────────

/// Umbrella error for callers that drive several components.
#[derive(Debug, Error)]
pub enum BotlinkError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    /// A background task or its channel went away.
    #[error("channel closed")]
    ChannelClosed,
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for BotlinkError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        BotlinkError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_kind_classification() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "nope");
        assert_eq!(ConnectErrorKind::classify(&refused), ConnectErrorKind::Refused);

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        let e = ConnectError::io("10.0.0.1:8082", denied);
        assert_eq!(e.kind(), ConnectErrorKind::PermissionDenied);
        assert!(e.to_string().contains("10.0.0.1:8082"));
    }

    #[test]
    fn send_error_from_io() {
        let e: SendError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(matches!(
            e,
            SendError::Failed {
                kind: SendErrorKind::BrokenPipe,
                ..
            }
        ));
    }

    #[test]
    fn overflow_message_mentions_sizes() {
        let e = StreamError::BufferOverflow {
            size: 2000,
            max: 1000,
        };
        assert!(e.to_string().contains("2000"));
        assert!(e.to_string().contains("1000"));
    }

    #[test]
    fn umbrella_wraps_components() {
        let e: BotlinkError = SendError::NotConnected.into();
        assert_eq!(e.to_string(), "not connected");
    }
}
