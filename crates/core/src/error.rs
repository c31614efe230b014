//! Error types for the streaming library.

use std::fmt;

use crate::protocol::Method;
use crate::session::SessionState;

/// Errors that can occur anywhere in the streaming stack.
///
/// Variants map to the failure classes of the protocol:
///
/// - **Parse**: [`Parse`](Self::Parse): malformed RTSP text or RTP/RTCP bytes.
/// - **Protocol state**: [`InvalidState`](Self::InvalidState): a valid request
///   that is illegal in the current session state.
/// - **Transport**: [`Io`](Self::Io), [`ConnectionClosed`](Self::ConnectionClosed),
///   [`NotConnected`](Self::NotConnected).
/// - **Exchange**: [`Status`](Self::Status), [`SequenceMismatch`](Self::SequenceMismatch),
///   [`SessionNotFound`](Self::SessionNotFound).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse wire data.
    #[error("parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The request is valid but not allowed in the current state.
    #[error("{method} not valid in state {state:?}")]
    InvalidState {
        method: Method,
        state: SessionState,
    },

    /// The server answered with a non-200 status.
    #[error("server replied {code} {reason}")]
    Status { code: u16, reason: String },

    /// The response CSeq did not echo the request CSeq.
    #[error("CSeq mismatch: sent {expected}, got {actual}")]
    SequenceMismatch { expected: u32, actual: u32 },

    /// A lifecycle call was made without an open RTSP connection.
    #[error("RTSP connection not established")]
    NotConnected,

    /// The peer closed the RTSP connection.
    #[error("RTSP connection closed by peer")]
    ConnectionClosed,

    /// The session id in a request does not match the active session.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The resource named in SETUP could not be opened.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// An encoded frame needs more fragments than the one-byte prefix can count.
    #[error("frame of {size} bytes exceeds the {max} byte fragmentation limit")]
    FrameTooLarge { size: usize, max: usize },
}

impl RtspError {
    pub(crate) fn parse(kind: ParseErrorKind) -> Self {
        Self::Parse { kind }
    }

    /// Whether this is a socket read timeout that polling loops retry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Io(e) if is_timeout(e))
    }
}

/// `WouldBlock` on Unix, `TimedOut` on Windows.
pub(crate) fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

/// Specific kind of parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no start line).
    EmptyMessage,
    /// Request line did not have the `Method URI Version` shape.
    InvalidRequestLine,
    /// The method token is not one of SETUP, PLAY, PAUSE, TEARDOWN.
    UnknownMethod,
    /// No `RTSP` version marker on the start line.
    MissingRtspMarker,
    /// Response status line was malformed.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// The mandatory `CSeq` header is absent.
    MissingCSeq,
    /// `CSeq` is not a decimal number.
    InvalidCSeq,
    /// SETUP without a `client_port` transport parameter.
    MissingTransport,
    /// `client_port` is not a decimal port number.
    InvalidPort,
    /// Response without a `Session` header.
    MissingSession,
    /// Datagram shorter than the fixed header.
    Truncated,
    /// Version bits are not 2.
    BadVersion,
    /// CSRC count or extension bit set.
    UnsupportedHeader,
    /// RTCP packet type is not a receiver report.
    BadPacketType,
    /// RTCP fraction lost outside `[0, 1]`.
    InvalidFractionLost,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::EmptyMessage => "empty message",
            Self::InvalidRequestLine => "invalid request line",
            Self::UnknownMethod => "unknown method",
            Self::MissingRtspMarker => "missing RTSP marker",
            Self::InvalidStatusLine => "invalid status line",
            Self::InvalidHeader => "invalid header",
            Self::MissingCSeq => "missing CSeq",
            Self::InvalidCSeq => "CSeq is not a decimal number",
            Self::MissingTransport => "SETUP without client_port",
            Self::InvalidPort => "client_port is not a decimal port",
            Self::MissingSession => "missing Session",
            Self::Truncated => "truncated packet",
            Self::BadVersion => "unsupported version",
            Self::UnsupportedHeader => "CSRC list or header extension present",
            Self::BadPacketType => "not a receiver report",
            Self::InvalidFractionLost => "fraction lost out of range",
        };
        f.write_str(text)
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
