//! RTSP control protocol.
//!
//! This module handles the text-based signaling channel: parsing and
//! building requests and responses, framing them on the TCP stream, and
//! driving the server session state machine.
//!
//! ## Message format
//!
//! Every message is three CRLF-terminated ASCII lines:
//!
//! ```text
//! PLAY rtsp://movie.mjpeg RTSP/1.0\r\n
//! CSeq: 1\r\n
//! Session: 123456\r\n
//! ```
//!
//! ```text
//! RTSP/1.0 200 OK\r\n
//! CSeq: 1\r\n
//! Session: 123456\r\n
//! ```
//!
//! ## Supported methods
//!
//! | Method | Valid in | Effect |
//! |--------|----------|--------|
//! | SETUP | Init | open media, allocate RTP/RTCP sockets, start sender |
//! | PLAY | Paused | start delivery, RTCP receiver and congestion control |
//! | PAUSE | Playing | suspend delivery, keep sockets |
//! | TEARDOWN | any | release everything, end the session |

pub mod framing;
pub mod handler;
pub mod request;
pub mod response;

use std::fmt;
use std::str::FromStr;

pub use framing::MessageReader;
pub use handler::MethodHandler;
pub use request::RtspRequest;
pub use response::RtspResponse;

use crate::error::{ParseErrorKind, RtspError};

/// Protocol version written on every start line.
pub const RTSP_VERSION: &str = "RTSP/1.0";

/// URI scheme prefixed to the resource path on the request line.
pub const RTSP_SCHEME: &str = "rtsp://";

/// Lifecycle requests understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Setup,
    Play,
    Pause,
    Teardown,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::Teardown => "TEARDOWN",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = RtspError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SETUP" => Ok(Self::Setup),
            "PLAY" => Ok(Self::Play),
            "PAUSE" => Ok(Self::Pause),
            "TEARDOWN" => Ok(Self::Teardown),
            _ => Err(RtspError::parse(ParseErrorKind::UnknownMethod)),
        }
    }
}

/// Iterate over `Name: value` header lines, trimmed.
///
/// Stops at the first empty line. Lines without a colon are reported as
/// [`ParseErrorKind::InvalidHeader`].
pub(crate) fn headers<'a>(
    lines: impl Iterator<Item = &'a str>,
) -> impl Iterator<Item = crate::Result<(&'a str, &'a str)>> {
    lines.take_while(|line| !line.is_empty()).map(|line| {
        let colon = line
            .find(':')
            .ok_or(RtspError::parse(ParseErrorKind::InvalidHeader))?;
        Ok((line[..colon].trim(), line[colon + 1..].trim()))
    })
}

/// Parse a decimal CSeq value.
pub(crate) fn parse_cseq(value: &str) -> crate::Result<u32> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RtspError::parse(ParseErrorKind::InvalidCSeq));
    }
    value
        .parse()
        .map_err(|_| RtspError::parse(ParseErrorKind::InvalidCSeq))
}
