use super::{RTSP_VERSION, headers, parse_cseq};
use crate::error::{ParseErrorKind, Result, RtspError};

/// A server-to-client RTSP response.
///
/// Serializes to the fixed three-line format:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 1\r\n
/// Session: 123456\r\n
/// ```
///
/// Error statuses keep the same shape so the client can always correlate
/// the reply with its request by CSeq.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub cseq: u32,
    pub session_id: String,
}

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str, cseq: u32, session_id: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            cseq,
            session_id: session_id.to_string(),
        }
    }

    /// 200 OK.
    pub fn ok(cseq: u32, session_id: &str) -> Self {
        Self::new(200, "OK", cseq, session_id)
    }

    /// 400 Bad Request for an out-of-order CSeq.
    pub fn bad_request(cseq: u32, session_id: &str) -> Self {
        Self::new(400, "Bad Request", cseq, session_id)
    }

    /// 404 Not Found. The SETUP resource could not be opened.
    pub fn not_found(cseq: u32, session_id: &str) -> Self {
        Self::new(404, "Not Found", cseq, session_id)
    }

    /// 454 Session Not Found for a missing or foreign Session header.
    pub fn session_not_found(cseq: u32, session_id: &str) -> Self {
        Self::new(454, "Session Not Found", cseq, session_id)
    }

    /// 455 Method Not Valid in This State.
    pub fn invalid_state(cseq: u32, session_id: &str) -> Self {
        Self::new(455, "Method Not Valid in This State", cseq, session_id)
    }

    /// 500 Internal Server Error when socket allocation fails during SETUP.
    pub fn internal_error(cseq: u32, session_id: &str) -> Self {
        Self::new(500, "Internal Server Error", cseq, session_id)
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    /// Serialize to the RTSP text wire format.
    pub fn serialize(&self) -> String {
        format!(
            "{} {} {}\r\nCSeq: {}\r\nSession: {}\r\n",
            RTSP_VERSION, self.status_code, self.status_text, self.cseq, self.session_id
        )
    }

    /// Parse a response.
    ///
    /// Requires a status line carrying the `RTSP` marker and a decimal status
    /// code, plus `CSeq` and `Session` headers. A non-200 status parses
    /// successfully; callers check [`is_success`](Self::is_success).
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines().skip_while(|line| line.trim().is_empty());

        let status_line = lines
            .next()
            .ok_or(RtspError::parse(ParseErrorKind::EmptyMessage))?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or("");
        if !version.contains("RTSP") {
            return Err(RtspError::parse(ParseErrorKind::MissingRtspMarker));
        }
        let status_code = parts
            .next()
            .filter(|code| code.len() == 3 && code.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|code| code.parse().ok())
            .ok_or(RtspError::parse(ParseErrorKind::InvalidStatusLine))?;
        let status_text = parts.next().unwrap_or("").trim().to_string();

        let mut cseq = None;
        let mut session_id = None;
        for header in headers(lines) {
            let (name, value) = header?;
            if name.eq_ignore_ascii_case("CSeq") {
                cseq = Some(parse_cseq(value)?);
            } else if name.eq_ignore_ascii_case("Session") {
                session_id = Some(value.split(';').next().unwrap_or(value).trim().to_string());
            }
        }

        Ok(RtspResponse {
            status_code,
            status_text,
            cseq: cseq.ok_or(RtspError::parse(ParseErrorKind::MissingCSeq))?,
            session_id: session_id.ok_or(RtspError::parse(ParseErrorKind::MissingSession))?,
        })
    }
}
