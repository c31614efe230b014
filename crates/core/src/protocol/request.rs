use std::fmt::Write as _;

use super::{Method, RTSP_SCHEME, RTSP_VERSION, headers, parse_cseq};
use crate::error::{ParseErrorKind, Result, RtspError};

/// Transport profile announced by the client in SETUP.
pub const TRANSPORT_PROFILE: &str = "RTP/UDP";

/// A client-to-server RTSP request.
///
/// ```text
/// Method SP rtsp://path SP RTSP/1.0 CRLF
/// CSeq: n CRLF
/// Transport: RTP/UDP;client_port=port CRLF   (SETUP)
/// Session: id CRLF                           (PLAY, PAUSE, TEARDOWN)
/// ```
///
/// Header names are matched case-insensitively; unknown headers are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspRequest {
    pub method: Method,
    /// Resource path without the `rtsp://` scheme.
    pub path: String,
    pub cseq: u32,
    pub session_id: Option<String>,
    /// RTP receive port announced by the client, SETUP only.
    pub client_rtp_port: Option<u16>,
}

impl RtspRequest {
    /// Build a SETUP request announcing the client's RTP port.
    pub fn setup(path: &str, cseq: u32, client_rtp_port: u16) -> Self {
        Self {
            method: Method::Setup,
            path: path.to_string(),
            cseq,
            session_id: None,
            client_rtp_port: Some(client_rtp_port),
        }
    }

    /// Build a PLAY, PAUSE or TEARDOWN request for an established session.
    pub fn with_session(method: Method, path: &str, cseq: u32, session_id: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            cseq,
            session_id: Some(session_id.to_string()),
            client_rtp_port: None,
        }
    }

    /// Parse a request from its text representation.
    ///
    /// The method token, an `RTSP` version marker and a decimal `CSeq` are
    /// required. SETUP additionally requires a decimal `client_port`.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines().skip_while(|line| line.trim().is_empty());

        let request_line = lines
            .next()
            .ok_or(RtspError::parse(ParseErrorKind::EmptyMessage))?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(RtspError::parse(ParseErrorKind::InvalidRequestLine));
        }

        let method: Method = parts[0].parse()?;
        let path = parts[1].strip_prefix(RTSP_SCHEME).unwrap_or(parts[1]);
        if !parts[2].contains("RTSP") {
            return Err(RtspError::parse(ParseErrorKind::MissingRtspMarker));
        }
        if parts[2] != RTSP_VERSION {
            tracing::warn!(version = parts[2], "client sent non-RTSP/1.0 version");
        }

        let mut cseq = None;
        let mut session_id = None;
        let mut client_rtp_port = None;

        for header in headers(lines) {
            let (name, value) = header?;
            if name.eq_ignore_ascii_case("CSeq") {
                cseq = Some(parse_cseq(value)?);
            } else if name.eq_ignore_ascii_case("Session") {
                session_id = Some(value.split(';').next().unwrap_or(value).trim().to_string());
            } else if name.eq_ignore_ascii_case("Transport") {
                client_rtp_port = parse_client_port(value)?;
            }
        }

        let cseq = cseq.ok_or(RtspError::parse(ParseErrorKind::MissingCSeq))?;

        if method == Method::Setup && client_rtp_port.is_none() {
            return Err(RtspError::parse(ParseErrorKind::MissingTransport));
        }
        if method != Method::Setup {
            client_rtp_port = None;
        }

        Ok(Self {
            method,
            path: path.to_string(),
            cseq,
            session_id,
            client_rtp_port,
        })
    }

    /// Serialize to the three-line wire format.
    pub fn serialize(&self) -> String {
        let mut out = format!(
            "{} {}{} {}\r\n",
            self.method, RTSP_SCHEME, self.path, RTSP_VERSION
        );
        let _ = write!(out, "CSeq: {}\r\n", self.cseq);

        match (self.method, self.client_rtp_port, &self.session_id) {
            (Method::Setup, Some(port), _) => {
                let _ = write!(out, "Transport: {TRANSPORT_PROFILE};client_port={port}\r\n");
            }
            (_, _, Some(id)) => {
                let _ = write!(out, "Session: {id}\r\n");
            }
            _ => {}
        }
        out
    }
}

/// Extract the RTP port from a `Transport` header value.
///
/// Accepts both a single port and an `rtp-rtcp` range; only the RTP port
/// is kept.
///
/// ```
/// use rtsp::protocol::request::parse_client_port;
///
/// assert_eq!(parse_client_port("RTP/UDP;client_port=25000").unwrap(), Some(25000));
/// assert_eq!(parse_client_port("RTP/AVP;unicast;client_port=8000-8001").unwrap(), Some(8000));
/// assert_eq!(parse_client_port("RTP/UDP").unwrap(), None);
/// assert!(parse_client_port("RTP/UDP;client_port=abc").is_err());
/// ```
pub fn parse_client_port(value: &str) -> Result<Option<u16>> {
    for part in value.split(';') {
        if let Some(ports) = part.trim().strip_prefix("client_port=") {
            let rtp = ports.split('-').next().unwrap_or(ports).trim();
            if rtp.is_empty() || !rtp.bytes().all(|b| b.is_ascii_digit()) {
                return Err(RtspError::parse(ParseErrorKind::InvalidPort));
            }
            let port = rtp
                .parse()
                .map_err(|_| RtspError::parse(ParseErrorKind::InvalidPort))?;
            return Ok(Some(port));
        }
    }
    Ok(None)
}
