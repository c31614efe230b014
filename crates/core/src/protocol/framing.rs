//! Message framing on the RTSP control stream.
//!
//! Messages carry no blank-line terminator, so a message is complete once
//! [`MESSAGE_LINES`] non-empty lines have arrived. An empty line after at least
//! one line also completes it, which lets hand-typed or foreign requests with
//! fewer headers through to the parser.
//!
//! The underlying socket is expected to have a short read timeout. Partial
//! lines survive across timeouts, so a request split over several TCP
//! segments is reassembled transparently.

use std::io::{BufRead, BufReader, Read};

use crate::error::{self, ParseErrorKind, Result, RtspError};

/// Lines in every request and response.
pub const MESSAGE_LINES: usize = 3;

/// Longest accepted line, in bytes.
pub const MAX_LINE_LEN: usize = 4096;

/// Line-oriented reader producing one complete RTSP message at a time.
pub struct MessageReader<R> {
    reader: BufReader<R>,
    partial: Vec<u8>,
    lines: Vec<String>,
}

impl<R: Read> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            partial: Vec::new(),
            lines: Vec::with_capacity(MESSAGE_LINES),
        }
    }

    /// Block until a complete message is available.
    ///
    /// Read timeouts are retried as long as `keep_waiting` returns `true`;
    /// otherwise the timeout error is returned and any buffered partial
    /// message is kept for the next call. Returns `Ok(None)` on end of stream.
    pub fn read_message(&mut self, mut keep_waiting: impl FnMut() -> bool) -> Result<Option<String>> {
        loop {
            let limit = (MAX_LINE_LEN + 1).saturating_sub(self.partial.len()) as u64;
            match (&mut self.reader).take(limit).read_until(b'\n', &mut self.partial) {
                Ok(0) => {
                    if !self.partial.is_empty() || !self.lines.is_empty() {
                        tracing::debug!(
                            buffered_lines = self.lines.len(),
                            "stream ended inside a message"
                        );
                    }
                    return Ok(None);
                }
                Ok(_) => {
                    if !self.partial.ends_with(b"\n") {
                        if self.partial.len() > MAX_LINE_LEN {
                            self.partial.clear();
                            self.lines.clear();
                            return Err(RtspError::parse(ParseErrorKind::InvalidHeader));
                        }
                        continue;
                    }
                    if let Some(message) = self.complete_line() {
                        return Ok(Some(message));
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) if error::is_timeout(&e) => {
                    if !keep_waiting() {
                        return Err(e.into());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Move the finished line out of `partial`; returns a message when complete.
    fn complete_line(&mut self) -> Option<String> {
        let line = String::from_utf8_lossy(&self.partial)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        self.partial.clear();

        if line.is_empty() {
            if self.lines.is_empty() {
                return None;
            }
            return Some(self.take_message());
        }

        self.lines.push(line);
        if self.lines.len() == MESSAGE_LINES {
            return Some(self.take_message());
        }
        None
    }

    fn take_message(&mut self) -> String {
        let mut message = self.lines.join("\r\n");
        message.push_str("\r\n");
        self.lines.clear();
        message
    }

    pub fn get_ref(&self) -> &R {
        self.reader.get_ref()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;

    use super::*;

    /// Reader that replays chunks, turning empty entries into read timeouts.
    struct Scripted {
        chunks: VecDeque<&'static str>,
    }

    impl Scripted {
        fn new(chunks: &[&'static str]) -> Self {
            Self {
                chunks: chunks.iter().copied().collect(),
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some("") => Err(io::Error::from(io::ErrorKind::WouldBlock)),
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk.as_bytes()[..n]);
                    if n < chunk.len() {
                        self.chunks.push_front(&chunk[n..]);
                    }
                    Ok(n)
                }
                None => Ok(0),
            }
        }
    }

    #[test]
    fn splits_back_to_back_messages() {
        let mut reader = MessageReader::new(Scripted::new(&[
            "PLAY rtsp://a RTSP/1.0\r\nCSeq: 1\r\nSession: s\r\nPAUSE rtsp://a RTSP/1.0\r\nCSeq: 2\r\nSession: s\r\n",
        ]));
        let first = reader.read_message(|| true).unwrap().unwrap();
        assert!(first.starts_with("PLAY"));
        let second = reader.read_message(|| true).unwrap().unwrap();
        assert!(second.starts_with("PAUSE"));
        assert!(reader.read_message(|| true).unwrap().is_none());
    }

    #[test]
    fn partial_lines_survive_timeouts() {
        let mut reader = MessageReader::new(Scripted::new(&[
            "PLAY rtsp://a RT",
            "",
            "SP/1.0\r\nCSe",
            "",
            "",
            "q: 1\r\nSession: s\r\n",
        ]));
        let message = reader.read_message(|| true).unwrap().unwrap();
        assert_eq!(message, "PLAY rtsp://a RTSP/1.0\r\nCSeq: 1\r\nSession: s\r\n");
    }

    #[test]
    fn blank_line_terminates_short_message() {
        let mut reader = MessageReader::new(Scripted::new(&[
            "\r\nPLAY rtsp://a RTSP/1.0\r\nCSeq: 1\r\n\r\n",
        ]));
        let message = reader.read_message(|| true).unwrap().unwrap();
        assert_eq!(message, "PLAY rtsp://a RTSP/1.0\r\nCSeq: 1\r\n");
    }

    #[test]
    fn cancelled_wait_returns_timeout_and_keeps_buffer() {
        let mut reader = MessageReader::new(Scripted::new(&[
            "PLAY rtsp://a RTSP/1.0\r\n",
            "",
            "CSeq: 1\r\nSession: s\r\n",
        ]));
        let err = reader.read_message(|| false).unwrap_err();
        assert!(err.is_timeout());
        let message = reader.read_message(|| false).unwrap().unwrap();
        assert!(message.contains("CSeq: 1"));
    }

    #[test]
    fn overlong_line_is_rejected() {
        let long = vec![b'A'; MAX_LINE_LEN + 10];
        let mut reader = MessageReader::new(io::Cursor::new(long));
        assert!(matches!(
            reader.read_message(|| true),
            Err(RtspError::Parse { .. })
        ));
    }
}
