//! Media framing and frame sources.
//!
//! This module provides the wire codecs for the data path and the traits
//! through which encoded frames enter the server.
//!
//! ## Data path overview
//!
//! Each encoded frame becomes one [`rtp::RtpPacket`]: a 12-byte fixed header
//! followed by the whole frame. The packet is then split into UDP datagrams,
//! each prefixed with a one-byte count of the fragments still to come:
//!
//! ```text
//! datagram 0: [2][RTP header | frame bytes ...]
//! datagram 1: [1][... frame bytes ...]
//! datagram 2: [0][... frame bytes]          <- last fragment of the frame
//! ```
//!
//! The receiver concatenates fragments until the count reaches zero, which is
//! the only end-of-frame signal; payload bytes are never scanned for markers.
//!
//! Receiver feedback travels back in fixed-size [`rtcp::RtcpReport`]s.

pub mod rtcp;
pub mod rtp;
pub mod source;

use crate::error::Result;

pub use source::{MemorySource, MjpegDirectory, MjpegFileSource};

/// Producer of encoded frames, one per call.
///
/// Returning `Ok(None)` signals end of stream; the sender then moves the
/// session to Finished.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>>;

    /// Release the underlying media. Called once by the sender when it stops.
    fn close(&mut self) {}
}

/// Opens the [`FrameSource`] for the resource path named in SETUP.
pub trait FrameSourceFactory: Send + Sync {
    fn open(&self, path: &str) -> Result<Box<dyn FrameSource>>;
}

impl<F> FrameSourceFactory for F
where
    F: Fn(&str) -> Result<Box<dyn FrameSource>> + Send + Sync,
{
    fn open(&self, path: &str) -> Result<Box<dyn FrameSource>> {
        self(path)
    }
}

/// Re-encodes a frame at reduced quality when the link is congested.
///
/// `quality` is a percentage in `1..=100`; see
/// [`CongestionLevel::quality`](crate::congestion::CongestionLevel::quality).
pub trait Transcoder: Send + Sync {
    fn reencode(&self, frame: &[u8], quality: u8) -> Result<Vec<u8>>;
}

/// Transcoder that forwards frames unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Transcoder for Passthrough {
    fn reencode(&self, frame: &[u8], _quality: u8) -> Result<Vec<u8>> {
        Ok(frame.to_vec())
    }
}
