use rand::Rng;

use crate::error::{ParseErrorKind, Result, RtspError};

/// Size of the RTP fixed header.
pub const HEADER_LEN: usize = 12;

/// Static payload type for Motion JPEG (RFC 3551).
pub const PAYLOAD_TYPE_MJPEG: u8 = 26;

/// Upper bound on fragments per frame; the prefix byte counts `0..=255`.
pub const MAX_FRAGMENTS: usize = 256;

/// One encoded frame with its RTP fixed header (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The sequence number is the 0-based frame index and the timestamp is
/// `index * frame_period_ms`. Padding, extension and CSRC count are always 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// RTP payload type (7-bit).
    pub payload_type: u8,
    pub marker: bool,
    pub sequence_number: u16,
    pub timestamp: u32,
    /// Synchronization source identifier.
    pub ssrc: u32,
    pub payload: Vec<u8>,
}

impl RtpPacket {
    pub fn new(payload_type: u8, sequence_number: u16, timestamp: u32, payload: Vec<u8>) -> Self {
        Self {
            payload_type: payload_type & 0x7f,
            marker: false,
            sequence_number,
            timestamp,
            ssrc: 0,
            payload,
        }
    }

    pub fn with_ssrc(mut self, ssrc: u32) -> Self {
        self.ssrc = ssrc;
        self
    }

    /// Serialize the 12-byte fixed header.
    pub fn header(&self) -> [u8; HEADER_LEN] {
        let first_byte: u8 = 2 << 6;
        let second_byte: u8 = ((self.marker as u8) << 7) | self.payload_type;

        let mut header = [0u8; HEADER_LEN];
        header[0] = first_byte;
        header[1] = second_byte;
        header[2..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        header
    }

    /// Header followed by the payload.
    pub fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(HEADER_LEN + self.payload.len());
        packet.extend_from_slice(&self.header());
        packet.extend_from_slice(&self.payload);
        packet
    }

    /// Parse a reassembled frame.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(RtspError::parse(ParseErrorKind::Truncated));
        }
        if data[0] >> 6 != 2 {
            return Err(RtspError::parse(ParseErrorKind::BadVersion));
        }
        if data[0] & 0x1f != 0 {
            return Err(RtspError::parse(ParseErrorKind::UnsupportedHeader));
        }

        Ok(Self {
            payload_type: data[1] & 0x7f,
            marker: data[1] & 0x80 != 0,
            sequence_number: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            payload: data[HEADER_LEN..].to_vec(),
        })
    }
}

/// Pick a random SSRC (RFC 3550 §8.1).
pub fn random_ssrc() -> u32 {
    rand::rng().random::<u32>()
}

/// Split a serialized packet into datagrams of at most `max_datagram` bytes.
///
/// Each datagram is the remaining-fragment count followed by up to
/// `max_datagram - 1` packet bytes; the count is 0 on the last fragment.
pub fn fragment(packet: &[u8], max_datagram: usize) -> Result<Vec<Vec<u8>>> {
    let chunk_size = max_datagram.saturating_sub(1).max(1);
    let count = packet.len().div_ceil(chunk_size).max(1);
    if count > MAX_FRAGMENTS {
        return Err(RtspError::FrameTooLarge {
            size: packet.len(),
            max: chunk_size * MAX_FRAGMENTS,
        });
    }

    if packet.is_empty() {
        return Ok(vec![vec![0]]);
    }

    let fragments = packet
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, chunk)| {
            let mut datagram = Vec::with_capacity(1 + chunk.len());
            datagram.push((count - 1 - i) as u8);
            datagram.extend_from_slice(chunk);
            datagram
        })
        .collect();
    Ok(fragments)
}

/// Rebuilds frames from fragment datagrams.
///
/// A fragment whose count does not continue the frame in progress means
/// something was lost: the partial frame is discarded and the fragment
/// starts a new one.
///
/// The count alone cannot always tell frames apart. If the last fragment of
/// a frame is lost and the next frame's first datagram carries exactly the
/// missing count, both are merged into one frame under the first frame's
/// header. The merged payload is corrupt and the second frame shows up as a
/// sequence gap.
#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: Vec<u8>,
    remaining: Option<u8>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one datagram. Returns the parsed packet once its last fragment
    /// arrives. Empty datagrams are ignored.
    pub fn push(&mut self, datagram: &[u8]) -> Option<Result<RtpPacket>> {
        let (&count, chunk) = datagram.split_first()?;

        if let Some(previous) = self.remaining
            && count.checked_add(1) != Some(previous)
        {
            tracing::trace!(
                expected = previous - 1,
                got = count,
                dropped_bytes = self.buffer.len(),
                "fragment gap, discarding partial frame"
            );
            self.buffer.clear();
        }

        self.buffer.extend_from_slice(chunk);

        if count == 0 {
            self.remaining = None;
            let frame = std::mem::take(&mut self.buffer);
            return Some(RtpPacket::parse(&frame));
        }

        self.remaining = Some(count);
        None
    }

    /// Whether a frame is partially buffered.
    pub fn in_progress(&self) -> bool {
        self.remaining.is_some()
    }
}
