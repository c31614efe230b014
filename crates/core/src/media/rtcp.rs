use crate::error::{ParseErrorKind, Result, RtspError};

/// Header size: flags, packet type, length, SSRC.
pub const HEADER_LEN: usize = 8;
/// One report block.
pub const BODY_LEN: usize = 24;
/// Every receiver report has the same size.
pub const PACKET_LEN: usize = HEADER_LEN + BODY_LEN;

/// Receive buffer for the server RTCP socket.
pub const RTCP_BUFFER_SIZE: usize = 512;

/// RTCP packet type for a receiver report (RFC 3550 §6.4.2).
pub const PT_RECEIVER_REPORT: u8 = 201;

/// Receiver report with a single report block.
///
/// ```text
///         0                   1                   2                   3
///         0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// header |V=2|P|  RC=1   |    PT=201     |         length=0x0020         |
///        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///        |                              SSRC                             |
///        +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// body   |                   fraction lost (f32, BE)                     |
///        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///        |                       cumulative lost                         |
///        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///        |                   highest sequence received                   |
///        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///        |                      reserved (12 bytes)                      |
///        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The length field carries the total packet size in bytes, not the RFC's
/// 32-bit-words-minus-one; peers of this stack expect that.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RtcpReport {
    pub ssrc: u32,
    /// Loss ratio since the previous report, in `[0, 1]`.
    pub fraction_lost: f32,
    pub cumulative_lost: u32,
    pub highest_sequence: u32,
}

impl RtcpReport {
    pub fn serialize(&self) -> [u8; PACKET_LEN] {
        let mut packet = [0u8; PACKET_LEN];
        // V=2, P=0, RC=1
        packet[0] = (2 << 6) | 1;
        packet[1] = PT_RECEIVER_REPORT;
        packet[2..4].copy_from_slice(&(PACKET_LEN as u16).to_be_bytes());
        packet[4..8].copy_from_slice(&self.ssrc.to_be_bytes());
        packet[8..12].copy_from_slice(&self.fraction_lost.to_be_bytes());
        packet[12..16].copy_from_slice(&self.cumulative_lost.to_be_bytes());
        packet[16..20].copy_from_slice(&self.highest_sequence.to_be_bytes());
        packet
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < PACKET_LEN {
            return Err(RtspError::parse(ParseErrorKind::Truncated));
        }
        if data[0] >> 6 != 2 {
            return Err(RtspError::parse(ParseErrorKind::BadVersion));
        }
        if data[1] != PT_RECEIVER_REPORT {
            return Err(RtspError::parse(ParseErrorKind::BadPacketType));
        }

        let word = |at: usize| [data[at], data[at + 1], data[at + 2], data[at + 3]];
        let fraction_lost = f32::from_be_bytes(word(8));
        if !(0.0..=1.0).contains(&fraction_lost) {
            return Err(RtspError::parse(ParseErrorKind::InvalidFractionLost));
        }

        Ok(Self {
            ssrc: u32::from_be_bytes(word(4)),
            fraction_lost,
            cumulative_lost: u32::from_be_bytes(word(12)),
            highest_sequence: u32::from_be_bytes(word(16)),
        })
    }
}
