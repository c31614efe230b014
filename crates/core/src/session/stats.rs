//! Client-side reception statistics.
//!
//! Two loss views exist and each consumer reads exactly one:
//!
//! - **Session-cumulative** ([`LossTracker`], published through
//!   [`ReceptionStats`]): `fraction_lost = cumulative_lost / highest_sequence`
//!   since PLAY. This is what the display layer shows.
//! - **Since last report** ([`LossReporter`]): deltas between two RTCP
//!   reports. Its fraction is the `fraction_lost` field on the wire and drives
//!   the server's congestion level.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::media::rtcp::RtcpReport;

/// Loss accounting owned by the RTP receiver thread.
///
/// A sequence number above the expected one counts the gap as lost and
/// resynchronizes; late or duplicate frames leave the counters untouched so
/// `cumulative_lost` never decreases.
///
/// Wire sequence numbers are 16 bits. Each one is extended to 32 bits
/// relative to the highest extended number seen (RFC 3550 §A.1), so counting
/// continues across the wrap at 65535.
#[derive(Debug, Clone, Default)]
pub struct LossTracker {
    expected: u32,
    highest: u32,
    cumulative_lost: u32,
    total_bytes: u64,
    frames: u64,
    play_time: Duration,
}

impl LossTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one reassembled frame.
    pub fn record(&mut self, sequence: u16, payload_len: usize) {
        let sequence = self.extend(sequence);
        self.highest = self.highest.max(sequence);
        if sequence > self.expected {
            self.cumulative_lost += sequence - self.expected;
            self.expected = sequence + 1;
        } else if sequence == self.expected {
            self.expected += 1;
        }
        self.total_bytes += payload_len as u64;
        self.frames += 1;
    }

    /// Nearest 32-bit sequence to `highest` whose low 16 bits are `sequence`.
    fn extend(&self, sequence: u16) -> u32 {
        let delta = sequence.wrapping_sub(self.highest as u16) as i16;
        self.highest
            .checked_add_signed(i32::from(delta))
            .unwrap_or(u32::from(sequence))
    }

    /// Add wall-clock time spent in the Playing state.
    pub fn add_play_time(&mut self, elapsed: Duration) {
        self.play_time += elapsed;
    }

    pub fn fraction_lost(&self) -> f32 {
        if self.highest == 0 {
            return 0.0;
        }
        self.cumulative_lost as f32 / self.highest as f32
    }

    /// Payload bytes per second of play time.
    pub fn data_rate(&self) -> f64 {
        let secs = self.play_time.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / secs
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            data_rate: self.data_rate(),
            total_bytes: self.total_bytes,
            total_play_time_ms: self.play_time.as_millis() as u64,
            fraction_lost: self.fraction_lost(),
            cumulative_lost: self.cumulative_lost,
            expected_sequence: self.expected,
            highest_sequence: self.highest,
            frames_received: self.frames,
        }
    }
}

/// Point-in-time copy of the reception statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    /// Payload bytes per second of play time.
    pub data_rate: f64,
    pub total_bytes: u64,
    pub total_play_time_ms: u64,
    /// Session-cumulative loss ratio.
    pub fraction_lost: f32,
    pub cumulative_lost: u32,
    /// Next sequence number the receiver expects.
    pub expected_sequence: u32,
    pub highest_sequence: u32,
    pub frames_received: u64,
}

/// Statistics shared between the RTP receiver (sole writer), the RTCP
/// sender and the display layer.
///
/// Stores use `Release` and loads `Acquire`, so everything the receiver
/// published before a report is visible to the RTCP sender when it reads.
#[derive(Debug, Default)]
pub struct ReceptionStats {
    data_rate: AtomicU64,
    total_bytes: AtomicU64,
    total_play_time_ms: AtomicU64,
    fraction_lost: AtomicU32,
    cumulative_lost: AtomicU32,
    expected_sequence: AtomicU32,
    highest_sequence: AtomicU32,
    frames_received: AtomicU64,
}

impl ReceptionStats {
    pub fn publish(&self, snapshot: &StatsSnapshot) {
        self.data_rate
            .store(snapshot.data_rate.to_bits(), Ordering::Release);
        self.total_bytes
            .store(snapshot.total_bytes, Ordering::Release);
        self.total_play_time_ms
            .store(snapshot.total_play_time_ms, Ordering::Release);
        self.fraction_lost
            .store(snapshot.fraction_lost.to_bits(), Ordering::Release);
        self.cumulative_lost
            .store(snapshot.cumulative_lost, Ordering::Release);
        self.expected_sequence
            .store(snapshot.expected_sequence, Ordering::Release);
        self.highest_sequence
            .store(snapshot.highest_sequence, Ordering::Release);
        self.frames_received
            .store(snapshot.frames_received, Ordering::Release);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            data_rate: f64::from_bits(self.data_rate.load(Ordering::Acquire)),
            total_bytes: self.total_bytes.load(Ordering::Acquire),
            total_play_time_ms: self.total_play_time_ms.load(Ordering::Acquire),
            fraction_lost: f32::from_bits(self.fraction_lost.load(Ordering::Acquire)),
            cumulative_lost: self.cumulative_lost.load(Ordering::Acquire),
            expected_sequence: self.expected_sequence.load(Ordering::Acquire),
            highest_sequence: self.highest_sequence.load(Ordering::Acquire),
            frames_received: self.frames_received.load(Ordering::Acquire),
        }
    }
}

/// Since-last-report loss deltas for RTCP receiver reports.
#[derive(Debug, Clone, Default)]
pub struct LossReporter {
    last_highest: u32,
    last_cumulative: u32,
}

impl LossReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the next report and move the baselines to `stats`.
    pub fn next_report(&mut self, stats: &StatsSnapshot, ssrc: u32) -> RtcpReport {
        let expected = stats.highest_sequence.saturating_sub(self.last_highest);
        let lost = stats.cumulative_lost.saturating_sub(self.last_cumulative);
        let fraction_lost = if expected == 0 {
            0.0
        } else {
            (lost as f32 / expected as f32).min(1.0)
        };

        self.last_highest = stats.highest_sequence;
        self.last_cumulative = stats.cumulative_lost;

        RtcpReport {
            ssrc,
            fraction_lost,
            cumulative_lost: stats.cumulative_lost,
            highest_sequence: stats.highest_sequence,
        }
    }
}
