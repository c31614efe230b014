//! RTCP feedback loop and congestion control.
//!
//! The client reports its loss ratio since the previous report every RTCP
//! period. The server classifies the ratio into a [`CongestionLevel`] and the
//! controller stretches the frame pacing accordingly:
//!
//! ```text
//! fraction lost   level   send delay
//! [0, 0.01]       0       period
//! (0.01, 0.25]    1       period * 1.1
//! (0.25, 0.5]     2       period * 1.2
//! (0.5, 0.75]     3       period * 1.3
//! otherwise       4       period * 1.4
//! ```
//!
//! The sender reads the current delay before every sleep, so a new value
//! takes effect on the next frame without any signaling.

use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error;
use crate::media::rtcp::{RTCP_BUFFER_SIZE, RtcpReport};
use crate::session::{ServerSession, SessionState, sleep_while};

/// Discrete classification of recent loss, `0..=4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CongestionLevel(u8);

impl CongestionLevel {
    pub const NONE: Self = Self(0);
    pub const MAX: Self = Self(4);

    /// Clamp `level` into `0..=4`.
    pub fn new(level: u8) -> Self {
        Self(level.min(Self::MAX.0))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Map a loss ratio onto a level.
    ///
    /// ```
    /// use rtsp::congestion::CongestionLevel;
    ///
    /// assert_eq!(CongestionLevel::from_fraction_lost(0.0).get(), 0);
    /// assert_eq!(CongestionLevel::from_fraction_lost(0.02).get(), 1);
    /// assert_eq!(CongestionLevel::from_fraction_lost(0.6).get(), 3);
    /// assert_eq!(CongestionLevel::from_fraction_lost(1.0).get(), 4);
    /// ```
    pub fn from_fraction_lost(fraction: f32) -> Self {
        let level = if (0.0..=0.01).contains(&fraction) {
            0
        } else if fraction > 0.01 && fraction <= 0.25 {
            1
        } else if fraction > 0.25 && fraction <= 0.5 {
            2
        } else if fraction > 0.5 && fraction <= 0.75 {
            3
        } else {
            4
        };
        Self(level)
    }

    /// Re-encode quality for this level, `None` when no reduction is needed.
    pub fn quality(self) -> Option<u8> {
        match self.0 {
            0 => None,
            level => Some(100 - 20 * level),
        }
    }
}

/// Frame pacing: the nominal frame period and the current send delay.
#[derive(Debug)]
pub struct Pacing {
    frame_period: Duration,
    send_delay_us: AtomicU64,
}

impl Pacing {
    pub fn new(frame_period: Duration) -> Self {
        Self {
            frame_period,
            send_delay_us: AtomicU64::new(frame_period.as_micros() as u64),
        }
    }

    /// Pacing for `fps` frames per second; the period is `1000 / fps` whole
    /// milliseconds (41 ms at 24 fps).
    pub fn from_fps(fps: u32) -> Self {
        Self::new(Duration::from_millis(1000 / u64::from(fps.max(1))))
    }

    pub fn frame_period(&self) -> Duration {
        self.frame_period
    }

    /// Frame period in whole milliseconds, the RTP timestamp unit.
    pub fn frame_period_ms(&self) -> u32 {
        self.frame_period.as_millis() as u32
    }

    /// Delay the sender waits after each frame.
    pub fn send_delay(&self) -> Duration {
        Duration::from_micros(self.send_delay_us.load(Ordering::Acquire))
    }

    /// `frame_period + level * frame_period * 0.1`.
    pub fn delay_for(&self, level: CongestionLevel) -> Duration {
        self.frame_period * (10 + u32::from(level.get())) / 10
    }

    fn set_send_delay(&self, delay: Duration) {
        self.send_delay_us
            .store(delay.as_micros() as u64, Ordering::Release);
    }
}

/// Retunes [`Pacing`] when the congestion level changes.
#[derive(Debug, Default)]
pub struct CongestionController {
    last_level: Option<CongestionLevel>,
}

impl CongestionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the send delay if `level` differs from the last check.
    /// Returns the new delay when it was changed.
    pub fn check(&mut self, level: CongestionLevel, pacing: &Pacing) -> Option<Duration> {
        if self.last_level == Some(level) {
            return None;
        }
        let delay = pacing.delay_for(level);
        pacing.set_send_delay(delay);
        self.last_level = Some(level);
        Some(delay)
    }
}

/// Server RTCP receiver loop.
///
/// While the session plays, receives one report per wake-up and stores the
/// derived congestion level. Malformed reports and socket errors are logged
/// and the loop continues. The socket's read timeout bounds how long a
/// TEARDOWN waits for this thread; the socket is closed when it returns.
pub fn run_rtcp_receiver(session: Arc<ServerSession>, socket: UdpSocket, period: Duration, poll: Duration) {
    let mut buf = [0u8; RTCP_BUFFER_SIZE];

    loop {
        match session.state() {
            SessionState::Teardown => break,
            SessionState::Playing => {}
            _ => {
                sleep_while(|| !session.state.is_torn_down(), period, poll);
                continue;
            }
        }

        match socket.recv_from(&mut buf) {
            Ok((len, from)) => match RtcpReport::parse(&buf[..len]) {
                Ok(report) => {
                    let level = CongestionLevel::from_fraction_lost(report.fraction_lost);
                    tracing::trace!(
                        %from,
                        fraction_lost = report.fraction_lost,
                        cumulative_lost = report.cumulative_lost,
                        highest_seq = report.highest_sequence,
                        level = level.get(),
                        "RTCP report"
                    );
                    session.set_congestion_level(level);
                }
                Err(e) => tracing::debug!(%from, len, error = %e, "dropping malformed RTCP packet"),
            },
            Err(e) if error::is_timeout(&e) => {}
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "RTCP receive error");
                sleep_while(|| !session.state.is_torn_down(), poll, poll);
            }
        }
    }

    tracing::debug!(session_id = %session.id, "RTCP receiver exited");
}

/// Congestion controller loop: every `period` while playing, apply a changed
/// congestion level to the session pacing.
pub fn run_controller(session: Arc<ServerSession>, period: Duration, poll: Duration) {
    let mut controller = CongestionController::new();

    while sleep_while(|| !session.state.is_torn_down(), period, poll) {
        if !session.state.is_playing() {
            continue;
        }
        let level = session.congestion_level();
        if let Some(delay) = controller.check(level, &session.pacing) {
            tracing::info!(
                session_id = %session.id,
                level = level.get(),
                send_delay_ms = delay.as_secs_f64() * 1000.0,
                "send delay changed"
            );
        }
    }

    tracing::debug!(session_id = %session.id, "congestion controller exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_thresholds() {
        let cases = [
            (0.0, 0),
            (0.01, 0),
            (0.02, 1),
            (0.25, 1),
            (0.26, 2),
            (0.5, 2),
            (0.6, 3),
            (0.75, 3),
            (0.76, 4),
            (1.0, 4),
        ];
        for (fraction, level) in cases {
            assert_eq!(
                CongestionLevel::from_fraction_lost(fraction).get(),
                level,
                "fraction {fraction}"
            );
        }
    }

    #[test]
    fn negative_fraction_is_worst_level() {
        assert_eq!(CongestionLevel::from_fraction_lost(-0.1), CongestionLevel::MAX);
    }

    #[test]
    fn level_is_clamped() {
        assert_eq!(CongestionLevel::new(9), CongestionLevel::MAX);
    }

    #[test]
    fn quality_steps_down_with_level() {
        assert_eq!(CongestionLevel::new(0).quality(), None);
        assert_eq!(CongestionLevel::new(1).quality(), Some(80));
        assert_eq!(CongestionLevel::new(4).quality(), Some(20));
    }

    #[test]
    fn frame_period_at_24_fps() {
        let pacing = Pacing::from_fps(24);
        assert_eq!(pacing.frame_period(), Duration::from_millis(41));
        assert_eq!(pacing.frame_period_ms(), 41);
        assert_eq!(pacing.send_delay(), Duration::from_millis(41));
    }

    #[test]
    fn send_delay_for_level_two() {
        let pacing = Pacing::from_fps(24);
        assert_eq!(
            pacing.delay_for(CongestionLevel::new(2)),
            Duration::from_micros(49_200)
        );
    }

    #[test]
    fn controller_only_retunes_on_change() {
        let pacing = Pacing::from_fps(24);
        let mut controller = CongestionController::new();

        assert_eq!(
            controller.check(CongestionLevel::NONE, &pacing),
            Some(Duration::from_millis(41))
        );
        assert_eq!(controller.check(CongestionLevel::NONE, &pacing), None);

        let level = CongestionLevel::new(2);
        assert_eq!(controller.check(level, &pacing), Some(Duration::from_micros(49_200)));
        assert_eq!(pacing.send_delay(), Duration::from_micros(49_200));
        assert_eq!(controller.check(level, &pacing), None);

        controller.check(CongestionLevel::NONE, &pacing);
        assert_eq!(pacing.send_delay(), Duration::from_millis(41));
    }

    #[test]
    fn rtcp_receiver_updates_level_and_exits_on_teardown() {
        let session = ServerSession::new("t", Pacing::from_fps(24));
        session.state.set(SessionState::Playing);

        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let addr = socket.local_addr().unwrap();

        let worker = {
            let session = session.clone();
            std::thread::spawn(move || {
                run_rtcp_receiver(session, socket, Duration::from_millis(50), Duration::from_millis(20))
            })
        };

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        let report = RtcpReport {
            ssrc: 0,
            fraction_lost: 0.6,
            cumulative_lost: 6,
            highest_sequence: 10,
        };
        client.send_to(&[0xFF; 8], addr).unwrap();
        client.send_to(&report.serialize(), addr).unwrap();

        let mut waited = Duration::ZERO;
        while session.congestion_level() != CongestionLevel::new(3) && waited < Duration::from_secs(2) {
            std::thread::sleep(Duration::from_millis(10));
            waited += Duration::from_millis(10);
        }
        assert_eq!(session.congestion_level(), CongestionLevel::new(3));

        session.state.set(SessionState::Teardown);
        worker.join().unwrap();
    }
}
