//! Streaming session state.
//!
//! A session lives from SETUP to TEARDOWN and is bound to one client. It
//! tracks:
//!
//! - The session id issued in the SETUP response (immutable afterwards).
//! - The playback state, shared by the control, sender, RTCP and congestion
//!   threads through a single atomic.
//! - The congestion level reported by the client and the pacing derived
//!   from it.
//!
//! ## Session lifecycle
//!
//! ```text
//! SETUP     Init    -> Paused
//! PLAY      Paused  -> Playing        (no-op when Playing)
//! PAUSE     Playing -> Paused         (no-op when Paused)
//! <eof>     Playing -> Finished       (sender, source exhausted)
//! TEARDOWN  any     -> Teardown       (terminal)
//! ```
//!
//! ## Writers
//!
//! Every shared field has exactly one writer thread:
//!
//! | Field | Writer | Readers |
//! |-------|--------|---------|
//! | state | control loop (sender only for Playing -> Finished) | all |
//! | congestion level | RTCP receiver | congestion controller |
//! | send delay | congestion controller | sender |
//! | frames sent | sender | control loop, callers |

pub mod stats;

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::congestion::{CongestionLevel, Pacing};
use crate::protocol::Method;

pub use stats::{LossReporter, LossTracker, ReceptionStats, StatsSnapshot};

/// Session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    /// Connection accepted, SETUP not yet processed.
    Init = 0,
    /// Sockets allocated, delivery suspended.
    Paused = 1,
    /// Frames are being delivered.
    Playing = 2,
    /// The frame source is exhausted.
    Finished = 3,
    /// Session released (terminal).
    Teardown = 4,
}

/// Outcome of applying a request to a [`SessionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move to the given state.
    To(SessionState),
    /// Request accepted, state unchanged (repeated PLAY or PAUSE).
    NoOp,
    /// Request not valid in the current state.
    Rejected,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Init,
            1 => Self::Paused,
            2 => Self::Playing,
            3 => Self::Finished,
            _ => Self::Teardown,
        }
    }

    /// Apply a request method to this state.
    pub fn on_request(self, method: Method) -> Transition {
        use SessionState::*;

        match (method, self) {
            (_, Teardown) => Transition::Rejected,
            (Method::Teardown, _) => Transition::To(Teardown),
            (Method::Setup, Init) => Transition::To(Paused),
            (Method::Play, Paused) => Transition::To(Playing),
            (Method::Play, Playing) => Transition::NoOp,
            (Method::Pause, Playing) => Transition::To(Paused),
            (Method::Pause, Paused) => Transition::NoOp,
            _ => Transition::Rejected,
        }
    }
}

/// Atomic cell holding a [`SessionState`].
#[derive(Debug)]
pub struct SharedState(AtomicU8);

impl SharedState {
    pub fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: SessionState) {
        let old = SessionState::from_u8(self.0.swap(state as u8, Ordering::AcqRel));
        if old != state {
            tracing::debug!(old_state = ?old, new_state = ?state, "state transition");
        }
    }

    /// Move `from -> to` only if the state is still `from`.
    pub fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let swapped = self
            .0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if swapped {
            tracing::debug!(old_state = ?from, new_state = ?to, "state transition");
        }
        swapped
    }

    /// Move `Playing -> Finished`. Returns `false` if the control loop changed
    /// the state first.
    pub fn finish(&self) -> bool {
        self.transition(SessionState::Playing, SessionState::Finished)
    }

    pub fn is_playing(&self) -> bool {
        self.get() == SessionState::Playing
    }

    pub fn is_torn_down(&self) -> bool {
        self.get() == SessionState::Teardown
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(SessionState::Init)
    }
}

/// Sleep for `duration` in slices of at most `poll`, returning early once
/// `active` turns false. Returns whether the full duration elapsed.
pub fn sleep_while(mut active: impl FnMut() -> bool, duration: Duration, poll: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if !active() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(poll));
    }
}

/// Server-side state shared by every thread of one session.
///
/// Created before the RTSP connection is accepted so callers can observe the
/// session from other threads; destroyed with the last handle after TEARDOWN.
#[derive(Debug)]
pub struct ServerSession {
    /// Identifier returned in every `Session` header.
    pub id: String,
    pub state: SharedState,
    congestion: AtomicU8,
    pub pacing: Pacing,
    frames_sent: AtomicU32,
}

impl ServerSession {
    pub fn new(id: &str, pacing: Pacing) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            state: SharedState::default(),
            congestion: AtomicU8::new(0),
            pacing,
            frames_sent: AtomicU32::new(0),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn congestion_level(&self) -> CongestionLevel {
        CongestionLevel::new(self.congestion.load(Ordering::Acquire))
    }

    pub(crate) fn set_congestion_level(&self, level: CongestionLevel) {
        let old = self.congestion.swap(level.get(), Ordering::AcqRel);
        if old != level.get() {
            tracing::debug!(session_id = %self.id, old_level = old, new_level = level.get(), "congestion level changed");
        }
    }

    /// Frames handed to the RTP socket so far (dropped frames excluded).
    pub fn frames_sent(&self) -> u32 {
        self.frames_sent.load(Ordering::Acquire)
    }

    pub(crate) fn record_frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::AcqRel);
    }
}
