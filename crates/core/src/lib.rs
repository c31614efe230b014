//! Simplified RTSP/RTP/RTCP video streaming.
//!
//! A [`Server`] streams encoded frames to a single [`Client`] over UDP while
//! an RTSP channel on TCP drives the session through SETUP, PLAY, PAUSE and
//! TEARDOWN. The client reports loss over RTCP and the server stretches its
//! frame pacing (and optionally lowers quality) in response.

pub mod client;
pub mod congestion;
pub mod error;
pub mod media;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use client::{Client, ClientConfig};
pub use congestion::CongestionLevel;
pub use error::{ParseErrorKind, Result, RtspError};
pub use media::{FrameSource, FrameSourceFactory, Transcoder};
pub use server::{Server, ServerConfig, ShutdownHandle};
pub use session::{ServerSession, SessionState, StatsSnapshot};
