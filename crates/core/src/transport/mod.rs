//! Network transport for RTSP signaling and RTP media delivery.
//!
//! The stack uses a split transport model:
//!
//! - **TCP** ([`tcp`]): carries RTSP requests and responses. One connection
//!   per session, served on the caller's thread.
//!
//! - **UDP** ([`udp`]): carries RTP fragments from a per-session ephemeral
//!   socket to the client port announced in SETUP.

pub mod tcp;
pub mod udp;

pub use tcp::Connection;
pub use udp::RtpSender;
