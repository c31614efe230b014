use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use rand::Rng;

use crate::error::Result;
use crate::media::rtp::{self, RtpPacket};
use crate::media::{FrameSource, Transcoder};
use crate::server::ServerConfig;
use crate::session::{ServerSession, SessionState, sleep_while};

/// UDP socket delivering one session's RTP stream.
///
/// Binds an ephemeral socket (`0.0.0.0:0`) and sends every frame to the
/// client RTP address announced in SETUP.
#[derive(Debug)]
pub struct RtpSender {
    socket: UdpSocket,
    target: SocketAddr,
    max_datagram: usize,
}

impl RtpSender {
    pub fn bind(target: SocketAddr, max_datagram: usize) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self {
            socket,
            target,
            max_datagram,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Fragment and send one packet. Returns the number of datagrams sent; a
    /// failed send abandons the rest of the frame.
    pub fn send_frame(&self, packet: &RtpPacket) -> Result<usize> {
        let fragments = rtp::fragment(&packet.serialize(), self.max_datagram)?;
        for datagram in &fragments {
            self.socket.send_to(datagram, self.target)?;
        }
        Ok(fragments.len())
    }
}

/// Server RTP sender loop.
///
/// Idles while the session is not playing. Each iteration pulls one frame,
/// optionally drops it (simulated loss) or re-encodes it at the quality of
/// the current congestion level, sends it and sleeps the current send delay.
/// Source exhaustion or reaching the configured video length moves the
/// session to Finished and ends the loop. Returns on Finished or Teardown
/// after closing the source; the RTP socket is dropped with `sender`.
pub fn run_sender(
    session: Arc<ServerSession>,
    mut source: Box<dyn FrameSource>,
    sender: RtpSender,
    transcoder: Arc<dyn Transcoder>,
    config: Arc<ServerConfig>,
) {
    let ssrc = rtp::random_ssrc();
    let frame_period_ms = session.pacing.frame_period_ms();
    let mut index: u32 = 0;

    tracing::info!(session_id = %session.id, target = %sender.target(), ssrc, "RTP sender started");

    loop {
        match session.state() {
            SessionState::Teardown => break,
            SessionState::Playing => {}
            _ => {
                std::thread::sleep(config.idle_poll);
                continue;
            }
        }

        if config.video_length.is_some_and(|length| index >= length) {
            if session.state.finish() {
                tracing::info!(session_id = %session.id, frames = index, "reached video length");
                break;
            }
            continue;
        }

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                if session.state.finish() {
                    tracing::info!(session_id = %session.id, frames = index, "end of stream");
                    break;
                }
                continue;
            }
            Err(e) => {
                tracing::error!(session_id = %session.id, error = %e, "frame source failed");
                if session.state.finish() {
                    break;
                }
                continue;
            }
        };

        let seq = index;
        index += 1;

        if config.loss_probability > 0.0 && rand::rng().random::<f64>() < config.loss_probability {
            tracing::debug!(session_id = %session.id, seq, "dropping frame (simulated loss)");
        } else {
            let level = session.congestion_level();
            let payload = match level.quality() {
                Some(quality) => transcoder.reencode(&frame, quality).unwrap_or_else(|e| {
                    tracing::warn!(seq, quality, error = %e, "re-encode failed, sending original");
                    frame
                }),
                None => frame,
            };

            let mut packet = RtpPacket::new(
                config.payload_type,
                seq as u16,
                seq.wrapping_mul(frame_period_ms),
                payload,
            )
            .with_ssrc(ssrc);
            packet.marker = true;

            match sender.send_frame(&packet) {
                Ok(datagrams) => {
                    session.record_frame_sent();
                    tracing::trace!(seq, datagrams, bytes = packet.payload.len(), "frame sent");
                }
                Err(e) => tracing::warn!(session_id = %session.id, seq, error = %e, "failed to send frame"),
            }
        }

        sleep_while(|| session.state.is_playing(), session.pacing.send_delay(), config.idle_poll);
    }

    source.close();
    tracing::debug!(session_id = %session.id, frames_sent = session.frames_sent(), "RTP sender exited");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::congestion::Pacing;
    use crate::media::rtp::Reassembler;
    use crate::media::{MemorySource, Passthrough};

    fn receiver() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        socket
    }

    fn receive_frames(socket: &UdpSocket, count: usize) -> Vec<RtpPacket> {
        let mut buf = [0u8; 65_536];
        let mut reassembler = Reassembler::new();
        let mut frames = Vec::new();
        while frames.len() < count {
            let (len, _) = socket.recv_from(&mut buf).unwrap();
            if let Some(packet) = reassembler.push(&buf[..len]) {
                frames.push(packet.unwrap());
            }
        }
        frames
    }

    #[test]
    fn send_frame_fragments_large_payload() {
        let socket = receiver();
        let sender = RtpSender::bind(socket.local_addr().unwrap(), 512).unwrap();
        let packet = RtpPacket::new(26, 3, 123, vec![7u8; 2000]);

        assert_eq!(sender.send_frame(&packet).unwrap(), 4);
        assert_eq!(receive_frames(&socket, 1), vec![packet]);
    }

    #[test]
    fn sender_streams_then_finishes() {
        let socket = receiver();
        let session = ServerSession::new("s", Pacing::new(Duration::from_millis(2)));
        let config = Arc::new(ServerConfig {
            idle_poll: Duration::from_millis(5),
            ..ServerConfig::default()
        });
        let source = Box::new(MemorySource::new((0..5u8).map(|i| vec![i; 100])));
        let sender = RtpSender::bind(socket.local_addr().unwrap(), 4096).unwrap();

        session.state.set(SessionState::Playing);
        let worker = {
            let session = session.clone();
            std::thread::spawn(move || run_sender(session, source, sender, Arc::new(Passthrough), config))
        };

        let frames = receive_frames(&socket, 5);
        let sequences: Vec<u16> = frames.iter().map(|p| p.sequence_number).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        assert_eq!(frames[3].timestamp, 3 * 2);
        assert_eq!(frames[4].payload, vec![4u8; 100]);

        worker.join().unwrap();
        assert_eq!(session.state(), SessionState::Finished);
        assert_eq!(session.frames_sent(), 5);
    }

    struct TrackedSource {
        inner: MemorySource,
        closed: Arc<AtomicBool>,
    }

    impl FrameSource for TrackedSource {
        fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
            self.inner.next_frame()
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn finished_sender_exits_and_closes_source() {
        let socket = receiver();
        let session = ServerSession::new("s", Pacing::new(Duration::from_millis(1)));
        let config = Arc::new(ServerConfig {
            idle_poll: Duration::from_millis(5),
            ..ServerConfig::default()
        });
        let closed = Arc::new(AtomicBool::new(false));
        let source = Box::new(TrackedSource {
            inner: MemorySource::new((0..2u8).map(|i| vec![i])),
            closed: closed.clone(),
        });
        let sender = RtpSender::bind(socket.local_addr().unwrap(), 4096).unwrap();

        session.state.set(SessionState::Playing);
        let worker = {
            let session = session.clone();
            std::thread::spawn(move || run_sender(session, source, sender, Arc::new(Passthrough), config))
        };

        assert_eq!(receive_frames(&socket, 2).len(), 2);
        worker.join().unwrap();
        assert_eq!(session.state(), SessionState::Finished);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn video_length_caps_stream() {
        let socket = receiver();
        let session = ServerSession::new("s", Pacing::new(Duration::from_millis(1)));
        let config = Arc::new(ServerConfig {
            video_length: Some(2),
            idle_poll: Duration::from_millis(5),
            ..ServerConfig::default()
        });
        let source = Box::new(MemorySource::new((0..5u8).map(|i| vec![i])));
        let sender = RtpSender::bind(socket.local_addr().unwrap(), 4096).unwrap();

        session.state.set(SessionState::Playing);
        let worker = {
            let session = session.clone();
            std::thread::spawn(move || run_sender(session, source, sender, Arc::new(Passthrough), config))
        };

        assert_eq!(receive_frames(&socket, 2).len(), 2);
        worker.join().unwrap();
        assert_eq!(session.state(), SessionState::Finished);
        assert_eq!(session.frames_sent(), 2);
    }

    #[test]
    fn full_loss_sends_nothing() {
        let socket = receiver();
        let session = ServerSession::new("s", Pacing::new(Duration::from_millis(1)));
        let config = Arc::new(ServerConfig {
            loss_probability: 1.0,
            idle_poll: Duration::from_millis(5),
            ..ServerConfig::default()
        });
        let source = Box::new(MemorySource::new((0..3u8).map(|i| vec![i])));
        let sender = RtpSender::bind(socket.local_addr().unwrap(), 4096).unwrap();

        session.state.set(SessionState::Playing);
        let worker = {
            let session = session.clone();
            std::thread::spawn(move || run_sender(session, source, sender, Arc::new(Passthrough), config))
        };

        worker.join().unwrap();
        assert_eq!(session.state(), SessionState::Finished);
        assert_eq!(session.frames_sent(), 0);
    }
}
