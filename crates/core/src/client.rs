//! RTSP client with RTP reception and RTCP feedback.
//!
//! The [`Client`] drives the session lifecycle over TCP and runs two
//! workers:
//!
//! - **RTP receiver** (from SETUP): reassembles frames into the playback
//!   buffer and keeps the reception statistics.
//! - **RTCP sender** (from the first PLAY): reports loss since the previous
//!   report to the server's RTCP port.
//!
//! Both workers stop on TEARDOWN or when the client is dropped.

use std::collections::VecDeque;
use std::io::Write;
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Result, RtspError};
use crate::media::rtp::{self, Reassembler, RtpPacket};
use crate::protocol::{Method, MessageReader, RtspRequest, RtspResponse};
use crate::session::{
    LossReporter, LossTracker, ReceptionStats, SessionState, SharedState, StatsSnapshot, Transition,
    sleep_while,
};

/// Receive buffer for RTP datagrams; any UDP payload fits.
const RTP_BUFFER_SIZE: usize = 65_536;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Resource path requested in SETUP.
    pub resource: String,
    pub server_host: String,
    pub rtsp_port: u16,
    /// Local RTP port; 0 picks an ephemeral port and announces that one.
    pub rtp_port: u16,
    pub rtp_bind_ip: String,
    /// Server port receiver reports are sent to.
    pub rtcp_port: u16,
    pub rtcp_period: Duration,
    pub rtp_poll: Duration,
    /// Read timeout on the RTSP socket.
    pub rtsp_poll: Duration,
    /// How long a lifecycle call waits for its response. A reply that
    /// arrives later is discarded by the next call.
    pub response_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            resource: String::new(),
            server_host: "127.0.0.1".to_string(),
            rtsp_port: 5540,
            rtp_port: 0,
            rtp_bind_ip: "0.0.0.0".to_string(),
            rtcp_port: 19001,
            rtcp_period: Duration::from_millis(400),
            rtp_poll: Duration::from_millis(20),
            rtsp_poll: Duration::from_millis(100),
            response_timeout: Duration::from_secs(5),
        }
    }
}

struct ControlChannel {
    reader: MessageReader<TcpStream>,
    writer: TcpStream,
    server_addr: SocketAddr,
}

/// State shared with the worker threads.
struct Shared {
    state: SharedState,
    stats: ReceptionStats,
    frames: Mutex<VecDeque<RtpPacket>>,
}

pub struct Client {
    config: ClientConfig,
    channel: Option<ControlChannel>,
    next_cseq: u32,
    session_id: Option<String>,
    rtp_port: Option<u16>,
    shared: Arc<Shared>,
    rtcp_started: bool,
    workers: Vec<JoinHandle<()>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            channel: None,
            next_cseq: 0,
            session_id: None,
            rtp_port: None,
            shared: Arc::new(Shared {
                state: SharedState::default(),
                stats: ReceptionStats::default(),
                frames: Mutex::new(VecDeque::new()),
            }),
            rtcp_started: false,
            workers: Vec::new(),
        }
    }

    /// Open the RTSP connection.
    pub fn connect(&mut self) -> Result<()> {
        let stream = TcpStream::connect((self.config.server_host.as_str(), self.config.rtsp_port))?;
        stream.set_read_timeout(Some(self.config.rtsp_poll))?;
        let server_addr = stream.peer_addr()?;

        tracing::info!(%server_addr, "connected to RTSP server");

        self.channel = Some(ControlChannel {
            reader: MessageReader::new(stream.try_clone()?),
            writer: stream,
            server_addr,
        });
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Bind the RTP socket, send SETUP and start the RTP receiver.
    pub fn setup(&mut self) -> Result<()> {
        self.check_transition(Method::Setup)?;
        if self.channel.is_none() {
            return Err(RtspError::NotConnected);
        }

        let socket = UdpSocket::bind((self.config.rtp_bind_ip.as_str(), self.config.rtp_port))?;
        socket.set_read_timeout(Some(self.config.rtp_poll))?;
        let rtp_port = socket.local_addr()?.port();

        let request = RtspRequest::setup(&self.config.resource, self.next_cseq, rtp_port);
        let response = self.exchange(request)?;

        self.session_id = Some(response.session_id);
        self.rtp_port = Some(rtp_port);
        self.shared.state.set(SessionState::Paused);

        let shared = self.shared.clone();
        let poll = self.config.rtp_poll;
        let worker = thread::Builder::new()
            .name("rtp-receiver".into())
            .spawn(move || run_rtp_receiver(socket, shared, poll))?;
        self.workers.push(worker);

        tracing::info!(session_id = ?self.session_id, rtp_port, "session set up");
        Ok(())
    }

    /// Send PLAY; the first one also starts the RTCP sender.
    pub fn play(&mut self) -> Result<()> {
        self.lifecycle_request(Method::Play)?;

        if !self.rtcp_started {
            let server_addr = self
                .channel
                .as_ref()
                .map(|c| c.server_addr)
                .ok_or(RtspError::NotConnected)?;
            let target = SocketAddr::new(server_addr.ip(), self.config.rtcp_port);
            let socket = UdpSocket::bind((self.config.rtp_bind_ip.as_str(), 0))?;

            let shared = self.shared.clone();
            let period = self.config.rtcp_period;
            let poll = self.config.rtp_poll;
            let worker = thread::Builder::new()
                .name("rtcp-sender".into())
                .spawn(move || run_rtcp_sender(socket, target, shared, period, poll))?;
            self.workers.push(worker);
            self.rtcp_started = true;
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.lifecycle_request(Method::Pause)
    }

    /// Send TEARDOWN, stop the workers and close the connection. Local
    /// resources are released even when the exchange fails.
    pub fn teardown(&mut self) -> Result<()> {
        self.check_transition(Method::Teardown)?;
        let result = self.lifecycle_request(Method::Teardown);
        self.stop();
        result
    }

    /// Next reassembled frame in arrival order.
    pub fn pop_next_frame(&self) -> Option<RtpPacket> {
        self.shared.frames.lock().pop_front()
    }

    /// Frames waiting in the playback buffer.
    pub fn buffered_frames(&self) -> usize {
        self.shared.frames.lock().len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.get()
    }

    /// Local RTP port announced in SETUP.
    pub fn rtp_port(&self) -> Option<u16> {
        self.rtp_port
    }

    fn check_transition(&self, method: Method) -> Result<Transition> {
        let state = self.shared.state.get();
        match state.on_request(method) {
            Transition::Rejected => Err(RtspError::InvalidState { method, state }),
            transition => Ok(transition),
        }
    }

    /// PLAY, PAUSE or TEARDOWN for the established session.
    fn lifecycle_request(&mut self, method: Method) -> Result<()> {
        let transition = self.check_transition(method)?;
        let session_id = self.session_id.clone().unwrap_or_default();

        let request = RtspRequest::with_session(method, &self.config.resource, self.next_cseq, &session_id);
        self.exchange(request)?;

        if let Transition::To(next) = transition {
            self.shared.state.set(next);
        }
        Ok(())
    }

    /// Send one request and wait for its response. The CSeq advances even
    /// when the exchange fails.
    ///
    /// Replies to earlier requests that timed out arrive with a lower CSeq
    /// and are discarded here.
    fn exchange(&mut self, request: RtspRequest) -> Result<RtspResponse> {
        let timeout = self.config.response_timeout;
        let channel = self.channel.as_mut().ok_or(RtspError::NotConnected)?;
        self.next_cseq += 1;

        tracing::debug!(method = %request.method, cseq = request.cseq, "sending request");
        channel.writer.write_all(request.serialize().as_bytes())?;

        let deadline = Instant::now() + timeout;
        let response = loop {
            let raw = channel
                .reader
                .read_message(|| Instant::now() < deadline)?
                .ok_or(RtspError::ConnectionClosed)?;
            let response = RtspResponse::parse(&raw)?;
            if response.cseq < request.cseq {
                tracing::debug!(cseq = response.cseq, expected = request.cseq, "discarding late response");
                continue;
            }
            break response;
        };

        tracing::debug!(status = response.status_code, cseq = response.cseq, "received response");

        if response.cseq != request.cseq {
            return Err(RtspError::SequenceMismatch {
                expected: request.cseq,
                actual: response.cseq,
            });
        }
        if !response.is_success() {
            return Err(RtspError::Status {
                code: response.status_code,
                reason: response.status_text,
            });
        }
        Ok(response)
    }

    fn stop(&mut self) {
        self.shared.state.set(SessionState::Teardown);
        self.channel = None;
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("client worker panicked");
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Client RTP receiver loop: reassemble frames while playing and publish
/// statistics after every wake-up.
fn run_rtp_receiver(socket: UdpSocket, shared: Arc<Shared>, poll: Duration) {
    let mut buf = vec![0u8; RTP_BUFFER_SIZE];
    let mut reassembler = Reassembler::new();
    let mut tracker = LossTracker::new();
    let mut last_tick: Option<Instant> = None;

    loop {
        match shared.state.get() {
            SessionState::Teardown => break,
            SessionState::Playing => {}
            _ => {
                last_tick = None;
                thread::sleep(poll);
                continue;
            }
        }

        let now = Instant::now();
        if let Some(previous) = last_tick {
            tracker.add_play_time(now - previous);
        }
        last_tick = Some(now);

        match socket.recv_from(&mut buf) {
            Ok((len, _)) => match reassembler.push(&buf[..len]) {
                Some(Ok(packet)) => {
                    tracing::trace!(seq = packet.sequence_number, bytes = packet.payload.len(), "frame received");
                    tracker.record(packet.sequence_number, packet.payload.len());
                    shared.frames.lock().push_back(packet);
                }
                Some(Err(e)) => tracing::debug!(error = %e, "dropping malformed RTP frame"),
                None => {}
            },
            Err(e) if crate::error::is_timeout(&e) => {}
            Err(e) => {
                tracing::warn!(error = %e, "RTP receive error");
                thread::sleep(poll);
            }
        }

        shared.stats.publish(&tracker.snapshot());
    }

    tracing::debug!(frames = tracker.snapshot().frames_received, "RTP receiver exited");
}

/// Client RTCP sender loop: one receiver report per period while playing.
fn run_rtcp_sender(
    socket: UdpSocket,
    target: SocketAddr,
    shared: Arc<Shared>,
    period: Duration,
    poll: Duration,
) {
    let ssrc = rtp::random_ssrc();
    let mut reporter = LossReporter::new();

    while sleep_while(|| !shared.state.is_torn_down(), period, poll) {
        if !shared.state.is_playing() {
            continue;
        }

        let report = reporter.next_report(&shared.stats.snapshot(), ssrc);
        match socket.send_to(&report.serialize(), target) {
            Ok(_) => tracing::trace!(
                fraction_lost = report.fraction_lost,
                cumulative_lost = report.cumulative_lost,
                highest_seq = report.highest_sequence,
                "RTCP report sent"
            ),
            Err(e) => tracing::warn!(%target, error = %e, "failed to send RTCP report"),
        }
    }

    tracing::debug!("RTCP sender exited");
}
