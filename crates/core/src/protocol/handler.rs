use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::congestion;
use crate::error::Result;
use crate::media::{FrameSourceFactory, Transcoder};
use crate::protocol::Method;
use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::server::ServerConfig;
use crate::session::{ServerSession, SessionState, Transition};
use crate::transport::udp::{self, RtpSender};

/// Applies RTSP requests to the session of a single TCP connection.
///
/// Owns the session's UDP resources and worker threads: the RTP sender is
/// started by SETUP, the RTCP receiver and congestion controller by the
/// first PLAY. [`shutdown`](Self::shutdown) joins them all.
pub struct MethodHandler {
    session: Arc<ServerSession>,
    factory: Arc<dyn FrameSourceFactory>,
    transcoder: Arc<dyn Transcoder>,
    config: Arc<ServerConfig>,
    client_addr: SocketAddr,
    last_cseq: Option<u32>,
    /// Bound at SETUP, handed to the RTCP receiver at the first PLAY.
    rtcp_socket: Option<UdpSocket>,
    workers: Vec<JoinHandle<()>>,
}

impl MethodHandler {
    pub fn new(
        session: Arc<ServerSession>,
        client_addr: SocketAddr,
        factory: Arc<dyn FrameSourceFactory>,
        transcoder: Arc<dyn Transcoder>,
        config: Arc<ServerConfig>,
    ) -> Self {
        MethodHandler {
            session,
            factory,
            transcoder,
            config,
            client_addr,
            last_cseq: None,
            rtcp_socket: None,
            workers: Vec::new(),
        }
    }

    pub fn session(&self) -> &Arc<ServerSession> {
        &self.session
    }

    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq;
        let session_id = self.session.id.clone();

        if let Some(last) = self.last_cseq
            && cseq <= last
        {
            tracing::warn!(cseq, last_cseq = last, method = %request.method, "CSeq did not increase");
            return RtspResponse::bad_request(cseq, &session_id);
        }
        self.last_cseq = Some(cseq);

        if request.method != Method::Setup && request.session_id.as_deref() != Some(session_id.as_str()) {
            tracing::warn!(
                cseq,
                method = %request.method,
                session = ?request.session_id,
                "request for unknown session"
            );
            return RtspResponse::session_not_found(cseq, &session_id);
        }

        let state = self.session.state();
        match state.on_request(request.method) {
            Transition::Rejected => {
                tracing::warn!(cseq, method = %request.method, ?state, "method not valid in this state");
                RtspResponse::invalid_state(cseq, &session_id)
            }
            Transition::NoOp => {
                tracing::debug!(cseq, method = %request.method, ?state, "already in requested state");
                RtspResponse::ok(cseq, &session_id)
            }
            Transition::To(next) => match request.method {
                Method::Setup => self.handle_setup(request),
                Method::Play => self.handle_play(cseq),
                Method::Pause => self.apply(cseq, state, next),
                Method::Teardown => {
                    self.session.state.set(SessionState::Teardown);
                    tracing::info!(session_id = %session_id, "session terminated via TEARDOWN");
                    RtspResponse::ok(cseq, &session_id)
                }
            },
        }
    }

    /// Move `from -> to`, or reply 455 if a worker changed the state first.
    fn apply(&self, cseq: u32, from: SessionState, to: SessionState) -> RtspResponse {
        if self.session.state.transition(from, to) {
            tracing::info!(session_id = %self.session.id, state = ?to, "session state changed");
            RtspResponse::ok(cseq, &self.session.id)
        } else {
            tracing::warn!(cseq, expected = ?from, actual = ?self.session.state(), "state changed concurrently");
            RtspResponse::invalid_state(cseq, &self.session.id)
        }
    }

    fn handle_setup(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq;
        let session_id = self.session.id.clone();

        let Some(client_rtp_port) = request.client_rtp_port else {
            tracing::warn!(cseq, "SETUP missing client_port");
            return RtspResponse::bad_request(cseq, &session_id);
        };

        let source = match self.factory.open(&request.path) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(cseq, path = %request.path, error = %e, "SETUP for unavailable resource");
                return RtspResponse::not_found(cseq, &session_id);
            }
        };

        let client_rtp = SocketAddr::new(self.client_addr.ip(), client_rtp_port);
        let sockets = RtpSender::bind(client_rtp, self.config.max_datagram)
            .and_then(|rtp| Ok((rtp, self.bind_rtcp()?)));
        let (rtp, rtcp) = match sockets {
            Ok(sockets) => sockets,
            Err(e) => {
                tracing::error!(cseq, error = %e, "failed to allocate session sockets");
                return RtspResponse::internal_error(cseq, &session_id);
            }
        };

        let server_rtp_port = rtp.local_addr().map(|a| a.port()).unwrap_or_default();
        let server_rtcp_port = rtcp.local_addr().map(|a| a.port()).unwrap_or_default();

        let sender = {
            let session = self.session.clone();
            let transcoder = self.transcoder.clone();
            let config = self.config.clone();
            thread::Builder::new()
                .name("rtp-sender".into())
                .spawn(move || udp::run_sender(session, source, rtp, transcoder, config))
        };
        match sender {
            Ok(handle) => self.workers.push(handle),
            Err(e) => {
                tracing::error!(cseq, error = %e, "failed to start RTP sender");
                return RtspResponse::internal_error(cseq, &session_id);
            }
        }

        self.rtcp_socket = Some(rtcp);
        self.session.state.set(SessionState::Paused);

        tracing::info!(
            session_id = %session_id,
            path = %request.path,
            %client_rtp,
            server_rtp_port,
            server_rtcp_port,
            "session created via SETUP"
        );

        RtspResponse::ok(cseq, &session_id)
    }

    fn handle_play(&mut self, cseq: u32) -> RtspResponse {
        if let Some(socket) = self.rtcp_socket.take()
            && let Err(e) = self.start_feedback(socket)
        {
            tracing::error!(cseq, error = %e, "failed to start RTCP feedback threads");
            return RtspResponse::internal_error(cseq, &self.session.id);
        }
        self.apply(cseq, SessionState::Paused, SessionState::Playing)
    }

    fn bind_rtcp(&self) -> Result<UdpSocket> {
        let socket = UdpSocket::bind((self.config.bind_address.as_str(), self.config.rtcp_port))?;
        socket.set_read_timeout(Some(self.config.idle_poll))?;
        Ok(socket)
    }

    /// Start the RTCP receiver and congestion controller; once per session.
    fn start_feedback(&mut self, socket: UdpSocket) -> Result<()> {
        let poll = self.config.idle_poll;

        let receiver = {
            let session = self.session.clone();
            let period = self.config.rtcp_period;
            thread::Builder::new()
                .name("rtcp-receiver".into())
                .spawn(move || congestion::run_rtcp_receiver(session, socket, period, poll))?
        };
        self.workers.push(receiver);

        let controller = {
            let session = self.session.clone();
            let period = self.config.congestion_period;
            thread::Builder::new()
                .name("congestion-controller".into())
                .spawn(move || congestion::run_controller(session, period, poll))?
        };
        self.workers.push(controller);

        Ok(())
    }

    /// Move the session to Teardown and join every worker, releasing the UDP
    /// sockets and the frame source. Idempotent.
    pub fn shutdown(&mut self) {
        self.session.state.set(SessionState::Teardown);
        self.rtcp_socket = None;

        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("worker").to_string();
            if worker.join().is_err() {
                tracing::error!(session_id = %self.session.id, thread = %name, "worker panicked");
            }
        }
    }
}

impl Drop for MethodHandler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
