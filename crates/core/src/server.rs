use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use crate::congestion::Pacing;
use crate::error::Result;
use crate::media::rtp::PAYLOAD_TYPE_MJPEG;
use crate::media::{FrameSourceFactory, Passthrough, Transcoder};
use crate::protocol::MethodHandler;
use crate::session::{ServerSession, SessionState};
use crate::transport::Connection;

/// Poll interval of the non-blocking accept loop.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Server configuration shared by the control loop and every session worker.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address for the RTSP listener and the RTCP socket.
    pub bind_address: String,
    pub rtsp_port: u16,
    /// Well-known port the client sends receiver reports to.
    pub rtcp_port: u16,
    /// Id of the first session; later sessions append `-<n>`.
    pub session_id: String,
    /// Probability in `[0, 1]` that the sender drops a frame on purpose.
    pub loss_probability: f64,
    pub fps: u32,
    /// Maximum number of frames per session, `None` to stream until the
    /// source is exhausted.
    pub video_length: Option<u32>,
    /// Largest RTP datagram including the fragment prefix byte.
    pub max_datagram: usize,
    pub rtcp_period: Duration,
    pub congestion_period: Duration,
    /// Sleep slice for idle workers; also bounds teardown latency.
    pub idle_poll: Duration,
    pub payload_type: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            rtsp_port: 5540,
            rtcp_port: 19001,
            session_id: "123456".to_string(),
            loss_probability: 0.0,
            fps: 24,
            video_length: Some(500),
            max_datagram: 4096,
            rtcp_period: Duration::from_millis(400),
            congestion_period: Duration::from_millis(400),
            idle_poll: Duration::from_millis(20),
            payload_type: PAYLOAD_TYPE_MJPEG,
        }
    }
}

/// Stops [`Server::serve`] and [`Server::run`] from another thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// RTSP server serving one session at a time.
///
/// Owns the listener and the media factory. Each call to
/// [`serve`](Self::serve) accepts exactly one TCP connection and runs its
/// control loop on the calling thread.
pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    factory: Arc<dyn FrameSourceFactory>,
    transcoder: Arc<dyn Transcoder>,
    running: Arc<AtomicBool>,
    sessions: AtomicU32,
}

impl Server {
    /// Bind the RTSP listener.
    pub fn bind(config: ServerConfig, factory: impl FrameSourceFactory + 'static) -> Result<Self> {
        let listener = TcpListener::bind((config.bind_address.as_str(), config.rtsp_port))?;
        listener.set_nonblocking(true)?;

        tracing::info!(addr = %listener.local_addr()?, rtcp_port = config.rtcp_port, "RTSP server listening");

        Ok(Self {
            listener,
            config: Arc::new(config),
            factory: Arc::new(factory),
            transcoder: Arc::new(Passthrough),
            running: Arc::new(AtomicBool::new(true)),
            sessions: AtomicU32::new(0),
        })
    }

    /// Replace the default pass-through transcoder.
    pub fn with_transcoder(mut self, transcoder: impl Transcoder + 'static) -> Self {
        self.transcoder = Arc::new(transcoder);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.running.clone())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Create the next session. The handle can be observed from other
    /// threads while [`serve`](Self::serve) runs it.
    pub fn new_session(&self) -> Arc<ServerSession> {
        let n = self.sessions.fetch_add(1, Ordering::SeqCst);
        let id = match n {
            0 => self.config.session_id.clone(),
            n => format!("{}-{}", self.config.session_id, n),
        };
        ServerSession::new(&id, Pacing::from_fps(self.config.fps))
    }

    /// Accept one connection and run `session` until TEARDOWN, connection
    /// failure or shutdown. Returns the final session state.
    pub fn serve(&self, session: Arc<ServerSession>) -> Result<SessionState> {
        tracing::info!(session_id = %session.id, "waiting for connection");

        while self.is_running() {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    stream.set_nonblocking(false)?;
                    let handler = MethodHandler::new(
                        session.clone(),
                        peer_addr,
                        self.factory.clone(),
                        self.transcoder.clone(),
                        self.config.clone(),
                    );
                    Connection::new(stream, handler)?.handle(&self.running);
                    return Ok(session.state());
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "TCP accept error");
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }

        Ok(session.state())
    }

    /// Serve sessions back to back until shut down.
    pub fn run(&self) -> Result<()> {
        while self.is_running() {
            let session = self.new_session();
            match self.serve(session.clone()) {
                Ok(state) => tracing::info!(session_id = %session.id, ?state, frames_sent = session.frames_sent(), "session ended"),
                Err(e) => tracing::warn!(session_id = %session.id, error = %e, "session failed"),
            }
        }
        tracing::info!("server stopped");
        Ok(())
    }
}
