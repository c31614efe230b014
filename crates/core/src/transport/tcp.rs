use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::Result;
use crate::protocol::{MessageReader, MethodHandler, RtspRequest};

/// Read timeout on the RTSP socket. Reads are retried on timeout, so this
/// only bounds how quickly the loop notices a server shutdown.
pub const RTSP_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// The single RTSP control connection of a session.
///
/// Requests are processed strictly one at a time. Malformed requests and
/// socket failures end the connection; the session is torn down on exit.
pub struct Connection {
    reader: MessageReader<TcpStream>,
    writer: TcpStream,
    handler: MethodHandler,
    peer_addr: SocketAddr,
}

impl Connection {
    pub fn new(stream: TcpStream, handler: MethodHandler) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        stream.set_read_timeout(Some(RTSP_READ_TIMEOUT))?;
        let reader_stream = stream.try_clone()?;

        Ok(Connection {
            reader: MessageReader::new(reader_stream),
            writer: stream,
            handler,
            peer_addr,
        })
    }

    /// Run the request loop, then tear the session down.
    pub fn handle(mut self, running: &AtomicBool) {
        tracing::info!(peer = %self.peer_addr, session_id = %self.handler.session().id, "client connected");

        let reason = self.run(running);
        self.handler.shutdown();

        tracing::info!(peer = %self.peer_addr, reason, "client disconnected");
    }

    /// RTSP request/response loop. Returns the reason for exiting.
    fn run(&mut self, running: &AtomicBool) -> &'static str {
        loop {
            let message = match self.reader.read_message(|| running.load(Ordering::SeqCst)) {
                Ok(Some(message)) => message,
                Ok(None) => return "connection closed by client",
                Err(e) if e.is_timeout() => return "server shutting down",
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "read error");
                    return "read error";
                }
            };

            let request = match RtspRequest::parse(&message) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, message, "parse error");
                    return "parse error";
                }
            };

            tracing::debug!(
                peer = %self.peer_addr,
                method = %request.method,
                path = %request.path,
                cseq = request.cseq,
                "request"
            );

            let response = self.handler.handle(&request);

            tracing::debug!(
                peer = %self.peer_addr,
                status = response.status_code,
                cseq = response.cseq,
                "response"
            );

            if let Err(e) = self.writer.write_all(response.serialize().as_bytes()) {
                tracing::warn!(peer = %self.peer_addr, error = %e, "write error");
                return "write error";
            }

            if self.handler.session().state.is_torn_down() {
                return "teardown";
            }
        }
    }
}
