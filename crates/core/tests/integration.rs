//! Integration tests: full sessions over loopback sockets.
//!
//! Each test starts a server on its own fixed RTSP and RTCP ports and drives
//! it either with the library client or with raw RTSP text.

use std::io::Write;
use std::net::{TcpStream, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rtsp::media::MemorySource;
use rtsp::protocol::{MessageReader, RtspResponse};
use rtsp::{
    Client, ClientConfig, FrameSource, Server, ServerConfig, ServerSession, SessionState,
};

const RESOURCE: &str = "movie.mjpeg";

fn frames(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let mut frame = vec![0xFF, 0xD8];
            frame.extend(std::iter::repeat_n(i as u8, 600 + i));
            frame.extend([0xFF, 0xD9]);
            frame
        })
        .collect()
}

fn server_config(rtsp_port: u16, rtcp_port: u16) -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1".into(),
        rtsp_port,
        rtcp_port,
        fps: 100,
        idle_poll: Duration::from_millis(5),
        rtcp_period: Duration::from_millis(50),
        congestion_period: Duration::from_millis(50),
        ..ServerConfig::default()
    }
}

fn start_server(
    config: ServerConfig,
    media: Vec<Vec<u8>>,
) -> (Arc<ServerSession>, JoinHandle<rtsp::Result<SessionState>>) {
    let factory = move |path: &str| -> rtsp::Result<Box<dyn FrameSource>> {
        assert_eq!(path, RESOURCE);
        Ok(Box::new(MemorySource::new(media.clone())))
    };
    let server = Server::bind(config, factory).expect("bind server");
    let session = server.new_session();
    let serving = session.clone();
    let handle = thread::spawn(move || server.serve(serving));
    (session, handle)
}

fn client(rtsp_port: u16, rtcp_port: u16) -> Client {
    let mut client = Client::new(ClientConfig {
        resource: RESOURCE.into(),
        rtsp_port,
        rtcp_port,
        rtp_bind_ip: "127.0.0.1".into(),
        rtcp_period: Duration::from_millis(50),
        rtp_poll: Duration::from_millis(5),
        response_timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    });
    client.connect().expect("connect to server");
    client
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// The session's fixed RTCP port can be bound again once its socket is closed.
fn assert_rtcp_port_released(rtcp_port: u16) {
    if let Err(e) = UdpSocket::bind(("127.0.0.1", rtcp_port)) {
        panic!("RTCP port {rtcp_port} still in use after TEARDOWN: {e}");
    }
}

struct RawRtsp {
    writer: TcpStream,
    reader: MessageReader<TcpStream>,
}

impl RawRtsp {
    fn connect(rtsp_port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", rtsp_port)).expect("connect to server");
        stream
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        RawRtsp {
            reader: MessageReader::new(stream.try_clone().unwrap()),
            writer: stream,
        }
    }

    fn exchange(&mut self, request: &str) -> RtspResponse {
        self.writer.write_all(request.as_bytes()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        let raw = self
            .reader
            .read_message(|| Instant::now() < deadline)
            .unwrap()
            .expect("response before close");
        RtspResponse::parse(&raw).unwrap()
    }
}

#[test]
fn ten_frames_delivered_in_order() {
    let media = frames(10);
    let (session, server) = start_server(server_config(18554, 19101), media.clone());

    let mut client = client(18554, 19101);
    client.setup().unwrap();
    assert_eq!(client.session_id(), Some("123456"));
    client.play().unwrap();

    let mut received = Vec::new();
    assert!(wait_until(Duration::from_secs(5), || {
        while let Some(frame) = client.pop_next_frame() {
            received.push(frame);
        }
        received.len() == 10
    }));

    let sequences: Vec<u16> = received.iter().map(|p| p.sequence_number).collect();
    assert_eq!(sequences, (0..10).collect::<Vec<u16>>());
    for (packet, frame) in received.iter().zip(&media) {
        assert_eq!(&packet.payload, frame);
        assert_eq!(packet.payload_type, 26);
        assert_eq!(packet.timestamp, u32::from(packet.sequence_number) * 10);
    }

    assert!(wait_until(Duration::from_secs(2), || session.state() == SessionState::Finished));
    assert_eq!(session.frames_sent(), 10);

    let stats = client.stats();
    assert_eq!(stats.frames_received, 10);
    assert_eq!(stats.cumulative_lost, 0);
    assert_eq!(stats.highest_sequence, 9);
    assert_eq!(stats.fraction_lost, 0.0);

    client.teardown().unwrap();
    assert_eq!(client.state(), SessionState::Teardown);
    assert_eq!(server.join().unwrap().unwrap(), SessionState::Teardown);
    assert_rtcp_port_released(19101);
}

#[test]
fn teardown_while_playing_stops_sender() {
    let (session, server) = start_server(server_config(18555, 19102), frames(1000));

    let mut client = client(18555, 19102);
    client.setup().unwrap();
    client.play().unwrap();
    assert!(wait_until(Duration::from_secs(5), || session.frames_sent() >= 3));

    client.teardown().unwrap();
    assert_eq!(server.join().unwrap().unwrap(), SessionState::Teardown);
    assert_rtcp_port_released(19102);

    let sent = session.frames_sent();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(session.frames_sent(), sent);
    assert!(sent < 1000);
}

#[test]
fn pause_suspends_delivery() {
    let (session, server) = start_server(server_config(18556, 19103), frames(1000));

    let mut client = client(18556, 19103);
    client.setup().unwrap();
    client.play().unwrap();
    assert!(wait_until(Duration::from_secs(5), || session.frames_sent() >= 3));

    client.pause().unwrap();
    assert_eq!(session.state(), SessionState::Paused);
    thread::sleep(Duration::from_millis(50));
    let sent = session.frames_sent();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(session.frames_sent(), sent);

    client.play().unwrap();
    assert!(wait_until(Duration::from_secs(5), || session.frames_sent() > sent));

    client.teardown().unwrap();
    server.join().unwrap().unwrap();
}

#[test]
fn play_in_init_is_rejected_without_transition() {
    let (session, server) = start_server(server_config(18557, 19104), frames(5));
    let mut rtsp = RawRtsp::connect(18557);

    let response = rtsp.exchange("PLAY rtsp://movie.mjpeg RTSP/1.0\r\nCSeq: 0\r\nSession: 123456\r\n");
    assert_eq!(response.status_code, 455);
    assert_eq!(response.cseq, 0);
    assert_eq!(session.state(), SessionState::Init);

    let response = rtsp.exchange("TEARDOWN rtsp://movie.mjpeg RTSP/1.0\r\nCSeq: 1\r\nSession: 123456\r\n");
    assert!(response.is_success());
    assert_eq!(server.join().unwrap().unwrap(), SessionState::Teardown);
}

#[test]
fn wrong_session_id_is_rejected() {
    let (session, server) = start_server(server_config(18558, 19105), frames(5));
    let rtp = UdpSocket::bind("127.0.0.1:0").unwrap();
    let rtp_port = rtp.local_addr().unwrap().port();
    let mut rtsp = RawRtsp::connect(18558);

    let setup = format!(
        "SETUP rtsp://movie.mjpeg RTSP/1.0\r\nCSeq: 0\r\nTransport: RTP/UDP;client_port={rtp_port}\r\n"
    );
    let response = rtsp.exchange(&setup);
    assert!(response.is_success());
    assert_eq!(response.session_id, "123456");
    assert_eq!(session.state(), SessionState::Paused);

    let response = rtsp.exchange("PLAY rtsp://movie.mjpeg RTSP/1.0\r\nCSeq: 1\r\nSession: 999999\r\n");
    assert_eq!(response.status_code, 454);
    assert_eq!(session.state(), SessionState::Paused);

    let response = rtsp.exchange("TEARDOWN rtsp://movie.mjpeg RTSP/1.0\r\nCSeq: 2\r\nSession: 123456\r\n");
    assert!(response.is_success());
    assert_eq!(server.join().unwrap().unwrap(), SessionState::Teardown);
    assert_rtcp_port_released(19105);

    // The sender never played, so nothing reaches the announced RTP port.
    rtp.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
    let mut buf = [0u8; 64];
    assert!(rtp.recv_from(&mut buf).is_err());
}

#[test]
fn malformed_request_closes_connection() {
    let (session, server) = start_server(server_config(18559, 19106), frames(5));
    let mut rtsp = RawRtsp::connect(18559);

    rtsp.writer
        .write_all(b"DESCRIBE rtsp://movie.mjpeg RTSP/1.0\r\nCSeq: 0\r\n\r\n")
        .unwrap();

    assert_eq!(server.join().unwrap().unwrap(), SessionState::Teardown);
    assert_eq!(session.frames_sent(), 0);
}

#[test]
fn reported_loss_slows_the_sender() {
    let config = ServerConfig {
        loss_probability: 0.5,
        video_length: None,
        ..server_config(18560, 19107)
    };
    let (session, server) = start_server(config, frames(2000));

    let mut client = client(18560, 19107);
    client.setup().unwrap();
    client.play().unwrap();

    assert!(wait_until(Duration::from_secs(10), || session.congestion_level().get() > 0));
    assert!(wait_until(Duration::from_secs(5), || {
        session.pacing.send_delay() > session.pacing.frame_period()
    }));
    assert!(client.stats().cumulative_lost > 0);

    client.teardown().unwrap();
    server.join().unwrap().unwrap();
}
