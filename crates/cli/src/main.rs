use std::io;
use std::path::PathBuf;
use std::thread;

use clap::Parser;
use rtsp::media::MjpegDirectory;
use rtsp::{Server, ServerConfig};

#[derive(Parser)]
#[command(
    name = "rtsp-server",
    about = "RTSP server streaming MJPEG files over RTP with RTCP congestion control"
)]
struct Args {
    /// Bind address for the RTSP listener and RTCP socket
    #[arg(long, short, default_value = "0.0.0.0")]
    bind: String,

    /// RTSP port
    #[arg(long, short, default_value_t = 5540)]
    port: u16,

    /// Port receiving RTCP reports from the client
    #[arg(long, default_value_t = 19001)]
    rtcp_port: u16,

    /// Session id issued to the first client
    #[arg(long, default_value = "123456")]
    session_id: String,

    /// Directory the SETUP resource paths are resolved against
    #[arg(long, short, default_value = ".")]
    media_root: PathBuf,

    /// Probability of dropping each frame (0.0 - 1.0)
    #[arg(long, default_value_t = 0.0)]
    loss: f64,

    /// Nominal frame rate
    #[arg(long, default_value_t = 24)]
    fps: u32,

    /// Frames per session before finishing, 0 to stream the whole file
    #[arg(long, default_value_t = 500)]
    video_length: u32,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if !(0.0..=1.0).contains(&args.loss) {
        eprintln!("--loss must be between 0 and 1, got {}", args.loss);
        std::process::exit(2);
    }

    let config = ServerConfig {
        bind_address: args.bind,
        rtsp_port: args.port,
        rtcp_port: args.rtcp_port,
        session_id: args.session_id,
        loss_probability: args.loss,
        fps: args.fps,
        video_length: (args.video_length > 0).then_some(args.video_length),
        ..ServerConfig::default()
    };

    let server = match Server::bind(config, MjpegDirectory::new(&args.media_root)) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Failed to start server: {}", e);
            std::process::exit(1);
        }
    };
    let shutdown = server.shutdown_handle();

    let addr = server
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".into());
    println!(
        "RTSP server on {} serving {} (press Enter to stop)",
        addr,
        args.media_root.display()
    );

    let worker = thread::spawn(move || server.run());

    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        eprintln!("Failed to read stdin: {}", e);
    }

    tracing::info!("stopping server");
    shutdown.shutdown();
    match worker.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => eprintln!("Server error: {}", e),
        Err(_) => eprintln!("Server thread panicked"),
    }
}
