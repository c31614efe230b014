use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use rtsp::{Client, ClientConfig, StatsSnapshot};

#[derive(Parser)]
#[command(
    name = "rtsp-client",
    about = "Headless RTSP client: plays a stream and reports reception statistics"
)]
struct Args {
    /// Resource path requested in SETUP
    resource: String,

    /// RTSP server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// RTSP server port
    #[arg(long, short, default_value_t = 5540)]
    port: u16,

    /// Local RTP port, 0 for an ephemeral one
    #[arg(long, default_value_t = 0)]
    rtp_port: u16,

    /// Server RTCP port
    #[arg(long, default_value_t = 19001)]
    rtcp_port: u16,

    /// Seconds to play before TEARDOWN
    #[arg(long, short, default_value_t = 10)]
    duration: u64,

    /// Write every received frame to this directory
    #[arg(long, short)]
    output: Option<PathBuf>,
}

fn print_stats(stats: &StatsSnapshot) {
    println!(
        "frames {:>5}  lost {:>4} ({:>5.1}%)  highest seq {:>5}  {:>8.1} kB/s",
        stats.frames_received,
        stats.cumulative_lost,
        stats.fraction_lost * 100.0,
        stats.highest_sequence,
        stats.data_rate / 1000.0
    );
}

fn play(client: &mut Client, args: &Args) -> rtsp::Result<()> {
    client.connect()?;
    client.setup()?;
    println!("session {}", client.session_id().unwrap_or("-"));
    client.play()?;

    if let Some(dir) = &args.output {
        std::fs::create_dir_all(dir)?;
        tracing::info!(dir = %dir.display(), "writing frames");
    }

    let end = Instant::now() + Duration::from_secs(args.duration);
    let mut next_report = Instant::now() + Duration::from_secs(1);
    while Instant::now() < end {
        while let Some(frame) = client.pop_next_frame() {
            if let Some(dir) = &args.output {
                let path = dir.join(format!("frame-{:05}.jpg", frame.sequence_number));
                std::fs::write(path, &frame.payload)?;
            }
        }
        if Instant::now() >= next_report {
            print_stats(&client.stats());
            next_report += Duration::from_secs(1);
        }
        thread::sleep(Duration::from_millis(20));
    }

    client.teardown()
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut client = Client::new(ClientConfig {
        resource: args.resource.clone(),
        server_host: args.host.clone(),
        rtsp_port: args.port,
        rtp_port: args.rtp_port,
        rtcp_port: args.rtcp_port,
        ..ClientConfig::default()
    });

    let result = play(&mut client, &args);
    print_stats(&client.stats());

    if let Err(e) = result {
        eprintln!("Playback failed: {}", e);
        std::process::exit(1);
    }
}
