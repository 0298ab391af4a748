use clap::{ArgAction, Parser};
use playgen::config::{
    ClientIdentity, Protocol, RtspFlavor, RunConfig, StreamingType, load_session_records,
};
use playgen::orchestrator::Orchestrator;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

/// Generate concurrent HLS or RTSP playback sessions against a delivery server
#[derive(Parser, Debug)]
#[command(name = "playgen", version, about)]
struct Cli {
    /// Session list: `content source_addr [service_code content_type bitrate_class [interface]]`
    #[arg(long, env = "PLAYGEN_SESSIONS_FILE")]
    sessions_file: PathBuf,

    /// Lookup / redirect server address (`host:port`)
    #[arg(long, env = "PLAYGEN_ADDR")]
    addr: String,

    #[arg(long, env = "PLAYGEN_PROTOCOL", default_value = "hls")]
    protocol: Protocol,

    #[arg(long, env = "PLAYGEN_RTSP_FLAVOR", default_value = "interleaved")]
    rtsp_flavor: RtspFlavor,

    /// Number of sessions; defaults to the number of records
    #[arg(long, env = "PLAYGEN_COUNT")]
    count: Option<usize>,

    /// Pause between session launches (ms)
    #[arg(long, env = "PLAYGEN_INTERVAL_MS", default_value_t = 1000)]
    interval_ms: u64,

    /// Play time per session (s)
    #[arg(long, env = "PLAYGEN_PLAY_TIME", default_value_t = 900)]
    play_time: u64,

    /// Wait between RTSP SETUP and PLAY (s)
    #[arg(long, env = "PLAYGEN_PLAY_DELAY", default_value_t = 0)]
    play_delay: u64,

    /// Ask the lookup service for a one-time URL
    #[arg(long, env = "PLAYGEN_LOOKUP", default_value_t = true, action = ArgAction::Set)]
    lookup: bool,

    /// Expect and follow a 301 before endpoint setup
    #[arg(long, env = "PLAYGEN_FOLLOW_REDIRECT", default_value_t = true, action = ArgAction::Set)]
    follow_redirect: bool,

    #[arg(long, env = "PLAYGEN_STREAMING_TYPE", default_value = "static")]
    streaming_type: StreamingType,

    #[arg(long, env = "PLAYGEN_DISABLE_KEEP_ALIVE")]
    disable_keep_alive: bool,

    /// Identity header sent on lookup, redirect and endpoint setup
    #[arg(long, env = "PLAYGEN_IDENTITY_HEADER", default_value = "X-Client-User-Agent")]
    identity_header: String,

    #[arg(long, env = "PLAYGEN_IDENTITY_VALUE", default_value = "playgen")]
    identity_value: String,

    /// Identity header sent on manifest and segment fetches
    #[arg(long, env = "PLAYGEN_CONTENT_IDENTITY_HEADER", default_value = "User-Agent")]
    content_identity_header: String,

    /// Also used as the RTSP User-Agent
    #[arg(long, env = "PLAYGEN_CONTENT_IDENTITY_VALUE", default_value = "playgen")]
    content_identity_value: String,

    #[arg(long, env = "PLAYGEN_CONNECT_TIMEOUT_MS", default_value_t = 5000)]
    connect_timeout_ms: u64,

    #[arg(long, env = "PLAYGEN_REQUEST_TIMEOUT_MS", default_value_t = 30000)]
    request_timeout_ms: u64,
}

impl Cli {
    fn run_config(self) -> RunConfig {
        RunConfig {
            server_addr: self.addr,
            protocol: self.protocol,
            rtsp_flavor: self.rtsp_flavor,
            session_count: self.count,
            launch_interval: Duration::from_millis(self.interval_ms),
            play_duration: Duration::from_secs(self.play_time),
            pre_play_delay: Duration::from_secs(self.play_delay),
            lookup_enabled: self.lookup,
            follow_redirect: self.follow_redirect,
            streaming_type: self.streaming_type,
            keep_alive: !self.disable_keep_alive,
            resolve_identity: ClientIdentity::new(self.identity_header, self.identity_value),
            content_identity: ClientIdentity::new(
                self.content_identity_header,
                self.content_identity_value,
            ),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

#[tokio::main]
async fn main() {
    // Setup logging
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let records = match load_session_records(&cli.sessions_file) {
        Ok(r) => r,
        Err(e) => {
            error!("Failed to load session list: {}", e);
            std::process::exit(1);
        }
    };

    let run = cli.run_config();
    info!(
        "Starting playgen: {:?} against {}, play time {:?}",
        run.protocol, run.server_addr, run.play_duration
    );

    let orchestrator = match Orchestrator::new(run, records) {
        Ok(o) => o,
        Err(e) => {
            error!("Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    let report = orchestrator.run().await;
    info!(
        "Run complete: {} launched, {} failed",
        report.launched, report.failed
    );
}
