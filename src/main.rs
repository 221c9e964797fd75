use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, Level};

use pitch_capture::config::CaptureConfig;
use pitch_capture::ingress::Ingress;
use pitch_capture::journal::Journal;
use pitch_capture::pipeline::CapturePipeline;

/// High-volume PITCH multicast capture: classifies and sequence-checks every
/// packet on two feed ports and journals them to rotating binary files.
#[derive(Parser)]
struct Args {
    /// IPv4 multicast group to join
    #[clap(long, default_value = "233.218.133.80")]
    multicast_group: Ipv4Addr,

    /// First feed port
    #[clap(long, default_value_t = 30501)]
    port1: u16,

    /// Second feed port
    #[clap(long, default_value_t = 30502)]
    port2: u16,

    /// Active journal file; rotated files get numeric suffixes
    #[clap(long, default_value = "packets_binary.log")]
    log_file: PathBuf,

    /// Rotation threshold per journal file, in bytes
    #[clap(long, default_value_t = 500 * 1024 * 1024)]
    log_file_size: u64,

    /// Number of rotated journal files to keep
    #[clap(long, default_value_t = 50)]
    log_file_count: usize,

    /// Journal queue capacity, in entries
    #[clap(long, default_value_t = 1024 * 1024)]
    queue_size: usize,

    /// Journal writer threads
    #[clap(long, default_value_t = 4)]
    writer_threads: usize,

    /// Packets between performance reports
    #[clap(long, default_value_t = 100_000)]
    stats_interval: u64,

    /// Packets between forced journal drains
    #[clap(long, default_value_t = 1_000_000)]
    flush_interval: u64,

    /// Capture heartbeat packets instead of filtering them out
    #[clap(long, default_value_t = false)]
    keep_heartbeats: bool,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

impl Args {
    fn to_config(&self) -> CaptureConfig {
        let mut config = CaptureConfig::default_feed();
        config.multicast_group = self.multicast_group;
        config.port1 = self.port1;
        config.port2 = self.port2;
        config.log_file = self.log_file.clone();
        config.log_file_size = self.log_file_size;
        config.log_file_count = self.log_file_count;
        config.async_queue_size = self.queue_size;
        config.async_threads = self.writer_threads;
        config.stats_interval = self.stats_interval;
        config.flush_interval = self.flush_interval;
        config.skip_heartbeats = !self.keep_heartbeats;
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let config = args.to_config();
    config.validate()?;

    info!("PITCH multicast capture starting");
    info!("  group {}, ports {} / {}", config.multicast_group, config.port1, config.port2);
    info!(
        "  journal {} ({} MiB x {} files)",
        config.log_file.display(),
        config.log_file_size / (1024 * 1024),
        config.log_file_count
    );
    info!(
        "  {} writer threads, {} queue slots, heartbeat filtering {}",
        config.async_threads,
        config.async_queue_size,
        if config.skip_heartbeats { "on" } else { "off" }
    );

    let (stop_tx, stop_rx) = watch::channel(false);

    let journal = Journal::new(&config, stop_tx.clone())?;
    let pipeline = Arc::new(CapturePipeline::new(config.clone(), journal));
    let mut ingress = Ingress::new(&config, stop_rx)?;

    tokio::spawn(handle_signals(stop_tx));

    info!("initialization complete, waiting for packets");
    let capture_result = ingress.run(pipeline.as_ref()).await;

    if let Err(e) = &capture_result {
        error!("capture loop failed: {:#}", e);
    }

    pipeline.shutdown()?;
    capture_result
}

/// Signal handlers only trip the stop flag; all cleanup runs on the main
///  path after the capture loop has returned.
async fn handle_signals(stop: watch::Sender<bool>) {
    let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(signal) => signal,
        Err(e) => {
            error!("failed to install SIGTERM handler: {}", e);
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
        _ = terminate.recv() => info!("termination requested, shutting down"),
    }

    let _ = stop.send(true);
}
