//! Process-bus receive probe
//!
//! Captures GOOSE and Sampled Values traffic on an interface, or generates
//! it for the configured sources, and prints a JSON report on exit.
//!
//! ```bash
//! pbus-probe --interface eth1 --goose 100 --sv80 20 --sv256 4 --workers 4
//! pbus-probe --synthetic 1000000 --goose 10 --sv80 10
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use pnet::datalink::{self, Channel, DataLinkReceiver};
use tokio::task;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pbus_probe::pool::{BufferPool, Frame};
use pbus_probe::probe::{Probe, ProbeError, ProbeReport};
use pbus_probe::rx::RxQueue;
use pbus_probe::stats::{ProbeStats, StatsSnapshot};
use pbus_probe::ProbeConfig;

#[derive(Parser, Debug)]
#[command(name = "pbus-probe")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Interface to capture on
    #[arg(short, long)]
    interface: Option<String>,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of GOOSE publishers
    #[arg(long)]
    goose: Option<usize>,

    /// Number of single-ASDU SV streams
    #[arg(long)]
    sv80: Option<usize>,

    /// Number of 8-ASDU SV streams
    #[arg(long)]
    sv256: Option<usize>,

    /// Worker threads (0 or a power of two)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Seconds between statistics lines
    #[arg(long)]
    stats_interval: Option<u64>,

    /// Generate traffic instead of capturing, optionally stopping after N frames
    #[arg(long, num_args = 0..=1, default_missing_value = "0", value_name = "FRAMES")]
    synthetic: Option<u64>,

    /// List capture interfaces and exit
    #[arg(long)]
    list_interfaces: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_config(args: &Args) -> anyhow::Result<ProbeConfig> {
    let mut config = match &args.config {
        Some(path) => ProbeConfig::from_file(path)?,
        None => ProbeConfig::default(),
    };
    if let Some(count) = args.goose {
        config.goose_sources = count;
    }
    if let Some(count) = args.sv80 {
        config.sv80_sources = count;
    }
    if let Some(count) = args.sv256 {
        config.sv256_sources = count;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(secs) = args.stats_interval {
        config.stats_interval_secs = secs;
    }
    config.validate()?;
    Ok(config)
}

fn list_interfaces() {
    for interface in datalink::interfaces() {
        println!("{:>3}  {}", interface.index, interface.name);
        if let Some(mac) = interface.mac {
            println!("     mac {}", mac);
        }
        for ip in &interface.ips {
            println!("     ip  {}", ip);
        }
    }
}

/// Datalink capture on one interface.
struct CaptureQueue {
    rx: Box<dyn DataLinkReceiver>,
    pool: BufferPool,
    read_failed: bool,
}

impl CaptureQueue {
    fn open(name: &str, pool: BufferPool) -> Result<Self, ProbeError> {
        let capture_error = |source| ProbeError::Capture {
            interface: name.to_string(),
            source,
        };
        let interface = datalink::interfaces()
            .into_iter()
            .find(|interface| interface.name == name)
            .ok_or_else(|| capture_error(io::Error::new(io::ErrorKind::NotFound, "no such interface")))?;

        let config = datalink::Config {
            read_timeout: Some(Duration::from_millis(100)),
            promiscuous: true,
            ..Default::default()
        };
        match datalink::channel(&interface, config) {
            Ok(Channel::Ethernet(_, rx)) => Ok(CaptureQueue {
                rx,
                pool,
                read_failed: false,
            }),
            Ok(_) => Err(capture_error(io::Error::new(
                io::ErrorKind::Unsupported,
                "not an Ethernet channel",
            ))),
            Err(source) => Err(capture_error(source)),
        }
    }
}

impl RxQueue for CaptureQueue {
    /// The datalink socket hands out one frame per read.
    fn rx_burst(&mut self, out: &mut Vec<Frame>, max: usize) -> usize {
        if max == 0 {
            return 0;
        }
        let Some(mut frame) = self.pool.alloc() else {
            return 0;
        };
        match self.rx.next() {
            Ok(packet) => {
                frame.fill_from(packet);
                out.push(frame);
                1
            }
            Err(err) if err.kind() == io::ErrorKind::TimedOut => 0,
            Err(err) => {
                if !self.read_failed {
                    self.read_failed = true;
                    warn!(error = %err, "capture read failed");
                }
                0
            }
        }
    }
}

fn spawn_probe<Q>(
    probe: Probe,
    mut rx: Q,
    shutdown: Arc<AtomicBool>,
) -> task::JoinHandle<Result<ProbeReport, ProbeError>>
where
    Q: RxQueue + Send + 'static,
{
    task::spawn_blocking(move || probe.run(&mut rx, &shutdown))
}

async fn report_stats(stats: Arc<ProbeStats>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately
    ticker.tick().await;
    let mut previous = StatsSnapshot::default();
    loop {
        ticker.tick().await;
        let snapshot = stats.snapshot();
        let rate = (snapshot.rx - previous.rx) / period.as_secs().max(1);
        info!(
            rx = snapshot.rx,
            rate,
            goose = snapshot.goose.received,
            goose_unknown = snapshot.goose.unknown,
            goose_sequence_errors = snapshot.goose.sequence_errors,
            goose_parse_errors = snapshot.goose.parse_errors(),
            sv = snapshot.sv.received,
            sv_unknown = snapshot.sv.unknown,
            sv_sequence_errors = snapshot.sv.sequence_errors,
            sv_parse_errors = snapshot.sv.parse_errors(),
            other = snapshot.to_kernel,
            ring_full_drops = snapshot.ring_full_drops,
            rx_no_buffer = snapshot.rx_no_buffer,
            "statistics"
        );
        previous = snapshot;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();

    if args.list_interfaces {
        list_interfaces();
        return Ok(());
    }

    let config = load_config(&args).context("invalid configuration")?;
    let period = Duration::from_secs(config.stats_interval_secs);
    let probe = Probe::new(config).context("failed to set up the probe")?;
    let stats = probe.stats();
    let shutdown = Arc::new(AtomicBool::new(false));

    let signal_flag = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal_flag.store(true, Ordering::Release);
        }
    });

    let running = match (args.synthetic, &args.interface) {
        (Some(limit), _) => {
            let mut traffic = probe.synthetic_traffic();
            if limit > 0 {
                traffic = traffic.with_limit(limit);
            }
            info!(limit, "generating synthetic traffic");
            spawn_probe(probe, traffic, Arc::clone(&shutdown))
        }
        (None, Some(interface)) => {
            let capture = CaptureQueue::open(interface, probe.pool().clone())?;
            info!(interface = %interface, "capturing");
            spawn_probe(probe, capture, Arc::clone(&shutdown))
        }
        (None, None) => bail!("either --interface or --synthetic is required"),
    };

    let reporter = tokio::spawn(report_stats(stats, period));
    let report = running.await.context("probe thread failed")??;
    reporter.abort();

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
