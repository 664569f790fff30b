use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::info;

use dnstrail::capture::{self, DEFAULT_FILTER};
use dnstrail::config::{CaptureTarget, MonitorConfig};
use dnstrail::monitor;
use dnstrail::sweep::SweepConfig;

#[derive(Parser, Debug)]
#[command(name = "dnstrail")]
#[command(about = "Passive DNS monitor that flags unanswered queries", long_about = None)]
struct Args {
    /// Interface to capture on (defaults to the first active one)
    #[arg(short, long, conflicts_with = "read")]
    interface: Option<String>,

    /// Replay a capture file instead of a live interface
    #[arg(short, long)]
    read: Option<PathBuf>,

    /// Put the interface into promiscuous mode
    #[arg(long)]
    promisc: bool,

    /// BPF capture filter
    #[arg(short, long, default_value = DEFAULT_FILTER)]
    filter: String,

    /// Seconds between staleness sweeps
    #[arg(long, default_value = "10")]
    sweep_interval: u64,

    /// Seconds after which an unanswered query is reported
    #[arg(long, default_value = "5")]
    stale_after: u64,

    /// Maximum pending queries inspected per sweep
    #[arg(long, default_value = "10")]
    sweep_cap: usize,

    /// Seconds between status lines (0 disables)
    #[arg(long, default_value = "60")]
    stats_interval: u64,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// List capture interfaces and exit
    #[arg(long)]
    list_interfaces: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.list_interfaces {
        let interfaces = capture::list_interfaces()?;
        println!("Available network interfaces:");
        for device in interfaces {
            let status = if device.flags.is_up() { "UP" } else { "DOWN" };
            let running = if device.flags.is_running() {
                "RUNNING"
            } else {
                ""
            };
            let loopback = if device.flags.is_loopback() {
                "LOOPBACK"
            } else {
                ""
            };

            println!("  {} [{}] {} {}", device.name, status, running, loopback);

            if let Some(desc) = device.desc {
                println!("    Description: {desc}");
            }
        }
        return Ok(());
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let target = match args.read {
        Some(path) => CaptureTarget::File(path),
        None => {
            let name = match args.interface {
                Some(name) => name,
                None => capture::select_default_interface()?,
            };
            info!("Interface: {name}");
            CaptureTarget::Interface {
                name,
                promisc: args.promisc,
            }
        }
    };

    let config = MonitorConfig {
        target,
        filter: args.filter,
        sweep: SweepConfig {
            interval: Duration::from_secs(args.sweep_interval),
            stale_after: Duration::from_secs(args.stale_after),
            max_inspect: args.sweep_cap,
        },
        stats_interval: Some(Duration::from_secs(args.stats_interval)),
    };

    info!("Starting DNS monitor");
    monitor::run(config).await?;
    info!("DNS monitor stopped");
    Ok(())
}
