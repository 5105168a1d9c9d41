//! Fronthaul O-DU Sample Application
//! 
//! Runs the fronthaul engine as a DU, an RU, or both back to back over in-memory
//! links, and reports the engine counters while it runs.

mod producer;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use fronthaul::config::{FronthaulConfig, Role, WaitMode};
use fronthaul::timing::SystemClock;
use fronthaul::{EngineHandle, FronthaulEngine, StatsSnapshot};
use interfaces::{loopback, EndpointStats, LoopbackSink};

use producer::{ProducerCounters, ProducerSnapshot, SampleProducer};

/// Frames in flight on one emulated link
const LINK_CAPACITY: usize = 65536;

/// Which ends of the fronthaul to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// DU only; its own traffic loops back to it
    Du,
    /// RU only; its own traffic loops back to it
    Ru,
    /// DU and RU connected back to back
    Pair,
}

/// Fronthaul O-DU sample application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML, or TOML by extension)
    #[arg(short, long, default_value = "odu/config/du.yml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Ends to run
    #[arg(long, value_enum, default_value = "pair")]
    mode: Mode,

    /// Stop after this many seconds; runs until Ctrl-C when absent
    #[arg(long)]
    duration: Option<u64>,

    /// Seconds between statistics reports
    #[arg(long, default_value = "5")]
    stats_interval: u64,

    /// Override the number of codec workers
    #[arg(long)]
    workers: Option<usize>,

    /// Sleep between symbols instead of spinning (coarse timing)
    #[arg(long)]
    sleep_wait: bool,

    /// Write the final counters as JSON to this file
    #[arg(long)]
    stats_json: Option<String>,
}

/// One running engine and what the application keeps of it
struct RunningEngine {
    name: &'static str,
    handle: EngineHandle,
    producer: Arc<ProducerCounters>,
    link: LoopbackSink,
}

#[derive(Serialize)]
struct EngineReport {
    name: &'static str,
    engine: StatsSnapshot,
    producer: ProducerSnapshot,
    link: EndpointStats,
}

#[derive(Serialize)]
struct FinalReport {
    timestamp: String,
    engines: Vec<EngineReport>,
}

fn start_engine(
    name: &'static str,
    config: FronthaulConfig,
    link: (LoopbackSink, interfaces::LoopbackSource),
    seed: u64,
) -> Result<RunningEngine> {
    let producer = SampleProducer::new(&config, seed)?;
    let counters = producer.counters();
    let clock = SystemClock::new(config.clock.wait_mode);
    let (sink, source) = link;
    let report_link = sink.clone();
    let handle = FronthaulEngine::new(config)?.start(clock, sink, source, Box::new(producer))?;
    info!("{} engine started", name);
    Ok(RunningEngine { name, handle, producer: counters, link: report_link })
}

fn report(engines: &[RunningEngine]) {
    for engine in engines {
        let stats = engine.handle.stats().snapshot();
        let producer = engine.producer.snapshot();
        info!(
            "{}: TX {} pkts ({} C / {} U, {} B/s), RX {} pkts ({} B/s)",
            engine.name,
            stats.tx_packets,
            stats.tx_cplane_packets,
            stats.tx_uplane_packets,
            stats.tx_bytes_per_sec,
            stats.total_msgs_rcvd,
            stats.rx_bytes_per_sec
        );
        info!(
            "  RX timing: {} on time, {} early, {} late; {} corrupt, {} seq anomalies, {} unknown flows",
            stats.rx_on_time, stats.rx_early, stats.rx_late, stats.rx_corrupt, stats.rx_pkt_dupl, stats.rx_unknown_flow
        );
        info!(
            "  Faults: {} late TX, {} capacity, {} missed slots; symbols delivered {} ({} partial)",
            stats.late_transmissions,
            stats.capacity_exceeded,
            stats.missed_slots,
            producer.symbols_complete + producer.symbols_partial,
            producer.symbols_partial
        );
        if stats.rx_pusch + stats.rx_prach + stats.rx_srs > 0 {
            info!("  UL classes: PUSCH {}, PRACH {}, SRS {}", stats.rx_pusch, stats.rx_prach, stats.rx_srs);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting fronthaul O-DU sample application");
    info!("Configuration file: {}", args.config);

    let mut config = FronthaulConfig::from_file(&args.config)?;
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if args.sleep_wait {
        config.clock.wait_mode = WaitMode::Sleep;
    }
    config.validate()?;

    info!("Fronthaul configuration:");
    info!("  Numerology: {}", config.subcarrier_spacing()?.numerology());
    info!("  Carriers: {}", config.numerologies.iter().map(|n| n.carriers as usize).sum::<usize>());
    info!("  MTU: {} bytes, workers: {}", config.mtu, config.workers);
    info!("  PDSCH compression: {:?} {} bits", config.compression.pdsch.method, config.compression.pdsch.iq_width);
    info!("  PUSCH compression: {:?} {} bits", config.compression.pusch.method, config.compression.pusch.iq_width);

    let with_role = |role: Role| {
        let mut c = config.clone();
        c.role = role;
        c
    };
    let mut engines = Vec::new();
    match args.mode {
        Mode::Du => engines.push(start_engine("DU", with_role(Role::Du), loopback(LINK_CAPACITY), 1)?),
        Mode::Ru => engines.push(start_engine("RU", with_role(Role::Ru), loopback(LINK_CAPACITY), 2)?),
        Mode::Pair => {
            let (du_sink, ru_source) = loopback(LINK_CAPACITY);
            let (ru_sink, du_source) = loopback(LINK_CAPACITY);
            // RU first, so it is listening when the DU's first C-plane arrives
            engines.push(start_engine("RU", with_role(Role::Ru), (ru_sink, ru_source), 2)?);
            engines.push(start_engine("DU", with_role(Role::Du), (du_sink, du_source), 1)?);
        }
    }

    let mut interval = tokio::time::interval(Duration::from_secs(args.stats_interval.max(1)));
    interval.tick().await;
    let run_for = async {
        match args.duration {
            Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(run_for);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received shutdown signal");
                break;
            }
            _ = &mut run_for => {
                info!("Run duration elapsed");
                break;
            }
            _ = interval.tick() => {
                report(&engines);
                if let Some(stopped) = engines.iter().find(|e| !e.handle.is_running()) {
                    warn!("{} engine stopped unexpectedly", stopped.name);
                    break;
                }
            }
        }
    }

    // Shutdown
    info!("Shutting down fronthaul engines");
    report(&engines);
    let mut reports = Vec::with_capacity(engines.len());
    for engine in engines {
        let stats = engine.handle.stats();
        if let Err(e) = engine.handle.stop() {
            error!("{} engine ended with fault: {}", engine.name, e);
        }
        reports.push(EngineReport {
            name: engine.name,
            engine: stats.snapshot(),
            producer: engine.producer.snapshot(),
            link: engine.link.stats(),
        });
    }

    let summary = FinalReport { timestamp: chrono::Utc::now().to_rfc3339(), engines: reports };
    let json = serde_json::to_string_pretty(&summary)?;
    match &args.stats_json {
        Some(path) => {
            std::fs::write(path, &json)?;
            info!("Final counters written to {}", path);
        }
        None => info!("Final counters:\n{}", json),
    }

    info!("Fronthaul O-DU shutdown complete");
    Ok(())
}
