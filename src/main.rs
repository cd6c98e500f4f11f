//! beacon-bridge — MQTT → WebSocket beacon telemetry bridge.
//!
//! Two modes:
//!
//! - `relay` — subscribe to the broker topic and fan messages out to
//!   WebSocket clients.
//! - `watch` — connect to a running relay, run the smoothing/detection
//!   pipeline, and print marker and counter updates to the console.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::sync::{watch, Mutex};

use beacon_bridge::{
    config::{FloorPlan, RelayConfig, TrackerConfig},
    error::BridgeResult,
    export::{ExportSink, SampleRecorder, SampleRow, DEFAULT_SAMPLE_QUOTA},
    monitor::run_monitor,
    reaper::spawn_reaper,
    relay::Relay,
    tracker::{BeaconTracker, MarkerUpdate, PresentationSink},
};

/// Bridge BLE beacon telemetry from MQTT to WebSocket clients.
#[derive(Debug, Parser)]
#[command(name = "beacon-bridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the MQTT → WebSocket relay.
    Relay(RelayArgs),

    /// Connect to a relay and track beacons on the console.
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
struct RelayArgs {
    /// MQTT broker host.
    #[arg(long, default_value = "localhost")]
    broker_host: String,

    /// MQTT broker port.
    #[arg(long, default_value_t = 1883)]
    broker_port: u16,

    /// Topic to subscribe to and forward.
    #[arg(long, default_value = "Honda")]
    topic: String,

    /// Address for the WebSocket listener.
    #[arg(long, default_value = "0.0.0.0:9002")]
    listen: SocketAddr,

    /// Seconds between upstream reconnect attempts.
    #[arg(long, default_value_t = 1)]
    reconnect_secs: u64,
}

#[derive(Debug, Args)]
struct WatchArgs {
    /// WebSocket URL of the relay.
    #[arg(long, default_value = "ws://localhost:9002")]
    url: String,

    /// Topic to accept envelopes for.
    #[arg(long, default_value = "Honda")]
    topic: String,

    /// Beacon MACs in floor-plan order (row-major).
    #[arg(long, value_delimiter = ',', required = true)]
    beacons: Vec<String>,

    /// Floor-plan grid rows.
    #[arg(long, default_value_t = 3)]
    rows: usize,

    /// Floor-plan grid columns.
    #[arg(long, default_value_t = 4)]
    cols: usize,

    /// Gateway MACs to report per-gateway counters for.
    #[arg(long, value_delimiter = ',')]
    gateways: Vec<String>,

    /// Fire a one-shot completion notice at this many visible beacons.
    #[arg(long)]
    expected: Option<usize>,

    /// Record every reading and report each time this many rows accumulate.
    #[arg(long, default_value_t = DEFAULT_SAMPLE_QUOTA)]
    sample_quota: usize,
}

#[tokio::main]
async fn main() -> BridgeResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Relay(args) => run_relay(args).await,
        Command::Watch(args) => run_watch(args).await,
    }
}

async fn run_relay(args: RelayArgs) -> BridgeResult<()> {
    let config = RelayConfig::new(args.broker_host, args.broker_port, args.topic)
        .with_listen_addr(args.listen)
        .with_reconnect_period(Duration::from_secs(args.reconnect_secs));

    let handle = Relay::start(config).await?;
    tracing::info!("relay running; press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    handle.shutdown().await;
    Ok(())
}

async fn run_watch(args: WatchArgs) -> BridgeResult<()> {
    let macs: Vec<&str> = args.beacons.iter().map(String::as_str).collect();
    let plan = FloorPlan::grid(&macs, args.rows, args.cols, (1024.0, 968.0))?;

    let mut config = TrackerConfig::default()
        .with_floor_plan(plan)
        .with_gateways(args.gateways);
    if let Some(expected) = args.expected {
        config = config.with_expected_beacons(expected);
    }
    let window_size = config.window_size;

    let tracker = Arc::new(Mutex::new(BeaconTracker::new(
        config,
        Box::new(ConsoleSink),
    )));
    let recorder = Arc::new(Mutex::new(SampleRecorder::new(
        args.sample_quota,
        window_size,
        Box::new(LogExport),
    )));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = spawn_reaper(tracker.clone(), shutdown_rx.clone());

    let monitor = tokio::spawn(run_monitor(
        args.url,
        args.topic,
        tracker,
        Some(recorder),
        shutdown_rx,
    ));

    tokio::signal::ctrl_c().await?;
    let _ = shutdown_tx.send(true);
    let _ = monitor.await;
    let _ = reaper.await;
    Ok(())
}

// ════════════════════════════════════════════════════════════════════
// Console presentation
// ════════════════════════════════════════════════════════════════════

/// Terminal stand-in for the map/table layer.
struct ConsoleSink;

impl PresentationSink for ConsoleSink {
    fn upsert_marker(&mut self, update: &MarkerUpdate) {
        println!(
            "beacon {:>2} [{}] rssi {:>4} dBm  {:>6.2} m  {:?}  via {}",
            update.number,
            update.beacon_id,
            update.average_rssi,
            update.distance_m,
            update.band,
            update.gateway,
        );
    }

    fn remove_marker(&mut self, beacon_id: &str) {
        println!("beacon {} gone silent, removed", beacon_id);
    }

    fn update_counters(&mut self, total_visible: usize, per_gateway: &HashMap<String, usize>) {
        let mut gateways: Vec<_> = per_gateway.iter().collect();
        gateways.sort();
        let summary: Vec<String> = gateways
            .iter()
            .map(|(gw, count)| format!("{gw}={count}"))
            .collect();
        println!("visible: {} ({})", total_visible, summary.join(", "));
    }

    fn scan_complete(&mut self, elapsed: Duration) {
        println!("all beacons scanned in {:.2} s", elapsed.as_secs_f64());
    }
}

/// Logs export batches; writing the tabular file is an external concern.
struct LogExport;

impl ExportSink for LogExport {
    fn export(&mut self, rows: Vec<SampleRow>) {
        tracing::info!("sample quota reached: {} rows ready for export", rows.len());
    }
}
