//! Archive collection CLI.
//!
//! Thin wrapper around the `archive_collector` library: parses flags into a
//! `CollectionRequest`, runs the workflow, and prints the resulting manifest as JSON. CLI
//! parsing and config-file loading live here, not in the library, per the core's out-of-scope
//! list.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use archive_collector::cancellation::CancellationSignal;
use archive_collector::config::{CollectionRequest, DateRange, Destination, Mode, Symbols};
use archive_collector::matrix::{Market, Partition};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "collect")]
#[command(about = "Bulk-collect public cryptocurrency archive data into a lakehouse destination")]
struct Args {
    /// Path to the availability matrix JSON file.
    #[arg(long)]
    matrix: PathBuf,

    /// Markets to collect (spot, futures_um, futures_cm, options). Repeatable.
    #[arg(long = "market", required = true)]
    markets: Vec<Market>,

    /// Symbols to collect, applied to every requested market.
    #[arg(long = "symbol", required = true)]
    symbols: Vec<String>,

    /// Data types to collect (klines, trades, fundingRate, ...). Repeatable.
    #[arg(long = "data-type", required = true)]
    data_types: Vec<String>,

    /// Inclusive start date (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    start: Option<chrono::NaiveDate>,

    /// Inclusive end date (YYYY-MM-DD). Defaults to `start`.
    #[arg(long)]
    end: Option<chrono::NaiveDate>,

    /// Partitions to collect (daily, monthly). Repeatable; defaults to daily.
    #[arg(long = "partition")]
    partitions: Vec<Partition>,

    /// Local directory destination. Mutually exclusive with --bucket.
    #[arg(long)]
    local_dir: Option<String>,

    /// S3-compatible bucket destination. Mutually exclusive with --local-dir.
    #[arg(long)]
    bucket: Option<String>,

    /// Key prefix within --bucket.
    #[arg(long, default_value = "")]
    prefix: String,

    /// Region for --bucket.
    #[arg(long)]
    region: Option<String>,

    #[arg(long, default_value = "auto")]
    mode: Mode,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    max_concurrency: Option<usize>,

    #[arg(long)]
    timeout_secs: Option<u64>,

    #[arg(long)]
    verify_checksum: bool,

    #[arg(long)]
    force: bool,

    #[arg(long, default_value = "true")]
    incremental: bool,

    /// Name of the bulk transfer tool binary on PATH.
    #[arg(long, default_value = "s5cmd")]
    tool: String,
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "archive_collector=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();

    let destination = match (args.local_dir.clone(), args.bucket.clone()) {
        (Some(root), None) => Destination::LocalDirectory { root },
        (None, Some(bucket)) => Destination::ObjectStoreBucket {
            bucket,
            prefix: args.prefix.clone(),
            region: args.region.clone(),
        },
        _ => anyhow::bail!("exactly one of --local-dir or --bucket must be set"),
    };

    let today = chrono::Utc::now().date_naive();
    let start = args.start.unwrap_or(today);
    let end = args.end.unwrap_or(start);

    let request = CollectionRequest {
        markets: args.markets.clone(),
        symbols: Symbols::Flat(args.symbols.clone()),
        data_types: args.data_types.clone(),
        intervals: HashMap::new(),
        date_range: Some(DateRange { start, end }),
        partitions: args.partitions.clone(),
        destination,
        batch_size: args.batch_size,
        max_concurrency: args.max_concurrency,
        timeout_secs: args.timeout_secs,
        verify_checksum: args.verify_checksum,
        force: args.force,
        mode: args.mode,
        incremental: args.incremental,
    };

    let cancel = CancellationSignal::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_for_signal.cancel();
        }
    });

    let manifest = archive_collector::run(request, &args.matrix, &args.tool, cancel)
        .await
        .context("collection run failed")?;

    println!("{}", serde_json::to_string_pretty(&manifest)?);
    Ok(())
}
