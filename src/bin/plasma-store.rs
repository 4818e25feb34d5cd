//! Plasma Store Binary
//!
//! Runs the plasma store runner standalone with logging callbacks.
//!
//! # Examples
//!
//! ```bash
//! # Start with a 2GB budget backed by /dev/shm
//! plasma-store serve --system-memory 2147483648 --plasma-directory /dev/shm
//!
//! # Start from a config file, evicting under pressure
//! plasma-store serve --config plasma.toml --reclaim-policy evict
//! ```

use clap::{Args, Parser, Subcommand};
use plasma_store::metrics::{gather_metrics, init_metrics};
use plasma_store::runner;
use plasma_store::{
    ObjectId, ObjectInfo, PlasmaStoreRunner, ReclaimPolicy, StoreCallbacks, StoreRunnerConfig,
};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Plasma Store - shared-memory object store coordinator
#[derive(Parser, Debug)]
#[command(name = "plasma-store")]
#[command(version = plasma_store::VERSION)]
#[command(about = "Shared-memory object store coordinator", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Log directory path
    #[arg(long, global = true, default_value = "logs", env = "PLASMA_LOG_DIR")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the plasma store and run until interrupted
    Serve(ServeArgs),

    /// Show version
    Version,
}

/// Store configuration arguments (override config file / environment)
#[derive(Args, Debug)]
struct ServeArgs {
    /// Config file (TOML, YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Transport identity for clients
    #[arg(long)]
    socket_name: Option<String>,

    /// Primary memory budget in bytes
    #[arg(long)]
    system_memory: Option<u64>,

    /// Reserve primary memory with huge pages
    #[arg(long)]
    hugepages: bool,

    /// Directory for the primary backing file
    #[arg(long)]
    plasma_directory: Option<PathBuf>,

    /// Directory for fallback allocations
    #[arg(long)]
    fallback_directory: Option<PathBuf>,

    /// Used-space fraction at which directories count as full
    #[arg(long)]
    capacity_threshold: Option<f64>,

    /// Reclaim policy under pressure (spill, evict)
    #[arg(long)]
    reclaim_policy: Option<String>,

    /// Print Prometheus metrics on shutdown
    #[arg(long)]
    print_metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;

    match cli.command {
        Commands::Serve(args) => serve_command(args).await,
        Commands::Version => {
            println!("plasma-store {}", plasma_store::VERSION);
            Ok(())
        }
    }
}

/// Setup logging with rolling files and console output
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cli.log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &cli.log_dir, "plasma-store.log");

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_ansi(!cli.no_color),
        )
        .with(fmt::layer().with_writer(file_appender).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

fn resolve_config(args: &ServeArgs) -> anyhow::Result<StoreRunnerConfig> {
    let mut config = match &args.config {
        Some(path) => StoreRunnerConfig::from_file(path)?,
        None => StoreRunnerConfig::from_env(),
    };

    if let Some(socket_name) = &args.socket_name {
        config.socket_name = socket_name.clone();
    }
    if let Some(system_memory) = args.system_memory {
        config.system_memory = system_memory;
    }
    if args.hugepages {
        config.hugepages_enabled = true;
    }
    if let Some(dir) = &args.plasma_directory {
        config.plasma_directory = dir.clone();
    }
    if let Some(dir) = &args.fallback_directory {
        config.fallback_directory = dir.clone();
    }
    if let Some(threshold) = args.capacity_threshold {
        config.capacity_threshold = threshold;
    }
    match args.reclaim_policy.as_deref() {
        Some("spill") => config.reclaim_policy = ReclaimPolicy::Spill,
        Some("evict") => config.reclaim_policy = ReclaimPolicy::Evict,
        Some(other) => anyhow::bail!("Unknown reclaim policy: {}", other),
        None => {}
    }

    config.validate()?;
    Ok(config)
}

/// Callbacks that only log; there is no external spill target standalone
fn logging_callbacks() -> StoreCallbacks {
    StoreCallbacks::from_fns(
        |object_ids: &[ObjectId]| {
            warn!(
                count = object_ids.len(),
                "Spill requested but no spill target is configured"
            );
            false
        },
        || warn!("Object store full"),
        |info: &ObjectInfo| {
            debug!(object_id = %info.object_id, data_size = info.data_size, "Object added")
        },
        |object_id: &ObjectId| debug!(object_id = %object_id, "Object deleted"),
    )
}

/// Serve command - run the store until Ctrl-C
async fn serve_command(args: ServeArgs) -> anyhow::Result<()> {
    info!(version = %plasma_store::VERSION, "Plasma store starting");
    init_metrics();

    let config = resolve_config(&args)?;
    info!(
        socket = %config.socket_name,
        system_memory = config.system_memory,
        plasma_directory = %config.plasma_directory.display(),
        fallback_directory = %config.fallback_directory.display(),
        reclaim_policy = ?config.reclaim_policy,
        "Configuration loaded"
    );

    let runner = runner::install(PlasmaStoreRunner::new(config)?)?;
    runner.start(logging_callbacks())?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runner.stop();
    info!(
        consumed_bytes = runner.consumed_bytes(),
        cumulative_created_objects = runner.cumulative_created_objects(),
        cumulative_created_bytes = runner.cumulative_created_bytes(),
        fallback_allocated = runner.fallback_allocated(),
        "Final allocator counters"
    );

    if args.print_metrics {
        println!("{}", gather_metrics());
    }

    Ok(())
}
