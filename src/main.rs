use anyhow::Result;
use clap::Parser;
use depthcam::{DepthcamConfig, DepthcamOrchestrator};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "depthcam")]
#[command(about = "Dual-channel color/depth recorder with file, UDP and HTTP outputs")]
#[command(version)]
#[command(long_about = "Captures a color and a depth channel, colorizes depth through a \
fixed lookup table and, while recording, fans every channel out at a fixed rate to a \
per-channel video file, an optional per-channel UDP stream and an optional HTTP publisher.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "depthcam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR", help = "Directory for daily rolling log files")]
    log_file: Option<PathBuf>,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Record immediately for N seconds, then exit
    #[arg(long, value_name = "N", help = "Start recording at once and exit after N seconds")]
    record_seconds: Option<u64>,

    /// Disable the keyboard controls
    #[arg(long, help = "Disable keyboard controls ('r' record, 'q' quit)")]
    no_keyboard: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let log_guard = init_logging(&args)?;

    info!("Starting depthcam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = DepthcamConfig::load_from_file(&args.config);
    if let Err(e) = config.validate() {
        warn!("Configuration has problems, continuing with sanitized values: {}", e);
    }

    let mut orchestrator = DepthcamOrchestrator::new(config);
    orchestrator.set_keyboard_enabled(!args.no_keyboard);
    orchestrator.set_record_duration(args.record_seconds.map(Duration::from_secs));

    orchestrator.initialize().await.map_err(|e| {
        error!("Failed to initialize system: {}", e);
        e
    })?;

    orchestrator.start().await.map_err(|e| {
        error!("Failed to start system: {}", e);
        e
    })?;

    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("Depthcam exited with code: {}", exit_code);

    // Flush the log file before exiting
    drop(log_guard);
    std::process::exit(exit_code);
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("depthcam={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let mut layers = vec![fmt_layer];
    let mut guard = None;

    if let Some(dir) = &args.log_file {
        std::fs::create_dir_all(dir)?;
        let appender = tracing_appender::rolling::daily(dir, "depthcam.log");
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed(),
        );
        guard = Some(worker_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Depthcam Configuration File");
    println!("# Every key is optional; environment variables override file values,");
    println!("# e.g. DEPTHCAM_RECORDING__FRAME_RATE=60");
    println!();
    println!("{}", toml::to_string_pretty(&DepthcamConfig::default())?);
    Ok(())
}
