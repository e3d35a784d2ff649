use clap::Parser;
use evlens::{run, Feeds, OutputFormat, RunOptions};
use evlens_core::config::Config;
use evlens_core::LogSpecifier;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "evlens", about = "evlens — structured event log viewer with live tail")]
struct Cli {
    /// Event log to open (a `.jsonl` file of records).
    path: String,

    /// Treat the log as a live channel and tail it after the initial scan.
    #[arg(long)]
    live: bool,

    /// Filter query, e.g. `level:error provider:Security id:4624-4634 disk`.
    #[arg(long)]
    filter: Option<String>,

    /// Keep printing live events (implies --live).
    #[arg(long)]
    follow: bool,

    /// Stop following after this many milliseconds.
    #[arg(long, value_name = "MS")]
    duration: Option<u64>,

    /// Hold live events in the pending buffer instead of showing them
    /// immediately; they are flushed on exit.
    #[arg(long)]
    paused: bool,

    /// Directory of `<provider>.json` metadata files.
    #[arg(long, value_name = "DIR")]
    provider_dir: Option<PathBuf>,

    /// Provider database file (repeatable). Selects the database resolver.
    #[arg(long = "database", value_name = "FILE")]
    databases: Vec<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Write debug logs to /tmp/evlens-debug.log (tail -f to inspect).
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.debug {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open("/tmp/evlens-debug.log")?;
        tracing_subscriber::fmt()
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .init();
        tracing::info!("evlens debug log started — tail -f /tmp/evlens-debug.log");
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    let config = Config::load()?;
    let live = cli.live || cli.follow;
    let spec = if live {
        LogSpecifier::live(cli.path)
    } else {
        LogSpecifier::file(cli.path)
    };
    let options = RunOptions {
        spec: Some(spec),
        filter: cli.filter,
        follow: cli.follow,
        duration: cli.duration.map(Duration::from_millis),
        paused: cli.paused,
        provider_dir: cli.provider_dir,
        databases: cli.databases,
        format: cli.format,
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run(options, config, Feeds::files(), &mut out).await
}
