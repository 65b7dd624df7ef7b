//! focus-telemetry CLI
//!
//! Runs a sampling session against an aggregation server, or runs the
//! server itself.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use focus_telemetry::{
    config::Config,
    core::{SessionController, StopReason},
    delivery::DeliveryClient,
    ledger::{create_shared_ledger_with_persistence, DeliveryLedger},
    source::{ChannelSource, NoopSource, ScoreSource},
    DATA_NOTICE, VERSION,
};
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "focus-telemetry")]
#[command(version = VERSION)]
#[command(about = "Windowed attention telemetry client and aggregation server", long_about = None)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Input {
    /// One score per line on standard input
    Stdin,
    /// No sensor; every tick records the neutral score
    None,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a sampling session
    Start {
        /// Subject to report for
        #[arg(long)]
        subject: Option<u64>,

        /// Aggregation server base URL
        #[arg(long)]
        server: Option<String>,

        /// Samples per window
        #[arg(long)]
        window: Option<usize>,

        /// Milliseconds between samples
        #[arg(long)]
        tick_ms: Option<u64>,

        /// Consecutive read failures that end the session
        #[arg(long)]
        max_read_failures: Option<u32>,

        /// Where scores come from
        #[arg(long, value_enum, default_value = "stdin")]
        input: Input,
    },

    /// Run the aggregation server
    #[cfg(feature = "server")]
    Serve {
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,

        /// SQLite database file
        #[arg(long)]
        db: Option<PathBuf>,

        /// IANA timezone for report dates
        #[arg(long)]
        timezone: Option<String>,
    },

    /// Show delivery statistics
    Status,

    /// Display the data notice
    Notice,

    /// Show configuration
    Config {
        /// Write the default configuration file
        #[arg(long)]
        init: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Start {
            subject,
            server,
            window,
            tick_ms,
            max_read_failures,
            input,
        } => cmd_start(subject, server, window, tick_ms, max_read_failures, input),
        #[cfg(feature = "server")]
        Commands::Serve { port, db, timezone } => cmd_serve(port, db, timezone),
        Commands::Status => {
            cmd_status();
            Ok(())
        }
        Commands::Notice => {
            cmd_notice();
            Ok(())
        }
        Commands::Config { init } => cmd_config(init),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "focus_telemetry=debug" } else { "focus_telemetry=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn cmd_start(
    subject: Option<u64>,
    server: Option<String>,
    window: Option<usize>,
    tick_ms: Option<u64>,
    max_read_failures: Option<u32>,
    input: Input,
) -> anyhow::Result<()> {
    println!("focus-telemetry v{VERSION}");
    println!();

    let mut config = Config::load().unwrap_or_default();
    if let Some(subject) = subject {
        config.subject_id = subject;
    }
    if let Some(server) = server {
        config.delivery.base_url = server;
    }
    if let Some(window) = window {
        config.session.window_seconds = window;
    }
    if let Some(tick_ms) = tick_ms {
        config.session.tick_interval = Duration::from_millis(tick_ms);
    }
    if let Some(max) = max_read_failures {
        config.session.max_read_failures = max;
    }
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let settings = config.session.to_settings()?;
    let client = DeliveryClient::new(config.delivery.clone())?;

    println!("Starting session...");
    println!("  Subject: {}", config.subject_id);
    println!("  Server: {}", config.delivery.base_url);
    println!(
        "  Window: {} samples every {:?}",
        settings.window_size, settings.tick_interval
    );

    let source: Box<dyn ScoreSource> = match input {
        Input::Stdin => {
            let (source, _reader) = ChannelSource::spawn_line_reader(BufReader::new(std::io::stdin()))
                .context("failed to start score reader")?;
            println!("  Input: stdin (one score per line)");
            Box::new(source)
        }
        Input::None => {
            println!("  Input: none (neutral scores)");
            Box::new(NoopSource::new())
        }
    };

    let runtime = runtime()?;

    match runtime.block_on(client.test_connection()) {
        Ok(true) => println!("  Server connection: OK"),
        Ok(false) => eprintln!("Warning: Server health check failed"),
        Err(e) => eprintln!("Warning: Could not connect to server: {e}"),
    }

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let ledger = create_shared_ledger_with_persistence(config.ledger_path());

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .context("failed to set Ctrl+C handler")?;

    let mut controller =
        SessionController::new(config.subject_id, settings, source, Arc::new(client))
            .with_ledger(Arc::clone(&ledger));
    tracing::info!(session_id = %controller.session_id(), "Session started");

    let outcome = runtime.block_on(controller.run(cancel))?;

    println!();
    match outcome.stop_reason {
        StopReason::Cancelled => println!("Session stopped."),
        StopReason::SourceUnavailable => println!("Session ended: score source unavailable."),
    }
    println!("  Windows: {}", outcome.summary.window_count);
    println!("  Overall average: {}", outcome.summary.overall_average);
    match outcome.feedback {
        Some(feedback) => println!("  Feedback: {feedback}"),
        None => println!("  Feedback: not available (summary not delivered)"),
    }

    if let Err(e) = ledger.save() {
        eprintln!("Warning: Could not save delivery ledger: {e}");
    }

    // Final stats
    println!();
    println!("{}", ledger.summary());
    Ok(())
}

#[cfg(feature = "server")]
fn cmd_serve(
    port: Option<u16>,
    db: Option<PathBuf>,
    timezone: Option<String>,
) -> anyhow::Result<()> {
    use focus_telemetry::server::{self, ServerConfig};

    let mut config = Config::load().unwrap_or_default();
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(db) = db {
        config.server.database_path = db;
    }
    if let Some(timezone) = timezone {
        config.server.timezone = timezone;
    }

    let server_config = ServerConfig::from_config(&config)?;
    println!("focus-telemetry server v{VERSION}");
    println!("  Database: {:?}", server_config.database_path);
    println!("  Report timezone: {}", server_config.timezone.name());
    println!(
        "  Feedback providers: {}",
        if server_config.feedback.is_enabled() {
            "configured"
        } else {
            "none (canned feedback)"
        }
    );

    runtime()?.block_on(async {
        let (addr, shutdown_tx) = server::run(server_config).await?;
        println!("  Listening on http://{addr}");
        println!();
        println!("Press Ctrl+C to stop");

        tokio::signal::ctrl_c().await?;
        let _ = shutdown_tx.send(());
        Ok::<(), anyhow::Error>(())
    })
}

fn cmd_status() {
    let config = Config::load().unwrap_or_default();

    println!("focus-telemetry Status");
    println!("======================");
    println!();

    println!("Configuration:");
    println!("  Subject: {}", config.subject_id);
    println!("  Server: {}", config.delivery.base_url);
    println!("  Window: {} samples", config.session.window_seconds);
    println!("  Tick: {:?}", config.session.tick_interval);
    println!();

    let ledger_path = config.ledger_path();
    if ledger_path.exists() {
        let stats = DeliveryLedger::with_persistence(ledger_path).stats();
        println!("Cumulative Statistics:");
        println!(
            "  Samples recorded: {} ({} without signal)",
            stats.samples_recorded, stats.no_signal_ticks
        );
        println!("  Read failures: {}", stats.read_failures);
        println!("  Windows flushed: {}", stats.windows_flushed);
        println!(
            "  Windows delivered: {} ({} failed)",
            stats.windows_delivered, stats.window_delivery_failures
        );
        println!(
            "  Summaries delivered: {} ({} failed)",
            stats.summaries_delivered, stats.summary_delivery_failures
        );
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_notice() {
    println!("{DATA_NOTICE}");
}

fn cmd_config(init: bool) -> anyhow::Result<()> {
    if init {
        let path = Config::config_path();
        if path.exists() {
            anyhow::bail!("configuration already exists at {:?}", path);
        }
        Config::default().save()?;
        println!("Wrote default configuration to {path:?}");
        return Ok(());
    }

    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    Ok(())
}
