//! Runstream CLI - live run output over WebSocket and Server-Sent Events.
//!
//! This is the main binary entry point. See the `runstream` library for
//! the core functionality.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use runstream::{commands, Config, RunId};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Server used by the client subcommands when `--url` is not given.
const DEFAULT_URL: &str = "http://127.0.0.1:5002";

// CLI
#[derive(Parser)]
#[command(name = "runstream")]
#[command(version)]
#[command(about = "Live run output: WebSocket push path and SSE log-tail pull path")]
struct Cli {
    /// Config file (defaults to RUNSTREAM_CONFIG, then the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server (default)
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
        /// Directory for run log files (overrides config)
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Send stdin lines to a run, printing lines from other producers
    Push {
        /// Run identifier
        run_id: String,
        /// Server base URL
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,
        /// Send the end marker after stdin closes
        #[arg(long)]
        finish: bool,
    },
    /// Print a run's log from the start, following until it ends
    Tail {
        /// Run identifier
        run_id: String,
        /// Server base URL
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,
    },
}

fn init_logging(default_filter: &str) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    if let Ok(path) = std::env::var("RUNSTREAM_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.format_timestamp_secs().init();
    Ok(())
}

fn parse_run(raw: &str) -> Result<RunId> {
    RunId::parse(raw).with_context(|| format!("Invalid run id {raw:?}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Serve {
        port: None,
        log_dir: None,
    });

    // Client commands keep stderr quiet unless asked
    let default_filter = match command {
        Commands::Serve { .. } => "info",
        Commands::Push { .. } | Commands::Tail { .. } => "warn",
    };
    init_logging(default_filter)?;

    let mut config = Config::load(cli.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    match command {
        Commands::Serve { port, log_dir } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(dir) = log_dir {
                config.log_dir = dir;
            }
            log::info!("Runstream v{} starting", env!("CARGO_PKG_VERSION"));
            runtime.block_on(commands::serve::run(config))?;
        }
        Commands::Push {
            run_id,
            url,
            finish,
        } => {
            let run = parse_run(&run_id)?;
            let options = commands::PushOptions {
                url,
                finish,
                sentinel: config.sentinel,
            };
            runtime.block_on(commands::push::run(&run, &options))?;
        }
        Commands::Tail { run_id, url } => {
            let run = parse_run(&run_id)?;
            runtime.block_on(commands::tail::run(&url, &run, &config.run_id_header))?;
        }
    }

    Ok(())
}
