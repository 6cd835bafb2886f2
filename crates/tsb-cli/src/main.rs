mod commands;

use clap::{ArgGroup, Parser, Subcommand};
use commands::{install_signal_handler, EXIT_FAILURE, EXIT_STORE_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;
use tsb_store::{LogLevel, StoreConfig, TsbConfigFile};

#[derive(Debug, Parser)]
#[command(
    name = "tsb",
    version,
    about = "Inspect and soak-test a local-disk time-shifted buffer store",
    long_about = "Inspect and soak-test a local-disk time-shifted buffer store.\n\n\
                  A store owns its location: anything already there is deleted when \
                  the store starts, and everything it wrote is deleted when it stops."
)]
#[command(group(ArgGroup::new("source").required(true).args(["config", "location"])))]
struct Cli {
    /// TOML file with `[store]` and optional `[log]` tables.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Store location (absolute path). Ignored with --config.
    #[arg(long)]
    location: Option<PathBuf>,

    /// Percentage of the filesystem to leave free. Ignored with --config.
    #[arg(long, default_value_t = 5)]
    min_free: u32,

    /// Maximum store capacity in MiB. Ignored with --config.
    #[arg(long, default_value_t = 1024)]
    max_capacity: u32,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start a store and report its capacity and generations.
    Capacity,
    /// Fill the store, cull the oldest segments, verify and flush, repeatedly.
    Soak {
        /// Number of fill/verify/flush cycles.
        #[arg(long, default_value_t = 3)]
        cycles: u32,
        /// Size of each segment in bytes.
        #[arg(long, default_value_t = 188 * 1024)]
        segment_size: usize,
        /// Segments written per cycle.
        #[arg(long, default_value_t = 256)]
        segments: usize,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let (config, log_level) = match resolve_config(&cli) {
        Ok(resolved) => resolved,
        Err(msg) => {
            eprintln!("error: {msg}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        tracing_level(log_level)
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("TSB_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
    tracing::debug!(location = %config.location.display(), "resolved store configuration");

    install_signal_handler();

    let result = match cli.command {
        Commands::Capacity => commands::capacity::run(&config, cli.json),
        Commands::Soak {
            cycles,
            segment_size,
            segments,
        } => commands::soak::run(
            &config,
            &commands::soak::SoakOptions {
                cycles,
                segment_size,
                segments,
            },
            cli.json,
        ),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("store error:") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn resolve_config(cli: &Cli) -> Result<(StoreConfig, LogLevel), String> {
    if let Some(path) = &cli.config {
        let file = TsbConfigFile::load(path)
            .and_then(|file| file.store.validate().map(|()| file))
            .map_err(|e| format!("failed to load config {}: {e}", path.display()))?;
        return Ok((file.store, file.log.level));
    }
    let location = cli
        .location
        .clone()
        .ok_or_else(|| "either --config or --location is required".to_owned())?;
    Ok((
        StoreConfig::new(location, cli.min_free, cli.max_capacity),
        LogLevel::Warn,
    ))
}

fn tracing_level(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Warn => "warn",
        LogLevel::Mil => "info",
        LogLevel::Error => "error",
    }
}
