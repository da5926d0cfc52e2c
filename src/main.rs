//! cronstack - cron job supervisor
//!
//! Main entry point for the cronstack CLI.

use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use cronstack_config::LoggingConfig;

mod cli;
mod cmd_check;
mod cmd_list;
mod cmd_start;
mod manifest;

use cli::{Cli, Commands};
use manifest::Manifest;

/// Initialize tracing with console and optional file output.
///
/// `RUST_LOG` takes precedence over `--log-level`, which takes precedence
/// over `[logging].level`. Log files rotate daily.
fn init_tracing(
    logging: &LoggingConfig,
    level_override: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let level = level_override.unwrap_or(&logging.level);
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let console = if logging.json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).with_ansi(true).boxed()
    };

    let file = match &logging.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("cronstack")
                .filename_suffix("log")
                .max_log_files(30)
                .build(dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Flushes buffered lines when the process exits.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false).boxed())
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let base_dir = match cli.cwd {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let manifest = Manifest::load(cli.config.as_deref(), base_dir);

    // Logging settings come from the manifest, so a broken manifest still
    // gets reported through the default subscriber.
    let logging = match &manifest {
        Ok(manifest) => manifest.config.logging.clone(),
        Err(_) => LoggingConfig::default(),
    };
    init_tracing(&logging, cli.log_level.as_deref())?;

    let manifest = manifest.inspect_err(|e| tracing::error!("Failed to load manifest: {}", e))?;

    match cli.command {
        Commands::Start(args) => cmd_start::start(manifest, args).await,
        Commands::List { format } => cmd_list::list(&manifest, format),
        Commands::Check => cmd_check::check(&manifest),
    }
}
