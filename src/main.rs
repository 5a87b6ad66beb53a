//! cached-request - fetch HTTP resources through a file-based response cache

use anyhow::Context;
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

use cached_request::cli::{self, Cli};
use cached_request::config::Config;

/// Levels from quietest to loudest
const LEVELS: [LevelFilter; 6] = [
    LevelFilter::OFF,
    LevelFilter::ERROR,
    LevelFilter::WARN,
    LevelFilter::INFO,
    LevelFilter::DEBUG,
    LevelFilter::TRACE,
];

/// Raises `base` by one level per `-v`, capped at trace
fn raise_level(base: LevelFilter, verbose: u8) -> LevelFilter {
    let start = LEVELS.iter().position(|level| *level == base).unwrap_or(2);
    LEVELS[(start + usize::from(verbose)).min(LEVELS.len() - 1)]
}

/// Installs the tracing subscriber on stderr
///
/// `RUST_LOG` wins when set; otherwise each `-v` raises the configured level.
fn init_logging(verbose: u8, configured_level: &str) -> anyhow::Result<()> {
    let base: LevelFilter = configured_level
        .parse()
        .with_context(|| format!("Invalid [logging] level '{}'", configured_level))?;
    let level = raise_level(base, verbose);

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("cached_request={}", level))
            .context("Failed to build log filter")?,
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(cli.verbose, &config.logging.level)?;

    cli::run(cli, config).await?;
    Ok(())
}
