//! Command-line interface for cached-request
//!
//! This module handles parsing of CLI arguments using clap and runs the
//! selected command against the library.

use clap::{Args, Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::analytics::{AnalyticsClient, Payload};
use crate::config::Config;
use crate::database::DatabaseConnector;
use crate::error::Result;
use crate::request::{CachedRequest, HttpMethod, RequestFields};

/// Error types for CLI argument handling
#[derive(Debug, Error)]
pub enum CliError {
    /// A field argument is not of the form KEY=VALUE
    #[error("Invalid field: '{0}'. Expected KEY=VALUE")]
    InvalidField(String),

    /// A duration argument could not be parsed
    #[error("Invalid duration: '{0}'. Examples: 30s, 15m, 1h")]
    InvalidDuration(String),

    /// The analytics payload is not a JSON object of scalars
    #[error("Invalid analytics payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// No tracking id on the command line or in the config
    #[error("No tracking id given. Use --tracking-id or set [analytics] tracking_id in the config")]
    MissingTrackingId,

    /// No database settings in the config
    #[error("No [database] section in the config")]
    MissingDatabaseSettings,

    /// Writing the output failed
    #[error("Failed to write output: {0}")]
    Output(#[from] io::Error),
}

/// Fetch HTTP resources through a file-based response cache
#[derive(Parser, Debug)]
#[command(name = "cached-request")]
#[command(about = "HTTP requests backed by a file-based response cache")]
#[command(version)]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Cache directory (overrides the config)
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Increase log verbosity (-v for info, -vv for debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch a URL, serving it from the cache while fresh
    Fetch(FetchArgs),

    /// Inspect or clear the response cache
    #[command(subcommand)]
    Cache(CacheCommand),

    /// Send hits to Google Analytics
    #[command(subcommand)]
    Analytics(AnalyticsCommand),

    /// Database helpers
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// URL to fetch
    pub url: String,

    /// Cache reference (defaults to the URL)
    #[arg(short, long)]
    pub reference: Option<String>,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET", value_parser = parse_method)]
    pub method: HttpMethod,

    /// Request field as KEY=VALUE (repeatable)
    #[arg(short, long = "field", value_name = "KEY=VALUE", value_parser = parse_field)]
    pub fields: Vec<(String, String)>,

    /// Pre-encoded request body, used instead of --field
    #[arg(short, long, conflicts_with = "fields")]
    pub data: Option<String>,

    /// Freshness window for this request (overrides the config)
    #[arg(long, value_parser = parse_duration)]
    pub ttl: Option<Duration>,

    /// Print status code and effective URL to stderr
    #[arg(short, long)]
    pub include: bool,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Print the cache file path for a reference
    Path { reference: String },
    /// Show whether a reference is cached and fresh
    Status {
        reference: String,
        /// Freshness window (overrides the config)
        #[arg(long, value_parser = parse_duration)]
        ttl: Option<Duration>,
    },
    /// Delete the cache entry for a reference
    Delete { reference: String },
    /// Delete every cache entry
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum AnalyticsCommand {
    /// Validate and send a payload given as a JSON object
    Send {
        /// Payload, e.g. '{"cid": "555", "t": "pageview", "dp": "/home"}'
        payload: String,
        /// Tracking id (overrides the config)
        #[arg(long)]
        tracking_id: Option<String>,
        /// Collect endpoint (overrides the config)
        #[arg(long)]
        endpoint: Option<String>,
        /// Only validate, do not send
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum DbCommand {
    /// Connect to the configured database and report the result
    Check,
}

/// Parses a `KEY=VALUE` argument, splitting on the first `=`
pub fn parse_field(s: &str) -> std::result::Result<(String, String), CliError> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(CliError::InvalidField(s.to_string())),
    }
}

/// Parses a human-readable duration such as `90s` or `1h`
pub fn parse_duration(s: &str) -> std::result::Result<Duration, CliError> {
    humantime::parse_duration(s)
        .map_err(|_| CliError::InvalidDuration(s.to_string()))
}

fn parse_method(s: &str) -> std::result::Result<HttpMethod, String> {
    s.parse().map_err(|e: crate::request::TransportError| e.to_string())
}

/// Runs the parsed command
pub async fn run(cli: Cli, mut config: Config) -> Result<()> {
    if let Some(dir) = cli.cache_dir {
        config.cache.directory = Some(dir);
    }

    match cli.command {
        Command::Fetch(args) => handle_fetch(args, &config).await,
        Command::Cache(command) => handle_cache(command, &config),
        Command::Analytics(command) => handle_analytics(command, &config).await,
        Command::Db(command) => handle_db(command, &config).await,
    }
}

async fn handle_fetch(args: FetchArgs, config: &Config) -> Result<()> {
    let cache = config.cache_manager()?;
    let mut request = CachedRequest::with_transport(cache, config.transport()?)
        .with_ttl(args.ttl.unwrap_or(config.cache.ttl));

    let fields = match args.data {
        Some(data) => RequestFields::Encoded(data),
        None => RequestFields::Pairs(args.fields),
    };
    let reference = args.reference.as_deref().unwrap_or(&args.url);

    let result = request
        .request(&args.method, &args.url, &fields, reference)
        .await?;
    debug!("Served '{}' from {:?}", reference, result.source);

    if args.include {
        let status = result
            .status
            .map_or_else(|| "-".to_string(), |status| status.to_string());
        eprintln!("status: {}", status);
        eprintln!("url: {}", result.effective_url.as_deref().unwrap_or("-"));
        eprintln!("source: {:?}", result.source);
    }

    let mut stdout = io::stdout().lock();
    stdout.write_all(&result.body).map_err(CliError::from)?;
    stdout.flush().map_err(CliError::from)?;
    Ok(())
}

fn handle_cache(command: CacheCommand, config: &Config) -> Result<()> {
    let cache = config.cache_manager()?;

    match command {
        CacheCommand::Path { reference } => {
            println!("{}", cache.path_for(&reference)?.display());
        }
        CacheCommand::Status { reference, ttl } => {
            let ttl = ttl.unwrap_or(config.cache.ttl);
            match cache.entry_info(&reference)? {
                Some(info) => {
                    let state = if info.is_fresh(ttl) { "fresh" } else { "stale" };
                    println!("{}", state);
                    println!("path: {}", info.path.display());
                    println!("size: {} bytes", info.size);
                    println!("written: {}", info.written_at.to_rfc3339());
                    println!("age: {}s", info.age.as_secs());
                }
                None => println!("missing"),
            }
        }
        CacheCommand::Delete { reference } => {
            let path = cache.path_for(&reference)?;
            cache.delete_by_reference(&reference)?;
            println!("Deleted {}", path.display());
        }
        CacheCommand::Clear => {
            let removed = cache.clear_all()?;
            println!("Removed {} cache files from {}", removed, cache.cache_dir().display());
        }
    }
    Ok(())
}

async fn handle_analytics(command: AnalyticsCommand, config: &Config) -> Result<()> {
    match command {
        AnalyticsCommand::Send {
            payload,
            tracking_id,
            endpoint,
            dry_run,
        } => {
            let payload: Payload = serde_json::from_str(&payload).map_err(CliError::from)?;
            let tracking_id = tracking_id
                .or_else(|| config.analytics.as_ref().map(|a| a.tracking_id.clone()))
                .ok_or(CliError::MissingTrackingId)?;
            let endpoint =
                endpoint.or_else(|| config.analytics.as_ref().map(|a| a.endpoint.clone()));

            let mut client = AnalyticsClient::with_transport(tracking_id, config.transport()?)?;
            if let Some(endpoint) = endpoint {
                client = client.with_endpoint(endpoint);
            }

            if dry_run {
                crate::analytics::validate_payload(&payload)?;
                println!("{}", client.encode(&payload));
                return Ok(());
            }

            if client.save(&payload).await? {
                println!("Sent");
            } else {
                println!("Rejected by {}", client.endpoint());
            }
        }
    }
    Ok(())
}

async fn handle_db(command: DbCommand, config: &Config) -> Result<()> {
    match command {
        DbCommand::Check => {
            let settings = config
                .database
                .clone()
                .ok_or(CliError::MissingDatabaseSettings)?;
            let connector = DatabaseConnector::new(settings);
            connector.instance().await?;
            println!(
                "Connected to {} on {}",
                connector.settings().name,
                connector.settings().host
            );
            connector.close().await;
        }
    }
    Ok(())
}
