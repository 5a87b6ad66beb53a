//! Crate-level error type
//!
//! Each module defines its own error enum; [`Error`] wraps them so callers that
//! combine several modules can use a single `Result`.

use thiserror::Error;

use crate::analytics::{AnalyticsError, ValidationError};
use crate::cache::CacheError;
use crate::cli::CliError;
use crate::config::ConfigError;
use crate::database::ConnectionError;
use crate::request::{RequestError, TransportError};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Analytics(#[from] AnalyticsError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cli(#[from] CliError),
}

pub type Result<T> = std::result::Result<T, Error>;
