//! Cached Request Library
//!
//! HTTP requests backed by a file-based response cache, plus a Google Analytics
//! measurement protocol sender and a lazily opened database connection.

pub mod analytics;
pub mod cache;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod request;

pub use cache::CacheManager;
pub use error::{Error, Result};
pub use request::{CachedRequest, HttpMethod, HttpTransport, RequestFields, RequestResult};
