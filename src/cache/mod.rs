//! Cache module for storing HTTP responses to disk
//!
//! This module provides a cache manager that persists response bodies to the
//! filesystem, one file per caller-supplied reference. Freshness is derived from
//! the file modification time, so there is no index to keep in sync: every lookup
//! re-stats the filesystem.

mod manager;

pub use manager::{safe_reference, CacheEntryInfo, CacheError, CacheManager};
