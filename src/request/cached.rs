//! Cached requests: serve a fresh cache entry or fetch and store a new one

use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::transport::{HttpMethod, HttpTransport, RequestFields, Transport, TransportError};
use crate::cache::{CacheError, CacheManager};

/// How long a cached response stays fresh unless configured otherwise
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Errors that can occur during a cached request
#[derive(Debug, Error)]
pub enum RequestError {
    /// The live fetch failed; nothing was written to the cache
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Reading or writing the cache failed
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Where the body of a [`RequestResult`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Served from a fresh cache entry
    Cache,
    /// Fetched live and written to the cache
    Network,
}

/// Result of a cached request
#[derive(Debug, Clone)]
pub struct RequestResult {
    /// The response body
    pub body: Vec<u8>,
    /// Status code of the most recent live fetch, if any
    pub status: Option<u16>,
    /// Effective URL of the most recent live fetch, if any
    pub effective_url: Option<String>,
    /// Whether the body came from the cache or the network
    pub source: ResponseSource,
}

impl RequestResult {
    /// The body as text, replacing invalid UTF-8 sequences
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Whether the body was served from the cache
    pub fn is_cached(&self) -> bool {
        self.source == ResponseSource::Cache
    }
}

/// Performs requests through a transport, caching bodies by reference
///
/// A request for a reference whose cache entry is younger than the TTL is
/// answered from disk without touching the network. Otherwise the transport is
/// called and the body replaces the cache entry.
///
/// The last status code and effective URL are only updated by live fetches. A
/// cache hit reports whatever the previous fetch left behind, or `None` if this
/// instance has never fetched.
#[derive(Debug)]
pub struct CachedRequest<T = HttpTransport> {
    cache: CacheManager,
    transport: T,
    ttl: Duration,
    last_status: Option<u16>,
    last_effective_url: Option<String>,
}

impl CachedRequest<HttpTransport> {
    /// Creates a cached request backed by a default [`HttpTransport`]
    pub fn new(cache: CacheManager) -> Result<Self, TransportError> {
        Ok(Self::with_transport(cache, HttpTransport::new()?))
    }
}

impl<T: Transport> CachedRequest<T> {
    /// Creates a cached request with a custom transport
    pub fn with_transport(cache: CacheManager, transport: T) -> Self {
        Self {
            cache,
            transport,
            ttl: DEFAULT_CACHE_TTL,
            last_status: None,
            last_effective_url: None,
        }
    }

    /// Sets how long cached responses stay fresh
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Current freshness window
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Changes the freshness window for later requests
    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = ttl;
    }

    /// The underlying cache, e.g. to delete or clear entries
    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// The transport used for live fetches
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Status code of the last live fetch
    pub fn last_status(&self) -> Option<u16> {
        self.last_status
    }

    /// Effective URL of the last live fetch
    pub fn last_effective_url(&self) -> Option<&str> {
        self.last_effective_url.as_deref()
    }

    /// Returns the body for `reference`, from the cache if fresh, else fetched live
    ///
    /// # Arguments
    /// * `method` - HTTP method for a live fetch
    /// * `url` - URL to fetch
    /// * `fields` - Query (GET) or body (POST) fields
    /// * `reference` - Cache identifier for this resource
    ///
    /// # Errors
    /// * `RequestError::Transport` if the live fetch fails; the cache is left untouched
    /// * `RequestError::Cache` if the cache cannot be read or written, or the
    ///   reference has no letters or digits; the transport is not called then
    pub async fn request(
        &mut self,
        method: &HttpMethod,
        url: &str,
        fields: &RequestFields,
        reference: &str,
    ) -> Result<RequestResult, RequestError> {
        if self.cache.is_fresh(reference, self.ttl)? {
            debug!("Cache hit for '{}'", reference);
            let body = self.cache.read(reference)?;
            return Ok(RequestResult {
                body,
                status: self.last_status,
                effective_url: self.last_effective_url.clone(),
                source: ResponseSource::Cache,
            });
        }

        debug!("Cache miss for '{}', fetching {}", reference, url);
        let response = self.transport.fetch(url, method, fields).await?;
        self.cache.write(reference, &response.body)?;

        info!(
            "Fetched {} ({}) into cache entry '{}'",
            response.effective_url, response.status, reference
        );
        self.last_status = Some(response.status);
        self.last_effective_url = Some(response.effective_url);

        Ok(RequestResult {
            body: response.body,
            status: self.last_status,
            effective_url: self.last_effective_url.clone(),
            source: ResponseSource::Network,
        })
    }
}
