//! HTTP requests with an optional on-disk response cache
//!
//! [`HttpTransport`] issues single requests; [`CachedRequest`] puts a
//! [`CacheManager`](crate::cache::CacheManager) in front of any [`Transport`] so a
//! reference is only fetched again once its cache entry has gone stale.

mod cached;
mod transport;

pub use cached::{CachedRequest, RequestError, RequestResult, ResponseSource, DEFAULT_CACHE_TTL};
pub use transport::{
    urlify, FetchedResponse, HttpMethod, HttpTransport, RequestFields, Transport, TransportError,
    DEFAULT_TIMEOUT, DEFAULT_USER_AGENT,
};
