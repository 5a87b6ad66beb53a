//! HTTP transport for single requests
//!
//! Wraps a `reqwest::Client` configured with a fixed timeout, a desktop browser
//! user-agent and redirect following. The transport remembers the status code and
//! effective URL of its last successful request.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use reqwest::{Client, Method};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Request timeout applied when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// User-agent sent with every request unless overridden
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows; U; Windows NT 5.1; en-US; rv:1.8.1.13) Gecko/20080311 Firefox/2.0.0.13";

/// Maximum number of redirects followed before giving up
const MAX_REDIRECTS: usize = 10;

/// Errors that can occur while performing a request
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be completed (DNS, connection, TLS, body read)
    #[error("HTTP request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The request did not complete within the configured timeout
    #[error("HTTP request to {url} timed out after {seconds} seconds")]
    Timeout { url: String, seconds: u64 },

    /// The server answered with an empty body
    #[error("HTTP request to {url} returned an empty body")]
    EmptyBody { url: String },

    /// The method is not a valid HTTP token
    #[error("Invalid HTTP method: '{0}'")]
    InvalidMethod(String),

    /// The underlying HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// HTTP method, normalized to uppercase
///
/// Only GET and POST change how fields are sent. Any other method is sent as a
/// custom verb without fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Other(String),
}

impl HttpMethod {
    /// The uppercase method name
    pub fn as_str(&self) -> &str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Other(method) => method,
        }
    }

    fn to_reqwest(&self) -> Result<Method, TransportError> {
        Method::from_bytes(self.as_str().as_bytes())
            .map_err(|_| TransportError::InvalidMethod(self.as_str().to_string()))
    }
}

impl FromStr for HttpMethod {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            _ => {
                if Method::from_bytes(upper.as_bytes()).is_err() {
                    return Err(TransportError::InvalidMethod(s.to_string()));
                }
                Ok(HttpMethod::Other(upper))
            }
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Joins key/value pairs as `key=value` with `&`, in order
///
/// No URL-encoding is applied: callers pass values that are already safe for a
/// query string or form body.
pub fn urlify<K, V>(fields: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    fields
        .iter()
        .map(|(key, value)| format!("{}={}", key.as_ref(), value.as_ref()))
        .collect::<Vec<_>>()
        .join("&")
}

/// Fields sent with a request
///
/// For GET they become the query string, for POST the request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestFields {
    /// Ordered key/value pairs, joined with [`urlify`]
    Pairs(Vec<(String, String)>),
    /// A string that is already encoded
    Encoded(String),
}

impl Default for RequestFields {
    fn default() -> Self {
        RequestFields::Pairs(Vec::new())
    }
}

impl RequestFields {
    /// Creates an empty set of fields
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a key/value pair
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self {
            RequestFields::Pairs(pairs) => pairs.push((key.into(), value.into())),
            RequestFields::Encoded(encoded) => {
                if !encoded.is_empty() {
                    encoded.push('&');
                }
                encoded.push_str(&key.into());
                encoded.push('=');
                encoded.push_str(&value.into());
            }
        }
        self
    }

    /// The fields in `key=value&...` form
    pub fn encode(&self) -> String {
        match self {
            RequestFields::Pairs(pairs) => urlify(pairs),
            RequestFields::Encoded(encoded) => encoded.clone(),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RequestFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        RequestFields::Pairs(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

impl From<String> for RequestFields {
    fn from(encoded: String) -> Self {
        RequestFields::Encoded(encoded)
    }
}

impl From<&str> for RequestFields {
    fn from(encoded: &str) -> Self {
        RequestFields::Encoded(encoded.to_string())
    }
}

/// The body and metadata of a completed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResponse {
    /// Raw response body
    pub body: Vec<u8>,
    /// Final HTTP status code
    pub status: u16,
    /// URL reached after following redirects
    pub effective_url: String,
}

/// Something that can perform a single HTTP request
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs the request and returns the body with its status and final URL
    async fn fetch(
        &mut self,
        url: &str,
        method: &HttpMethod,
        fields: &RequestFields,
    ) -> Result<FetchedResponse, TransportError>;
}

/// Builds the URL actually requested
///
/// GET appends the fields after a literal `?`, even when there are none.
fn request_url(url: &str, method: &HttpMethod, fields: &RequestFields) -> String {
    match method {
        HttpMethod::Get => format!("{}?{}", url, fields.encode()),
        _ => url.to_string(),
    }
}

/// Client for issuing HTTP requests with reqwest
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
    last_status: Option<u16>,
    last_effective_url: Option<String>,
}

impl HttpTransport {
    /// Creates a transport with the default timeout and user-agent
    pub fn new() -> Result<Self, TransportError> {
        Self::with_settings(DEFAULT_TIMEOUT, DEFAULT_USER_AGENT)
    }

    /// Creates a transport with a custom timeout and user-agent
    pub fn with_settings(timeout: Duration, user_agent: &str) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(TransportError::Client)?;

        Ok(Self {
            client,
            timeout,
            last_status: None,
            last_effective_url: None,
        })
    }

    /// Status code of the last successful request
    pub fn last_status(&self) -> Option<u16> {
        self.last_status
    }

    /// Effective URL of the last successful request
    pub fn last_effective_url(&self) -> Option<&str> {
        self.last_effective_url.as_deref()
    }

    /// The configured request timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn map_error(&self, url: &str, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout {
                url: url.to_string(),
                seconds: self.timeout.as_secs(),
            }
        } else {
            TransportError::Request {
                url: url.to_string(),
                source: error,
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &mut self,
        url: &str,
        method: &HttpMethod,
        fields: &RequestFields,
    ) -> Result<FetchedResponse, TransportError> {
        let target = request_url(url, method, fields);
        debug!("{} {}", method, target);

        let mut builder = self.client.request(method.to_reqwest()?, &target);
        if *method == HttpMethod::Post {
            builder = builder
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(fields.encode());
        }

        let response = builder.send().await.map_err(|e| {
            warn!("Request to {} failed: {}", target, e);
            self.map_error(&target, e)
        })?;

        let status = response.status().as_u16();
        let effective_url = response.url().to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_error(&target, e))?
            .to_vec();

        if body.is_empty() {
            warn!("Empty response body from {}", effective_url);
            return Err(TransportError::EmptyBody { url: effective_url });
        }

        debug!(
            "Received {} bytes with status {} from {}",
            body.len(),
            status,
            effective_url
        );
        self.last_status = Some(status);
        self.last_effective_url = Some(effective_url.clone());

        Ok(FetchedResponse {
            body,
            status,
            effective_url,
        })
    }
}
