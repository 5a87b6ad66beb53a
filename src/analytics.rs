//! Google Analytics measurement protocol client
//!
//! Validates a hit payload against the parameters the measurement protocol
//! accepts, then posts it to the collect endpoint. Validation happens entirely
//! before any network call.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::request::{HttpMethod, HttpTransport, RequestFields, Transport, TransportError};

/// Default measurement protocol endpoint
pub const DEFAULT_ENDPOINT: &str = "http://www.google-analytics.com/collect";

/// Measurement protocol version sent as `v`
pub const PROTOCOL_VERSION: u32 = 1;

/// Parameters accepted in a payload
const VALID_KEYS: &[&str] = &[
    "aip", "qt", "z", "cid", "sc", "dr", "cn", "cs", "cm", "ck", "cc", "ci", "gclid", "dclid",
    "sr", "vp", "de", "sd", "ul", "je", "fl", "t", "ni", "dl", "dh", "dp", "dt", "cd", "linkid",
    "an", "av", "ec", "ea", "el", "ev", "ti", "ta", "tr", "ts", "tt", "in", "ip", "iq", "ic",
    "iv", "cu", "sn", "sa", "st", "utc", "utv", "utt", "utl", "plt", "dns", "pdt", "rrt", "tcp",
    "srt", "exd", "exf",
];

/// Parameters that must be the integer 0 or 1
const BOOLEAN_KEYS: &[&str] = &["exf", "ni", "je", "aip"];

/// Parameters that must be integers
const INTEGER_KEYS: &[&str] = &[
    "dns", "ev", "iq", "pdt", "plt", "qt", "rrt", "srt", "tcp", "utt",
];

/// Accepted values of the hit type `t`
const HIT_TYPES: &[&str] = &[
    "pageview",
    "appview",
    "event",
    "transaction",
    "item",
    "social",
    "exception",
    "timing",
];

/// Reasons a payload is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing the required parameter trackingId")]
    MissingTrackingId,

    #[error("The following parameter is invalid: {0}")]
    InvalidKey(String),

    #[error("The following parameter must be a boolean integer either 0 or 1: {0}")]
    NotBooleanInteger(String),

    #[error("The following parameter must be an integer: {0}")]
    NotInteger(String),

    #[error("The following parameter is required: {0}")]
    MissingRequired(String),

    #[error("The hit type (t) must be a valid value, got '{0}'")]
    InvalidHitType(String),

    #[error("The following parameter is required for {hit_type} based hit types: {key}")]
    MissingForHitType { hit_type: String, key: String },
}

/// Errors that can occur when sending a payload
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("Invalid analytics payload: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to send analytics payload: {0}")]
    Transport(#[from] TransportError),
}

/// A scalar payload value
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for PayloadValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadValue::Integer(value) => write!(f, "{}", value),
            PayloadValue::Float(value) => write!(f, "{}", value),
            PayloadValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for PayloadValue {
    fn from(value: i64) -> Self {
        PayloadValue::Integer(value)
    }
}

impl From<f64> for PayloadValue {
    fn from(value: f64) -> Self {
        PayloadValue::Float(value)
    }
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        PayloadValue::Text(value.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(value: String) -> Self {
        PayloadValue::Text(value)
    }
}

/// A hit payload, keeping parameters in insertion order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    entries: Vec<(String, PayloadValue)>,
}

impl Payload {
    /// Creates an empty payload
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a parameter, replacing an existing value in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PayloadValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder form of [`Payload::insert`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Value of a parameter, if set
    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Whether a parameter is set
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Parameters in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PayloadValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no parameters are set
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<PayloadValue>> FromIterator<(K, V)> for Payload {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut payload = Payload::new();
        for (key, value) in iter {
            payload.insert(key, value);
        }
        payload
    }
}

// Deserialized by hand so the order of the JSON object is preserved
impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PayloadVisitor;

        impl<'de> Visitor<'de> for PayloadVisitor {
            type Value = Payload;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of parameter names to scalar values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Payload, A::Error> {
                let mut payload = Payload::new();
                while let Some((key, value)) = map.next_entry::<String, PayloadValue>()? {
                    payload.insert(key, value);
                }
                Ok(payload)
            }
        }

        deserializer.deserialize_map(PayloadVisitor)
    }
}

/// Checks a payload against the measurement protocol rules
///
/// Keys are checked in payload order, then the required `cid` and `t`, then the
/// parameters each hit type needs. The first violation is returned.
pub fn validate_payload(payload: &Payload) -> Result<(), ValidationError> {
    for (key, value) in payload.iter() {
        if !VALID_KEYS.contains(&key) {
            return Err(ValidationError::InvalidKey(key.to_string()));
        }
        if BOOLEAN_KEYS.contains(&key) && !matches!(value, PayloadValue::Integer(0 | 1)) {
            return Err(ValidationError::NotBooleanInteger(key.to_string()));
        }
        if INTEGER_KEYS.contains(&key) && !matches!(value, PayloadValue::Integer(_)) {
            return Err(ValidationError::NotInteger(key.to_string()));
        }
    }

    if !payload.contains_key("cid") {
        return Err(ValidationError::MissingRequired("cid".to_string()));
    }
    let hit_type = payload
        .get("t")
        .ok_or_else(|| ValidationError::MissingRequired("t".to_string()))?
        .to_string();
    if !HIT_TYPES.contains(&hit_type.as_str()) {
        return Err(ValidationError::InvalidHitType(hit_type));
    }

    let required: &[&str] = match hit_type.as_str() {
        "transaction" => &["ti"],
        "item" => &["ti", "in"],
        "social" => &["sn", "sa", "st"],
        _ => &[],
    };
    if let Some(missing) = required.iter().find(|key| !payload.contains_key(key)) {
        return Err(ValidationError::MissingForHitType {
            hit_type,
            key: missing.to_string(),
        });
    }

    Ok(())
}

/// Client for sending hits to Google Analytics
#[derive(Debug)]
pub struct AnalyticsClient<T = HttpTransport> {
    tracking_id: String,
    endpoint: String,
    transport: T,
}

impl AnalyticsClient<HttpTransport> {
    /// Creates a client for the given tracking id using a default transport
    pub fn new(tracking_id: impl Into<String>) -> Result<Self, AnalyticsError> {
        Self::with_transport(tracking_id, HttpTransport::new()?)
    }
}

impl<T: Transport> AnalyticsClient<T> {
    /// Creates a client with a custom transport
    pub fn with_transport(
        tracking_id: impl Into<String>,
        transport: T,
    ) -> Result<Self, AnalyticsError> {
        let tracking_id = tracking_id.into();
        if tracking_id.trim().is_empty() {
            return Err(ValidationError::MissingTrackingId.into());
        }
        Ok(Self {
            tracking_id,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            transport,
        })
    }

    /// Sends hits to a different collect endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn tracking_id(&self) -> &str {
        &self.tracking_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Builds the form body for a payload
    ///
    /// Appends the protocol version and tracking id, form-encodes each value and
    /// joins the pairs with `&`.
    pub fn encode(&self, payload: &Payload) -> String {
        let version = PROTOCOL_VERSION.to_string();
        payload
            .iter()
            .map(|(key, value)| (key, value.to_string()))
            .chain([("v", version), ("tid", self.tracking_id.clone())])
            .map(|(key, value)| {
                let encoded: String =
                    url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
                format!("{}={}", key, encoded)
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Validates and sends a payload
    ///
    /// # Returns
    /// * `Ok(true)` if the endpoint answered with HTTP 200
    /// * `Ok(false)` for any other status
    /// * `Err` if validation or the request fails
    pub async fn save(&mut self, payload: &Payload) -> Result<bool, AnalyticsError> {
        validate_payload(payload)?;

        let body = RequestFields::Encoded(self.encode(payload));
        debug!("Sending analytics hit to {}", self.endpoint);
        let response = self
            .transport
            .fetch(&self.endpoint, &HttpMethod::Post, &body)
            .await?;

        if response.status != 200 {
            warn!("Analytics endpoint answered with status {}", response.status);
        }
        Ok(response.status == 200)
    }
}
