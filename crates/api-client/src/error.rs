//! Error types for the API client
//!
//! Every failed request surfaces as a single [`ApiError`] carrying an
//! HTTP-style status code. Callers branch on [`ApiError::status`] rather than
//! on distinct error variants.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Status reported for a request that exceeded its deadline
pub const TIMEOUT_STATUS: u16 = 408;

/// Status reported when the server rejects the credentials
pub const UNAUTHORIZED_STATUS: u16 = 401;

/// Status reported for transport failures and undecodable responses
pub const GENERIC_FAILURE_STATUS: u16 = 500;

/// A single field error: either one message or a list of messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldError {
    /// One message
    Message(String),
    /// Several messages for the same field
    Messages(Vec<String>),
}

impl FieldError {
    /// All messages for this field
    #[must_use]
    pub fn messages(&self) -> Vec<&str> {
        match self {
            Self::Message(msg) => vec![msg.as_str()],
            Self::Messages(msgs) => msgs.iter().map(String::as_str).collect(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.messages().join(", "))
    }
}

/// Structured error details keyed by field name
pub type ErrorDetails = BTreeMap<String, FieldError>;

/// The typed error returned by every failed request
#[derive(Error, Debug)]
#[error("{message} (status {status})")]
pub struct ApiError {
    /// Human-readable message
    pub message: String,
    /// HTTP status, or the status assigned to a transport failure
    pub status: u16,
    /// Field-level details from the error body, if any
    pub details: Option<ErrorDetails>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ApiError {
    /// Create an error with a message and status
    pub fn new(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status,
            details: None,
            source: None,
        }
    }

    /// Attach field details
    #[must_use]
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach the underlying error
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The request did not complete before its deadline
    pub fn timeout() -> Self {
        Self::new("Request timeout", TIMEOUT_STATUS)
    }

    /// The server rejected the request credentials
    pub fn unauthorized() -> Self {
        Self::new("Unauthorized", UNAUTHORIZED_STATUS)
    }

    /// The request could not be delivered
    pub fn transport(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(format!("Request failed: {source}"), GENERIC_FAILURE_STATUS).with_source(source)
    }

    /// A successful response carried a body that could not be decoded
    pub fn decode(source: serde_json::Error) -> Self {
        Self::new(
            format!("Invalid response body: {source}"),
            GENERIC_FAILURE_STATUS,
        )
        .with_source(source)
    }

    /// The request body could not be serialized
    pub fn encode(source: serde_json::Error) -> Self {
        Self::new(format!("Invalid request body: {source}"), 400).with_source(source)
    }

    /// The request URL could not be built
    pub fn invalid_url(url: &str, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(format!("Invalid URL: {url}"), 400).with_source(source)
    }

    /// Build the error for a non-2xx response from its decoded JSON body
    ///
    /// The message is taken from the body's `error` field, then `message`,
    /// falling back to `HTTP <status>`. A body that is not an object yields
    /// just the fallback. Detail entries that are neither a string nor a
    /// list of strings are skipped.
    pub fn from_response(status: u16, body: &Value) -> Self {
        let text_field = |name: &str| {
            body.get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        };

        let message = text_field("error")
            .or_else(|| text_field("message"))
            .unwrap_or_else(|| format!("HTTP {status}"));

        let details = body.get("details").and_then(Value::as_object).map(|fields| {
            fields
                .iter()
                .filter_map(|(field, value)| {
                    FieldError::deserialize(value)
                        .ok()
                        .map(|error| (field.clone(), error))
                })
                .collect::<ErrorDetails>()
        });

        Self {
            message,
            status,
            details,
            source: None,
        }
    }

    /// Messages recorded for a single field
    #[must_use]
    pub fn field_errors(&self, field: &str) -> Vec<&str> {
        self.details
            .as_ref()
            .and_then(|d| d.get(field))
            .map(FieldError::messages)
            .unwrap_or_default()
    }

    /// Check if this is a client error (4xx)
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if this is a server error (5xx)
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Check if the request timed out
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.status == TIMEOUT_STATUS
    }

    /// Check if the credentials were rejected
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status == UNAUTHORIZED_STATUS
    }
}

/// Errors raised while building or reconfiguring a client
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration value is invalid
    #[error("Configuration error: {0}")]
    Invalid(String),

    /// Header name is not a legal HTTP header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(String),

    /// Header value contains characters not allowed in HTTP headers
    #[error("Invalid value for header {0}")]
    InvalidHeaderValue(String),

    /// The underlying HTTP client could not be created
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

impl ConfigError {
    /// Create an invalid-configuration error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}
