//! Configuration for the API client
//!
//! Supports environment-based configuration with sensible defaults.

use crate::error::ConfigError;
use crate::request::parse_header;
use crate::retry::RetryPolicy;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

/// Base URL used when nothing is configured
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Default timeout for multipart uploads
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL that relative request paths are appended to
    pub base_url: String,
    /// Timeout for ordinary requests
    #[serde(with = "millis")]
    pub timeout: Duration,
    /// Timeout for multipart uploads
    #[serde(with = "millis")]
    pub upload_timeout: Duration,
    /// Retry configuration
    pub retry: RetryPolicy,
    /// Bearer token the client starts with
    pub auth_token: Option<String>,
    /// Headers sent with every request
    pub default_headers: BTreeMap<String, String>,
}

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        let mut default_headers = BTreeMap::new();
        default_headers.insert("Content-Type".to_string(), "application/json".to_string());

        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            retry: RetryPolicy::default(),
            auth_token: None,
            default_headers,
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables
    ///
    /// Reads the following environment variables:
    /// - `API_BASE_URL` or `APP_URL`: Base URL for relative paths
    /// - `API_TIMEOUT_MS`: Request timeout in milliseconds
    /// - `API_UPLOAD_TIMEOUT_MS`: Upload timeout in milliseconds
    /// - `API_MAX_RETRIES`: Retries after the first attempt
    /// - `API_TOKEN`: Initial bearer token
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source
    ///
    /// Unset or unparseable numeric values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let ms_var = |key: &str| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        let base_url = lookup("API_BASE_URL")
            .or_else(|| lookup("APP_URL"))
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(defaults.base_url);

        let mut retry = defaults.retry;
        if let Some(retries) = lookup("API_MAX_RETRIES").and_then(|s| s.trim().parse().ok()) {
            retry.max_retries = retries;
        }

        Self {
            base_url,
            timeout: ms_var("API_TIMEOUT_MS").unwrap_or(defaults.timeout),
            upload_timeout: ms_var("API_UPLOAD_TIMEOUT_MS").unwrap_or(defaults.upload_timeout),
            retry,
            auth_token: lookup("API_TOKEN").filter(|t| !t.is_empty()),
            default_headers: defaults.default_headers,
        }
    }

    /// Builder-style method to set base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Builder-style method to set timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builder-style method to set the upload timeout
    #[must_use]
    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    /// Builder-style method to set retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builder-style method to set the initial bearer token
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Builder-style method to add a default header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.is_empty() {
            return Err(ConfigError::invalid("base_url cannot be empty"));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::invalid(
                "base_url must start with http:// or https://",
            ));
        }

        if self.timeout.is_zero() || self.upload_timeout.is_zero() {
            return Err(ConfigError::invalid("timeout cannot be zero"));
        }

        self.header_map().map(|_| ())
    }

    /// Default headers as a validated header map
    pub(crate) fn header_map(&self) -> Result<HeaderMap, ConfigError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.default_headers {
            let (name, value) = parse_header(name, value)?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}
