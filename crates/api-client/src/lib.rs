//! Resilient HTTP client for the Scaffold web application
//!
//! This crate provides a single HTTP client that every data fetcher and form
//! handler in the application goes through.
//!
//! # Features
//!
//! - **Environment-based configuration**: Base URL, timeouts and retry count from environment variables
//! - **Retry with exponential backoff**: Transient failures (5xx, 408, network errors) are retried with jitter
//! - **Rate-limit cooperation**: 429 responses wait for `Retry-After` before retrying
//! - **Timeouts**: Every attempt runs under a deadline, longer for multipart uploads
//! - **Typed errors**: One [`ApiError`] carrying status, message and field details
//! - **Auth expiry hooks**: Observers are told when the server answers 401
//!
//! # Example
//!
//! ```rust,no_run
//! use scaffold_api_client::{ApiClient, ClientConfig};
//! use serde_json::{json, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ApiClient::with_config(
//!         ClientConfig::default().with_base_url("https://app.example.com"),
//!     )?;
//!
//!     client.set_auth_token(Some("token".to_string()));
//!     client.on_auth_expired(|event| eprintln!("session expired calling {}", event.url));
//!
//!     let user: Value = client.get("/api/users/1").await?;
//!     let created: Value = client.post("/api/users", &json!({ "name": "Bo" })).await?;
//!     println!("{user} {created}");
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod request;
pub mod retry;

pub use auth::AuthExpired;
pub use client::ApiClient;
pub use config::ClientConfig;
pub use error::{ApiError, ApiResult, ConfigError, ErrorDetails, FieldError};
pub use request::{ApiRequest, MultipartForm, RequestBody};
pub use retry::{FixedJitter, JitterSource, RandomJitter, RetryPolicy, Sleeper, TokioSleeper};

/// Re-export commonly used types
pub use reqwest::{header, Method, StatusCode};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::auth::AuthExpired;
    pub use crate::client::ApiClient;
    pub use crate::config::ClientConfig;
    pub use crate::error::{ApiError, ApiResult};
    pub use crate::request::{ApiRequest, MultipartForm};
    pub use crate::retry::RetryPolicy;
}
