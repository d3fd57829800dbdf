//! Connection options shared by every subcommand
//!
//! Flags layer on top of `ClientConfig::from_env`, so unset flags keep the
//! environment values.

use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;
use scaffold_api_client::{ApiClient, ApiRequest, ClientConfig};
use std::time::Duration;

/// Options controlling how requests are sent
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Base URL that relative paths are resolved against
    #[arg(long, global = true, env = "API_BASE_URL")]
    pub base_url: Option<String>,

    /// Bearer token sent with every request
    #[arg(long, global = true, env = "API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Extra request header (NAME:VALUE), repeatable
    #[arg(short = 'H', long = "header", global = true, value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Per-request timeout in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Retries after the first attempt
    #[arg(long, global = true)]
    pub retries: Option<u32>,

    /// Disable retries entirely
    #[arg(long, global = true)]
    pub no_retry: bool,
}

impl ConnectionArgs {
    /// Build a client from the environment and these flags
    pub fn client(&self) -> Result<ApiClient> {
        let mut config = ClientConfig::from_env();

        if let Some(url) = &self.base_url {
            config = config.with_base_url(url.trim_end_matches('/'));
        }
        if let Some(token) = &self.token {
            config = config.with_auth_token(token.clone());
        }
        if let Some(retries) = self.retries {
            config.retry.max_retries = retries;
        }

        let client = ApiClient::with_config(config).context("Invalid client configuration")?;

        client.on_auth_expired(|event| {
            eprintln!(
                "{} Session expired while calling {} {}. Log in again and retry.",
                "⚠".yellow(),
                event.method,
                event.url
            );
        });

        tracing::debug!(base_url = %client.base_url(), "Client ready");

        Ok(client)
    }

    /// Apply per-request flags to a request
    pub fn apply(&self, mut request: ApiRequest) -> Result<ApiRequest> {
        for (name, value) in &self.headers {
            request = request
                .header(name, value)
                .with_context(|| format!("Invalid header {name}"))?;
        }
        if let Some(ms) = self.timeout_ms {
            request = request.timeout(Duration::from_millis(ms));
        }
        if self.no_retry {
            request = request.no_retry();
        }
        Ok(request)
    }
}

/// Parse `NAME:VALUE`
pub fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing header name in '{raw}'"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Parse `NAME=VALUE`
pub fn parse_form_field(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    if name.is_empty() {
        return Err(format!("missing field name in '{raw}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("X-Tenant: acme").unwrap(),
            ("X-Tenant".to_string(), "acme".to_string())
        );
        assert_eq!(
            parse_header("Accept:application/json; q=1").unwrap().1,
            "application/json; q=1"
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn test_parse_form_field() {
        assert_eq!(
            parse_form_field("title=a=b").unwrap(),
            ("title".to_string(), "a=b".to_string())
        );
        assert!(parse_form_field("title").is_err());
        assert!(parse_form_field("=x").is_err());
    }

    #[test]
    fn test_apply_rejects_illegal_header_name() {
        let args = ConnectionArgs {
            headers: vec![("bad header".to_string(), "x".to_string())],
            ..ConnectionArgs::default()
        };
        assert!(args.apply(ApiRequest::get("/x")).is_err());
    }

    #[test]
    fn test_flags_override_environment() {
        let args = ConnectionArgs {
            base_url: Some("https://api.example.com/".to_string()),
            token: Some("abc".to_string()),
            retries: Some(1),
            ..ConnectionArgs::default()
        };
        let client = args.client().unwrap();
        assert_eq!(client.base_url(), "https://api.example.com");
        assert_eq!(client.auth_token().as_deref(), Some("abc"));
        assert_eq!(client.config().retry.max_retries, 1);
    }

    #[test]
    fn test_invalid_base_url_is_reported() {
        let args = ConnectionArgs {
            base_url: Some("ftp://example.com".to_string()),
            ..ConnectionArgs::default()
        };
        assert!(args.client().is_err());
    }
}
