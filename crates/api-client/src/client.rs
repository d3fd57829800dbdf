//! Main API client implementation

use crate::auth::{AuthExpired, AuthObservers};
use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult, ConfigError, GENERIC_FAILURE_STATUS};
use crate::request::{parse_header, ApiRequest, MultipartForm, RequestBody};
use crate::retry::{
    parse_retry_after, Failure, JitterSource, Outcome, RandomJitter, RetryPlan, RetryReason,
    RetryState, Sleeper, TokioSleeper,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn, Span};
use uuid::Uuid;

/// User agent sent with every request
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Request correlation ID header
fn request_id_header() -> HeaderName {
    HeaderName::from_static("x-request-id")
}

/// Mutable configuration shared by every clone of a client
#[derive(Debug, Default)]
struct SharedState {
    headers: HeaderMap,
    auth_token: Option<String>,
}

/// HTTP client with retry, backoff, rate-limit cooperation and timeouts
///
/// Cloning is cheap and clones share the same headers, token and
/// auth-expired observers.
#[derive(Clone)]
pub struct ApiClient {
    inner: Client,
    config: Arc<ClientConfig>,
    state: Arc<RwLock<SharedState>>,
    observers: AuthObservers,
    jitter: Arc<dyn JitterSource>,
    sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.base_url)
            .field("observers", &self.observers)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a new client with configuration from the environment
    pub fn new() -> Result<Self, ConfigError> {
        Self::with_config(ClientConfig::from_env())
    }

    /// Create a new client with specific configuration
    pub fn with_config(config: ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let inner = Client::builder().user_agent(USER_AGENT).build()?;

        let state = SharedState {
            headers: config.header_map()?,
            auth_token: config.auth_token.clone(),
        };

        Ok(Self {
            inner,
            config: Arc::new(config),
            state: Arc::new(RwLock::new(state)),
            observers: AuthObservers::default(),
            jitter: Arc::new(RandomJitter),
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Replace the source of backoff jitter
    #[must_use]
    pub fn with_jitter(mut self, jitter: impl JitterSource + 'static) -> Self {
        self.jitter = Arc::new(jitter);
        self
    }

    /// Replace how the client waits between attempts
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Get the current configuration
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get the base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    // -------------------------------------------------------------------------
    // Shared configuration
    // -------------------------------------------------------------------------

    /// Set or clear the bearer token used by subsequent requests
    pub fn set_auth_token(&self, token: Option<String>) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .auth_token = token;
    }

    /// The bearer token currently in use
    #[must_use]
    pub fn auth_token(&self) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .auth_token
            .clone()
    }

    /// Set a header sent with every subsequent request
    pub fn set_header(&self, name: &str, value: &str) -> Result<(), ConfigError> {
        let (name, value) = parse_header(name, value)?;
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .headers
            .insert(name, value);
        Ok(())
    }

    /// Stop sending a default header
    pub fn remove_header(&self, name: &str) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .headers
            .remove(name);
    }

    /// Snapshot of the default headers
    #[must_use]
    pub fn headers(&self) -> HeaderMap {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .headers
            .clone()
    }

    /// Register an observer told about every 401 response
    pub fn on_auth_expired<F>(&self, handler: F)
    where
        F: Fn(&AuthExpired) + Send + Sync + 'static,
    {
        self.observers.register(handler);
    }

    /// Resolve a path against the base URL; absolute URLs are kept verbatim
    #[must_use]
    pub fn resolve_url(&self, path: &str) -> String {
        if has_scheme(path) {
            return path.to_string();
        }

        let base = &self.config.base_url;
        match path.strip_prefix('/') {
            Some(rest) if base.ends_with('/') => format!("{base}{rest}"),
            _ => format!("{base}{path}"),
        }
    }

    // -------------------------------------------------------------------------
    // HTTP methods with resilience
    // -------------------------------------------------------------------------

    /// Perform a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        self.send(ApiRequest::get(path)).await
    }

    /// Perform a POST request with a JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        self.send(ApiRequest::post(path).json(body).map_err(ApiError::encode)?)
            .await
    }

    /// Perform a PUT request with a JSON body
    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        self.send(ApiRequest::put(path).json(body).map_err(ApiError::encode)?)
            .await
    }

    /// Perform a PATCH request with a JSON body
    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        self.send(ApiRequest::patch(path).json(body).map_err(ApiError::encode)?)
            .await
    }

    /// Perform a DELETE request
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        self.send(ApiRequest::delete(path)).await
    }

    /// POST a multipart form
    pub async fn upload<T: DeserializeOwned>(&self, path: &str, form: MultipartForm) -> ApiResult<T> {
        self.send(ApiRequest::post(path).multipart(form)).await
    }

    /// Execute a request with full resilience patterns
    #[instrument(
        skip_all,
        fields(method = %request.method(), path = %request.path(), request_id = tracing::field::Empty)
    )]
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> ApiResult<T> {
        let request_id = Uuid::new_v4().to_string();
        Span::current().record("request_id", request_id.as_str());

        let url = self.resolve_url(request.path());
        let target = Url::parse(&url).map_err(|e| ApiError::invalid_url(&url, e))?;

        let timeout = self.effective_timeout(&request);
        let plan = RetryPlan {
            policy: &self.config.retry,
            max_retries: request.max_retries.unwrap_or(self.config.retry.max_retries),
            enabled: !request.skip_retry,
        };

        let mut state = RetryState::start();
        while let RetryState::Attempting { attempt } = state {
            let start = Instant::now();
            let result = self.attempt(&request, &target, &request_id, timeout).await?;

            state = state.observe(result.outcome(), &plan, self.jitter.as_ref());
            match state {
                RetryState::Succeeded => {
                    debug!(
                        request_id = %request_id,
                        attempt = attempt + 1,
                        elapsed_ms = start.elapsed().as_millis(),
                        "Request succeeded"
                    );
                    return result.decode_success();
                }
                RetryState::Failed(failure) => {
                    debug!(
                        request_id = %request_id,
                        attempt = attempt + 1,
                        failure = ?failure,
                        "Request failed, not retrying"
                    );
                    return Err(self.failure_error(failure, result, &request, &url, &request_id));
                }
                RetryState::Waiting { delay, reason, .. } => {
                    log_retry(&url, &request_id, attempt, delay, reason, &result);
                    self.sleeper.sleep(delay).await;
                    state = state.resume();
                }
                RetryState::Attempting { .. } => {}
            }
        }

        Err(ApiError::new("Request failed", GENERIC_FAILURE_STATUS))
    }

    /// Per-request timeout, falling back to the upload timeout for multipart bodies
    fn effective_timeout(&self, request: &ApiRequest) -> Duration {
        request.timeout.unwrap_or(if request.is_multipart() {
            self.config.upload_timeout
        } else {
            self.config.timeout
        })
    }

    /// Merge defaults, bearer token and per-request overrides
    fn request_headers(&self, request: &ApiRequest, request_id: &str) -> HeaderMap {
        let mut headers = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            let mut headers = state.headers.clone();

            if let (false, Some(token)) = (request.skip_auth, state.auth_token.as_deref()) {
                match HeaderValue::from_str(&format!("Bearer {token}")) {
                    Ok(value) => {
                        headers.insert(AUTHORIZATION, value);
                    }
                    Err(_) => warn!(request_id = %request_id, "Auth token is not a valid header value"),
                }
            }
            headers
        };

        for (name, value) in &request.headers {
            headers.insert(name.clone(), value.clone());
        }

        if request.is_multipart() {
            headers.remove(CONTENT_TYPE);
        }

        if let Ok(value) = HeaderValue::from_str(request_id) {
            headers.insert(request_id_header(), value);
        }

        headers
    }

    /// Execute a single attempt under its deadline
    ///
    /// A multipart body that cannot be encoded fails before anything is sent.
    async fn attempt(
        &self,
        request: &ApiRequest,
        url: &Url,
        request_id: &str,
        timeout: Duration,
    ) -> ApiResult<AttemptResult> {
        let mut builder = self
            .inner
            .request(request.method().clone(), url.clone())
            .headers(self.request_headers(request, request_id));

        match request.body() {
            Some(RequestBody::Json(value)) => builder = builder.json(value),
            Some(RequestBody::Multipart(form)) => match form.to_form() {
                Ok(form) => builder = builder.multipart(form),
                Err(e) => return Err(ApiError::new("Invalid multipart body", 400).with_source(e)),
            },
            None => {}
        }

        let exchange = async move {
            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>(RawResponse {
                status,
                headers,
                body: body.to_vec(),
            })
        };

        // The timer lives only as long as this future, whichever way it ends
        Ok(match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(response)) => AttemptResult::Response(response),
            Ok(Err(e)) if e.is_timeout() => AttemptResult::TimedOut,
            Ok(Err(e)) => AttemptResult::Transport(e),
            Err(_) => AttemptResult::TimedOut,
        })
    }

    /// Turn a terminal failure into the error handed to the caller
    fn failure_error(
        &self,
        failure: Failure,
        result: AttemptResult,
        request: &ApiRequest,
        url: &str,
        request_id: &str,
    ) -> ApiError {
        match (failure, result) {
            (Failure::Unauthorized, _) => {
                self.observers.notify(&AuthExpired {
                    method: request.method().to_string(),
                    url: url.to_string(),
                    request_id: request_id.to_string(),
                });
                ApiError::unauthorized()
            }
            (Failure::TimedOut, _) => ApiError::timeout(),
            (Failure::Status(_), AttemptResult::Response(response)) => response.into_error(),
            (Failure::Transport, AttemptResult::Transport(e)) => ApiError::transport(e),
            (Failure::Status(status), _) => ApiError::new(format!("HTTP {status}"), status),
            (Failure::Transport, _) => ApiError::new("Request failed", GENERIC_FAILURE_STATUS),
        }
    }
}

/// Result of one attempt
enum AttemptResult {
    Response(RawResponse),
    TimedOut,
    Transport(reqwest::Error),
}

impl AttemptResult {
    fn outcome(&self) -> Outcome {
        match self {
            Self::Response(response) => Outcome::Response {
                status: response.status.as_u16(),
                retry_after: response.retry_after(),
            },
            Self::TimedOut => Outcome::TimedOut,
            Self::Transport(_) => Outcome::TransportFailed,
        }
    }

    fn decode_success<T: DeserializeOwned>(self) -> ApiResult<T> {
        match self {
            Self::Response(response) => response.decode(),
            Self::TimedOut => Err(ApiError::timeout()),
            Self::Transport(e) => Err(ApiError::transport(e)),
        }
    }
}

/// A fully read response
struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl RawResponse {
    fn retry_after(&self) -> Option<Duration> {
        if self.status != StatusCode::TOO_MANY_REQUESTS {
            return None;
        }
        self.headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after)
    }

    fn is_json(&self) -> bool {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| {
                let ct = ct.to_ascii_lowercase();
                ct.contains("application/json") || ct.contains("+json")
            })
    }

    fn has_body(&self) -> bool {
        !self.body.iter().all(u8::is_ascii_whitespace)
    }

    /// Decode a 2xx body
    ///
    /// Non-JSON and empty responses decode from `{}`, or from `null` for
    /// types such as `()` and `Option<_>` that cannot be built from an object.
    fn decode<T: DeserializeOwned>(self) -> ApiResult<T> {
        if self.is_json() && self.has_body() {
            return serde_json::from_slice(&self.body).map_err(ApiError::decode);
        }
        serde_json::from_value(Value::Object(Map::new()))
            .or_else(|_| serde_json::from_value(Value::Null))
            .map_err(ApiError::decode)
    }

    /// Error for a non-2xx response, decoding the body on a best-effort basis
    fn into_error(self) -> ApiError {
        let body = serde_json::from_slice::<Value>(&self.body)
            .unwrap_or_else(|_| Value::Object(Map::new()));
        ApiError::from_response(self.status.as_u16(), &body)
    }
}

fn log_retry(
    url: &str,
    request_id: &str,
    attempt: u32,
    delay: Duration,
    reason: RetryReason,
    result: &AttemptResult,
) {
    let delay_ms = delay.as_millis();
    match (reason, result) {
        (RetryReason::RateLimited, _) => warn!(
            url = %url,
            request_id = %request_id,
            attempt = attempt + 1,
            delay_ms = delay_ms,
            status = 429,
            "Rate limited, waiting before retry"
        ),
        (RetryReason::Status(status), _) => warn!(
            url = %url,
            request_id = %request_id,
            attempt = attempt + 1,
            delay_ms = delay_ms,
            status = status,
            "Request failed, retrying"
        ),
        (RetryReason::Transport, AttemptResult::Transport(e)) => warn!(
            url = %url,
            request_id = %request_id,
            attempt = attempt + 1,
            delay_ms = delay_ms,
            error = %e,
            "Request error, retrying"
        ),
        (RetryReason::Transport, _) => warn!(
            url = %url,
            request_id = %request_id,
            attempt = attempt + 1,
            delay_ms = delay_ms,
            "Request error, retrying"
        ),
    }
}

/// Whether `path` starts with `scheme://`
fn has_scheme(path: &str) -> bool {
    path.split_once("://").is_some_and(|(scheme, _)| {
        let mut chars = scheme.chars();
        chars.next().is_some_and(|c| c.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    })
}
