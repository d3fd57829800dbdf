//! Request descriptors
//!
//! An [`ApiRequest`] describes one logical call: method, path, optional body
//! and the per-request overrides. It is consumed by
//! [`ApiClient::send`](crate::ApiClient::send).

use crate::error::ConfigError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Body of a request
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// JSON payload, sent with the client's default content type
    Json(Value),
    /// Multipart upload; the transport picks the content type and boundary
    Multipart(MultipartForm),
}

impl RequestBody {
    /// Whether this body is a multipart upload
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        matches!(self, Self::Multipart(_))
    }
}

/// An owned multipart form that can be encoded once per attempt
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    parts: Vec<FormPart>,
}

#[derive(Debug, Clone)]
enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        data: Vec<u8>,
        file_name: Option<String>,
        mime: Option<String>,
    },
}

impl MultipartForm {
    /// Create an empty form
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a text field
    #[must_use]
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(FormPart::Text {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Add a file field
    #[must_use]
    pub fn file(
        mut self,
        name: impl Into<String>,
        data: impl Into<Vec<u8>>,
        file_name: impl Into<String>,
    ) -> Self {
        self.parts.push(FormPart::File {
            name: name.into(),
            data: data.into(),
            file_name: Some(file_name.into()),
            mime: None,
        });
        self
    }

    /// Add a file field with an explicit MIME type
    #[must_use]
    pub fn file_with_mime(
        mut self,
        name: impl Into<String>,
        data: impl Into<Vec<u8>>,
        file_name: impl Into<String>,
        mime: impl Into<String>,
    ) -> Self {
        self.parts.push(FormPart::File {
            name: name.into(),
            data: data.into(),
            file_name: Some(file_name.into()),
            mime: Some(mime.into()),
        });
        self
    }

    /// Number of fields in the form
    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Whether the form has no fields
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Encode into a fresh transport form
    pub(crate) fn to_form(&self) -> Result<Form, reqwest::Error> {
        let mut form = Form::new();
        for part in &self.parts {
            form = match part {
                FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
                FormPart::File {
                    name,
                    data,
                    file_name,
                    mime,
                } => {
                    let mut file = Part::bytes(data.clone());
                    if let Some(file_name) = file_name {
                        file = file.file_name(file_name.clone());
                    }
                    if let Some(mime) = mime {
                        file = file.mime_str(mime)?;
                    }
                    form.part(name.clone(), file)
                }
            };
        }
        Ok(form)
    }
}

/// Description of a single API call
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) body: Option<RequestBody>,
    pub(crate) headers: HeaderMap,
    pub(crate) timeout: Option<Duration>,
    pub(crate) max_retries: Option<u32>,
    pub(crate) skip_retry: bool,
    pub(crate) skip_auth: bool,
}

impl ApiRequest {
    /// Create a request for `path`, absolute or relative to the base URL
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: HeaderMap::new(),
            timeout: None,
            max_retries: None,
            skip_retry: false,
            skip_auth: false,
        }
    }

    /// GET request
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// POST request
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// PUT request
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// PATCH request
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    /// DELETE request
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Serialize `body` as the JSON payload
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, serde_json::Error> {
        self.body = Some(RequestBody::Json(serde_json::to_value(body)?));
        Ok(self)
    }

    /// Use an already-built JSON value as the payload
    #[must_use]
    pub fn json_value(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    /// Send a multipart form
    #[must_use]
    pub fn multipart(mut self, form: MultipartForm) -> Self {
        self.body = Some(RequestBody::Multipart(form));
        self
    }

    /// Override a header for this request only
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, ConfigError> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Override the timeout for this request
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the number of retries for this request
    #[must_use]
    pub fn retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Make a single attempt regardless of the outcome
    #[must_use]
    pub fn no_retry(mut self) -> Self {
        self.skip_retry = true;
        self
    }

    /// Do not attach the client's bearer token
    #[must_use]
    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }

    /// HTTP method
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path or absolute URL as given
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Request body, if any
    #[must_use]
    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub(crate) fn is_multipart(&self) -> bool {
        self.body.as_ref().is_some_and(RequestBody::is_multipart)
    }
}

/// Validate a header name/value pair
pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), ConfigError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| ConfigError::InvalidHeaderName(name.to_string()))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|_| ConfigError::InvalidHeaderValue(name.to_string()))?;
    Ok((header_name, header_value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_sets_overrides() {
        let request = ApiRequest::post("/api/users")
            .json(&json!({ "name": "Bo" }))
            .unwrap()
            .header("X-Trace", "abc")
            .unwrap()
            .timeout(Duration::from_secs(5))
            .retries(1)
            .no_retry()
            .skip_auth();

        assert_eq!(*request.method(), Method::POST);
        assert_eq!(request.path(), "/api/users");
        assert_eq!(request.headers.get("x-trace").unwrap(), "abc");
        assert_eq!(request.timeout, Some(Duration::from_secs(5)));
        assert_eq!(request.max_retries, Some(1));
        assert!(request.skip_retry);
        assert!(request.skip_auth);
        assert!(!request.is_multipart());
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let err = ApiRequest::get("/").header("bad header", "x").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHeaderName(_)));

        let err = ApiRequest::get("/").header("X-Ok", "line\nbreak").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHeaderValue(_)));
    }

    #[test]
    fn test_multipart_form_encodes_every_attempt() {
        let form = MultipartForm::new()
            .text("title", "Avatar")
            .file_with_mime("file", b"\x89PNG".to_vec(), "a.png", "image/png");
        assert_eq!(form.len(), 2);

        let request = ApiRequest::post("/upload").multipart(form.clone());
        assert!(request.is_multipart());

        assert!(form.to_form().is_ok());
        assert!(form.to_form().is_ok());
    }

    #[test]
    fn test_bad_mime_fails_encoding() {
        let form = MultipartForm::new().file_with_mime("file", vec![1, 2], "x.bin", "not a mime");
        assert!(form.to_form().is_err());
    }
}
