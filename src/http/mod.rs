use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use serde::Serialize;

use crate::error::LLMError;

/// JSON POST request handed to a transport. Both vendors only ever receive
/// POSTs, so there is no method field.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Builds a POST request with a JSON request body.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::http::HttpRequest;
    ///
    /// let request = HttpRequest::post_json("https://example.com", br"{}".to_vec());
    /// assert_eq!(request.body, b"{}");
    /// assert_eq!(request.headers.get("Content-Type"), Some(&"application/json".to_string()));
    /// ```
    pub fn post_json(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::from([("Content-Type".to_string(), "application/json".to_string())]),
            body,
            timeout: None,
        }
    }

    /// Merges additional headers into the request. Names compare
    /// case-insensitively, so `content-type` replaces `Content-Type`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use llm_relay::http::HttpRequest;
    ///
    /// let request = HttpRequest::post_json("https://example.com", br"{}".to_vec())
    ///     .with_headers(HashMap::from([("Authorization".into(), "Bearer test".into())]));
    /// assert_eq!(request.headers.get("Authorization"), Some(&"Bearer test".to_string()));
    /// assert!(request.headers.contains_key("Content-Type"));
    /// ```
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        merge_headers(&mut self.headers, &headers);
        self
    }

    /// Sets a per-request timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Minimal HTTP response representation.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Converts the body into a UTF-8 string.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::http::HttpResponse;
    ///
    /// let response = HttpResponse { status: 200, headers: Default::default(), body: b"ok".to_vec() };
    /// assert_eq!(response.into_string().unwrap(), "ok");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Transport`] when the body cannot be interpreted as UTF-8.
    pub fn into_string(self) -> Result<String, LLMError> {
        String::from_utf8(self.body).map_err(|err| LLMError::transport(err.to_string()))
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP response that carries a streaming body.
pub struct HttpStreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: HttpBodyStream,
}

impl HttpStreamResponse {
    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Alias for the body stream returned by [`HttpTransport::send_stream`].
pub type HttpBodyStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, LLMError>> + Send>>;

/// Transport abstraction used to decouple providers from the concrete HTTP client.
///
/// The relay never talks to the network itself: providers hand a fully built
/// [`HttpRequest`] to the transport and consume either the buffered body or the
/// raw byte stream it returns.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends a request and resolves when the full response is available.
    ///
    /// # Examples
    ///
    /// ```
    /// # use async_trait::async_trait;
    /// # use llm_relay::http::{HttpTransport, HttpRequest, HttpResponse, HttpStreamResponse};
    /// # use llm_relay::error::LLMError;
    /// # use futures_util::stream;
    /// struct MemoryTransport;
    ///
    /// #[async_trait]
    /// impl HttpTransport for MemoryTransport {
    ///     async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
    ///         Ok(HttpResponse { status: 200, headers: request.headers, body: b"ok".to_vec() })
    ///     }
    ///     async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
    ///         Ok(HttpStreamResponse { status: 200, headers: request.headers, body: Box::pin(stream::empty()) })
    ///     }
    /// }
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let response = MemoryTransport
    ///     .send(HttpRequest::post_json("https://example.com", br"{}".to_vec()))
    ///     .await
    ///     .unwrap();
    /// assert_eq!(response.status, 200);
    /// # });
    /// ```
    ///
    /// # Errors
    ///
    /// Implementations should map transport failures to [`LLMError::Transport`].
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError>;

    /// Sends a request and returns a streaming body.
    ///
    /// A non-2xx status is not an error at this level; providers inspect
    /// [`HttpStreamResponse::status`] before they start decoding.
    ///
    /// # Errors
    ///
    /// Implementations should return [`LLMError::Transport`] for network failures.
    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError>;
}

/// Thread-safe handle to a transport implementation.
pub type DynHttpTransport = Arc<dyn HttpTransport>;

/// Serializes a body to JSON, attaches headers, and issues a POST request.
///
/// # Errors
///
/// Returns [`LLMError::Validation`] if serialization fails or forwards the error raised by
/// [`HttpTransport::send`].
pub async fn post_json_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    timeout: Option<Duration>,
    body: &T,
) -> Result<HttpResponse, LLMError> {
    let request = build_json_request(url, headers, timeout, body)?;
    transport.send(request).await
}

/// Issues a JSON POST request and returns the streaming response.
///
/// The helper mirrors [`post_json_with_headers`] but calls
/// [`HttpTransport::send_stream`] to support Server-Sent Events.
///
/// # Errors
///
/// Returns [`LLMError::Validation`] when serialization fails or propagates any error from
/// [`HttpTransport::send_stream`].
pub async fn post_json_stream_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    timeout: Option<Duration>,
    body: &T,
) -> Result<HttpStreamResponse, LLMError> {
    let request = build_json_request(url, headers, timeout, body)?;
    transport.send_stream(request).await
}

fn build_json_request<T: Serialize>(
    url: impl Into<String>,
    headers: HashMap<String, String>,
    timeout: Option<Duration>,
    body: &T,
) -> Result<HttpRequest, LLMError> {
    let payload = serde_json::to_vec(body).map_err(|err| LLMError::Validation {
        message: format!("failed to serialize request: {err}"),
    })?;
    Ok(HttpRequest::post_json(url, payload)
        .with_headers(headers)
        .with_timeout(timeout))
}

/// Applies `overrides` on top of `headers`, replacing entries whose names
/// match ignoring ASCII case.
pub(crate) fn merge_headers(
    headers: &mut HashMap<String, String>,
    overrides: &HashMap<String, String>,
) {
    for (name, value) in overrides {
        headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
        headers.insert(name.clone(), value.clone());
    }
}

/// Drains a streaming body into a string, used to read error payloads of
/// non-2xx streaming responses.
pub(crate) async fn collect_body_text(
    mut body: HttpBodyStream,
    provider: &'static str,
) -> Result<String, LLMError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    String::from_utf8(bytes).map_err(|err| LLMError::Provider {
        provider,
        message: format!("failed to decode stream error body: {err}"),
    })
}

/// Extracts the `Retry-After` header (in seconds) if present.
///
/// HTTP-date values are ignored because vendors primarily use the numeric form.
pub(crate) fn retry_after_from_headers(headers: &HashMap<String, String>) -> Option<Duration> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

pub mod reqwest;

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use serde::ser;

    /// Transport that panics if `send` or `send_stream` are invoked.
    struct PanicTransport;

    #[async_trait]
    impl HttpTransport for PanicTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, LLMError> {
            panic!("send should not be called");
        }

        async fn send_stream(&self, _request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
            panic!("send_stream should not be called");
        }
    }

    /// Body type that intentionally fails serialization to trigger validation errors.
    struct NonSerializableBody;

    impl Serialize for NonSerializableBody {
        fn serialize<S>(&self, _serializer: S) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            Err(ser::Error::custom(
                "intentional serialization failure for test",
            ))
        }
    }

    #[tokio::test]
    async fn post_json_with_headers_returns_validation_on_serde_error() {
        let result = post_json_with_headers(
            &PanicTransport,
            "http://example.com",
            HashMap::new(),
            None,
            &NonSerializableBody,
        )
        .await;

        match result {
            Err(LLMError::Validation { message }) => {
                assert!(
                    message.contains("failed to serialize request"),
                    "unexpected validation message: {message}"
                );
            }
            Ok(_) => panic!("expected validation error for non serializable body"),
            Err(other) => panic!("unexpected error type: {other:?}"),
        }
    }

    #[tokio::test]
    async fn collect_body_text_joins_chunks_and_propagates_errors() {
        let body: HttpBodyStream = Box::pin(stream::iter(vec![
            Ok(b"{\"error\":".to_vec()),
            Ok(b"{}}".to_vec()),
        ]));
        let text = collect_body_text(body, "openai").await.expect("text");
        assert_eq!(text, "{\"error\":{}}");

        let body: HttpBodyStream = Box::pin(stream::iter(vec![
            Ok(b"partial".to_vec()),
            Err(LLMError::transport("reset by peer")),
        ]));
        let err = collect_body_text(body, "openai").await.unwrap_err();
        assert!(matches!(err, LLMError::Transport { .. }));
    }

    #[test]
    fn merge_headers_replaces_names_ignoring_case() {
        let mut headers = HashMap::from([
            ("User-Agent".to_string(), "llm-relay/0.1.0".to_string()),
            ("x-api-key".to_string(), "sk".to_string()),
        ]);
        let overrides = HashMap::from([
            ("user-agent".to_string(), "my-app/2.0".to_string()),
            ("X-Trace".to_string(), "abc".to_string()),
        ]);
        merge_headers(&mut headers, &overrides);

        assert_eq!(headers.len(), 3);
        assert_eq!(headers["user-agent"], "my-app/2.0");
        assert!(!headers.contains_key("User-Agent"));
        assert_eq!(headers["x-api-key"], "sk");
        assert_eq!(headers["X-Trace"], "abc");
    }

    #[test]
    fn request_headers_override_content_type_ignoring_case() {
        let request = HttpRequest::post_json("https://example.com", b"{}".to_vec()).with_headers(
            HashMap::from([("content-type".to_string(), "application/json; charset=utf-8".to_string())]),
        );
        assert_eq!(request.headers.len(), 1);
        assert_eq!(
            request.headers["content-type"],
            "application/json; charset=utf-8"
        );
    }

    #[test]
    fn retry_after_header_is_case_insensitive() {
        let headers = HashMap::from([("Retry-After".to_string(), " 7 ".to_string())]);
        assert_eq!(
            retry_after_from_headers(&headers),
            Some(Duration::from_secs(7))
        );

        let headers = HashMap::from([(
            "retry-after".to_string(),
            "Wed, 21 Oct 2015 07:28:00 GMT".to_string(),
        )]);
        assert_eq!(retry_after_from_headers(&headers), None);
    }
}
