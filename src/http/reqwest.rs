use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, Response};

use crate::error::LLMError;

use super::{
    DynHttpTransport, HttpBodyStream, HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport,
};

const ACCEPT_JSON: &str = "application/json";
const ACCEPT_EVENT_STREAM: &str = "text/event-stream";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`HttpTransport`] over a `reqwest::Client`.
///
/// Streaming requests advertise `Accept: text/event-stream` and
/// `Cache-Control: no-cache` unless the caller already set them. Per-request
/// timeouts bound the whole exchange, including the streamed body.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Wraps a caller-configured client (proxies, custom roots, pooling).
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Client with a 10 second connect timeout and no overall timeout; the
    /// providers pass their own per request.
    pub fn default_client() -> Result<Self, LLMError> {
        Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map(Self::new)
            .map_err(|err| LLMError::transport(format!("failed to create HTTP client: {err}")))
    }

    fn prepare(&self, request: HttpRequest, streaming: bool) -> Result<RequestBuilder, LLMError> {
        let mut headers = to_header_map(request.headers)?;
        if streaming {
            headers
                .entry(ACCEPT)
                .or_insert(HeaderValue::from_static(ACCEPT_EVENT_STREAM));
            headers
                .entry(CACHE_CONTROL)
                .or_insert(HeaderValue::from_static("no-cache"));
        } else {
            headers
                .entry(ACCEPT)
                .or_insert(HeaderValue::from_static(ACCEPT_JSON));
        }

        let mut builder = self
            .client
            .post(&request.url)
            .headers(headers)
            .body(request.body);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder)
    }

    async fn execute(&self, request: HttpRequest, streaming: bool) -> Result<Response, LLMError> {
        let url = request.url.clone();
        let response = self
            .prepare(request, streaming)?
            .send()
            .await
            .map_err(transport_error)?;
        tracing::debug!(%url, status = response.status().as_u16(), streaming, "response received");
        Ok(response)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        let response = self.execute(request, false).await?;
        let status = response.status().as_u16();
        let headers = from_header_map(response.headers());
        let body = response.bytes().await.map_err(transport_error)?.to_vec();
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        let response = self.execute(request, true).await?;
        let status = response.status().as_u16();
        let headers = from_header_map(response.headers());
        let body: HttpBodyStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(transport_error)),
        );
        Ok(HttpStreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Shareable transport built with [`ReqwestTransport::default_client`].
pub fn default_dyn_transport() -> Result<DynHttpTransport, LLMError> {
    Ok(Arc::new(ReqwestTransport::default_client()?))
}

/// Converts caller headers; a name or value HTTP cannot carry is a
/// [`LLMError::Validation`] since it comes from configuration.
fn to_header_map(headers: HashMap<String, String>) -> Result<HeaderMap, LLMError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header = HeaderName::from_bytes(name.as_bytes()).map_err(|err| LLMError::Validation {
            message: format!("invalid header name {name:?}: {err}"),
        })?;
        let value = HeaderValue::from_str(&value).map_err(|err| LLMError::Validation {
            message: format!("invalid value for header {header}: {err}"),
        })?;
        map.insert(header, value);
    }
    Ok(map)
}

/// Lowercase names; repeated headers are joined with `, ` and values that are
/// not visible ASCII are skipped.
fn from_header_map(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = HashMap::with_capacity(headers.keys_len());
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    map
}

fn transport_error(err: reqwest::Error) -> LLMError {
    if err.is_timeout() {
        LLMError::transport(format!("request timed out: {err}"))
    } else if err.is_connect() {
        LLMError::transport(format!("connection failed: {err}"))
    } else {
        LLMError::transport(err.to_string())
    }
}
