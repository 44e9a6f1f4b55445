use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{LLMError, parse_api_error};
use crate::http::{
    HttpBodyStream, HttpResponse, HttpStreamResponse, collect_body_text, retry_after_from_headers,
};
use crate::types::{ChatCompletion, ChatCompletionChunk};

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

/// Stream of OpenAI-shaped chat chunks, whatever the upstream vendor.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk, LLMError>> + Send>>;

/// Common interface implemented by every vendor backend.
///
/// Request params are passed through as JSON so vendor-specific fields survive
/// untouched; responses always come back in the OpenAI chat-completions shape.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Submits a full request and waits for the complete response.
    async fn chat(&self, params: Value) -> Result<ChatCompletion, LLMError>;

    /// Opens a streaming request.
    ///
    /// Resolves once the upstream has answered with a success status; any
    /// error response is surfaced here instead of as a stream item.
    async fn stream_chat(&self, params: Value) -> Result<ChatStream, LLMError>;

    fn name(&self) -> &'static str;
}

/// Thread-safe provider handle.
pub type DynProvider = Arc<dyn LLMProvider>;

/// Validates outbound params, fills in the default model and sets the
/// `stream` flag.
pub(crate) fn prepare_body(
    params: Value,
    default_model: Option<&str>,
    stream: bool,
) -> Result<Map<String, Value>, LLMError> {
    let Value::Object(mut body) = params else {
        return Err(LLMError::Validation {
            message: "request params must be a JSON object".to_string(),
        });
    };

    let has_model = body
        .get("model")
        .and_then(Value::as_str)
        .is_some_and(|model| !model.is_empty());
    if !has_model {
        let model = default_model.ok_or_else(|| LLMError::Validation {
            message: "model is required".to_string(),
        })?;
        body.insert("model".to_string(), Value::String(model.to_string()));
    }

    if stream {
        body.insert("stream".to_string(), Value::Bool(true));
    } else {
        body.remove("stream");
    }
    Ok(body)
}

/// Appends `path` to `base`, tolerating bases with or without a trailing `/v1`.
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}/{path}")
    } else {
        format!("{base}/v1/{path}")
    }
}

/// Returns the body text of a 2xx response or the mapped API error.
pub(crate) fn ensure_success(
    provider: &'static str,
    response: HttpResponse,
) -> Result<String, LLMError> {
    let status = response.status;
    let retry_after = retry_after_from_headers(&response.headers);
    let success = response.is_success();
    let text = response.into_string()?;
    if success {
        Ok(text)
    } else {
        tracing::debug!(provider, status, "request failed");
        Err(parse_api_error(provider, status, &text, retry_after))
    }
}

/// Returns the body of a 2xx streaming response; otherwise drains the body and
/// maps it to an API error before any decoding starts.
pub(crate) async fn ensure_stream_success(
    provider: &'static str,
    response: HttpStreamResponse,
) -> Result<HttpBodyStream, LLMError> {
    if response.is_success() {
        return Ok(response.body);
    }
    let status = response.status;
    let retry_after = retry_after_from_headers(&response.headers);
    let text = collect_body_text(response.body, provider).await?;
    tracing::debug!(provider, status, "stream request failed");
    Err(parse_api_error(provider, status, &text, retry_after))
}

pub(crate) fn try_parse<T: DeserializeOwned>(
    provider: &'static str,
    text: &str,
) -> Result<T, LLMError> {
    serde_json::from_str(text).map_err(|err| LLMError::Provider {
        provider,
        message: format!("failed to parse response: {err}"),
    })
}
