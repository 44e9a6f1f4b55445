use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::LLMError;
use crate::http::{
    DynHttpTransport, HttpBodyStream, merge_headers, post_json_stream_with_headers,
    post_json_with_headers,
};
use crate::normalize::anthropic::{
    AnthropicChunkNormalizer, AnthropicMessageResponse, map_response, strip_system_messages,
};
use crate::provider::{
    ChatStream, LLMProvider, endpoint, ensure_stream_success, ensure_success, prepare_body,
    try_parse,
};
use crate::stream::{NormalizedStream, StreamFormat};
use crate::types::ChatCompletion;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_VERSION: &str = "2023-06-01";
const PROVIDER: &str = "anthropic";

/// Anthropic Messages backend whose output is translated into the OpenAI
/// chat-completions shape.
pub struct AnthropicProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) auth_token: Option<String>,
    pub(crate) version: String,
    pub(crate) beta: Option<String>,
    pub(crate) default_model: Option<String>,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) timeout: Option<Duration>,
}

impl AnthropicProvider {
    /// Creates a provider with the default base URL and `anthropic-version`.
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            auth_token: None,
            version: DEFAULT_VERSION.to_string(),
            beta: None,
            default_model: None,
            headers: HashMap::new(),
            timeout: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Authenticates with `Authorization: Bearer <token>` instead of
    /// `x-api-key`.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Overrides the `anthropic-version` header.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the `anthropic-beta` header (comma-separated list).
    pub fn with_beta(mut self, beta: impl Into<String>) -> Self {
        self.beta = Some(beta.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        match &self.auth_token {
            Some(token) => {
                headers.insert("Authorization".to_string(), format!("Bearer {token}"));
            }
            None if !self.api_key.is_empty() => {
                headers.insert("x-api-key".to_string(), self.api_key.clone());
            }
            None => {}
        }
        headers.insert("anthropic-version".to_string(), self.version.clone());
        if let Some(beta) = &self.beta {
            headers.insert("anthropic-beta".to_string(), beta.clone());
        }
        merge_headers(&mut headers, &self.headers);
        headers
    }

    fn build_body(&self, mut params: Value, stream: bool) -> Result<Map<String, Value>, LLMError> {
        let removed = strip_system_messages(&mut params);
        if removed > 0 {
            tracing::debug!(provider = PROVIDER, removed, "dropped system messages");
        }
        let body = prepare_body(params, self.default_model.as_deref(), stream)?;
        if !body.contains_key("max_tokens") {
            return Err(LLMError::Validation {
                message: "max_tokens is required for Anthropic Messages".to_string(),
            });
        }
        Ok(body)
    }

    fn model_of(body: &Map<String, Value>) -> String {
        body.get("model")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    async fn open_stream(&self, body: &Map<String, Value>) -> Result<HttpBodyStream, LLMError> {
        let url = endpoint(&self.base_url, "messages");
        tracing::debug!(provider = PROVIDER, %url, "opening stream");
        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            url,
            self.build_headers(),
            self.timeout,
            body,
        )
        .await?;
        ensure_stream_success(PROVIDER, response).await
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn chat(&self, params: Value) -> Result<ChatCompletion, LLMError> {
        let body = self.build_body(params, false)?;
        let url = endpoint(&self.base_url, "messages");
        tracing::debug!(provider = PROVIDER, %url, "sending request");
        let response = post_json_with_headers(
            self.transport.as_ref(),
            url,
            self.build_headers(),
            self.timeout,
            &body,
        )
        .await?;
        let text = ensure_success(PROVIDER, response)?;
        let parsed: AnthropicMessageResponse = try_parse(PROVIDER, &text)?;
        map_response(parsed)
    }

    async fn stream_chat(&self, params: Value) -> Result<ChatStream, LLMError> {
        let body = self.build_body(params, true)?;
        let normalizer = AnthropicChunkNormalizer::new(Self::model_of(&body));
        let stream = self.open_stream(&body).await?;
        Ok(Box::pin(NormalizedStream::new(
            stream,
            StreamFormat::Anthropic,
            normalizer,
        )))
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}
