use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use serde_json::{Map, Value};

use crate::error::LLMError;
use crate::http::{
    DynHttpTransport, HttpBodyStream, merge_headers, post_json_stream_with_headers,
    post_json_with_headers,
};
use crate::normalize::openai::{chat_chunk, completion_chunk};
use crate::provider::{
    ChatStream, LLMProvider, endpoint, ensure_stream_success, ensure_success, prepare_body,
    try_parse,
};
use crate::stream::{NormalizedStream, StreamFormat};
use crate::types::{
    ChatCompletion, Completion, CompletionChunk, CompletionsOutput, EmbeddingOutput,
    EmbeddingResponse, EmbeddingsOutput,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_USER_AGENT: &str = concat!("llm-relay/", env!("CARGO_PKG_VERSION"));
const PROVIDER: &str = "openai";

/// Stream of legacy completion chunks.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<CompletionChunk, LLMError>> + Send>>;

/// OpenAI chat-completions, legacy completions and embeddings backend.
///
/// Also works against OpenAI-compatible gateways via [`with_base_url`](Self::with_base_url).
pub struct OpenAiProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) organization: Option<String>,
    pub(crate) default_model: Option<String>,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) timeout: Option<Duration>,
}

impl OpenAiProvider {
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            organization: None,
            default_model: None,
            headers: HashMap::new(),
            timeout: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the `OpenAI-Organization` header.
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Adds a header sent with every request; overrides built-in headers of the
    /// same name.
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
        if !self.api_key.is_empty() {
            headers.insert(
                "Authorization".to_string(),
                format!("Bearer {}", self.api_key),
            );
        }
        headers.insert("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string());
        if let Some(organization) = &self.organization {
            headers.insert("OpenAI-Organization".to_string(), organization.clone());
        }
        merge_headers(&mut headers, &self.headers);
        headers
    }

    async fn post(&self, path: &str, body: Map<String, Value>) -> Result<String, LLMError> {
        let url = endpoint(&self.base_url, path);
        tracing::debug!(provider = PROVIDER, %url, "sending request");
        let response = post_json_with_headers(
            self.transport.as_ref(),
            url,
            self.build_headers(),
            self.timeout,
            &body,
        )
        .await?;
        ensure_success(PROVIDER, response)
    }

    async fn post_stream(&self, path: &str, params: Value) -> Result<HttpBodyStream, LLMError> {
        let body = prepare_body(params, self.default_model.as_deref(), true)?;
        let url = endpoint(&self.base_url, path);
        tracing::debug!(provider = PROVIDER, %url, "opening stream");
        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            url,
            self.build_headers(),
            self.timeout,
            &body,
        )
        .await?;
        ensure_stream_success(PROVIDER, response).await
    }

    async fn post_completion(&self, params: Value) -> Result<Completion, LLMError> {
        let body = prepare_body(params, self.default_model.as_deref(), false)?;
        let text = self.post("completions", body).await?;
        try_parse(PROVIDER, &text)
    }

    async fn post_embeddings(&self, params: Value) -> Result<EmbeddingResponse, LLMError> {
        let body = prepare_body(params, None, false)?;
        let text = self.post("embeddings", body).await?;
        try_parse(PROVIDER, &text)
    }

    /// Creates a legacy text completion (`/v1/completions`).
    pub async fn completion(&self, params: Value) -> Result<Completion, LLMError> {
        self.post_completion(params).await
    }

    /// Creates a legacy completion and returns every choice's text, ordered by
    /// choice index. Useful with `n > 1` or an array `prompt`.
    pub async fn completions(&self, params: Value) -> Result<CompletionsOutput, LLMError> {
        let mut response = self.post_completion(params).await?;
        response.choices.sort_by_key(|choice| choice.index);
        let completions = response
            .choices
            .iter()
            .map(|choice| choice.text.clone())
            .collect();
        Ok(CompletionsOutput {
            completions,
            response,
        })
    }

    /// Embeds a single input (`/v1/embeddings`). `params` must name the
    /// `model`; the default chat model is not applied.
    ///
    /// An empty `data` array yields an empty vector.
    pub async fn embedding(&self, params: Value) -> Result<EmbeddingOutput, LLMError> {
        let response = self.post_embeddings(params).await?;
        let embedding = response
            .data
            .first()
            .map(|item| item.embedding.clone())
            .unwrap_or_default();
        Ok(EmbeddingOutput {
            embedding,
            response,
        })
    }

    /// Embeds a batch of inputs; vectors are returned in input order even if
    /// the upstream reorders `data`.
    pub async fn embeddings(&self, params: Value) -> Result<EmbeddingsOutput, LLMError> {
        let mut response = self.post_embeddings(params).await?;
        response.data.sort_by_key(|item| item.index);
        let embeddings = response
            .data
            .iter()
            .map(|item| item.embedding.clone())
            .collect();
        Ok(EmbeddingsOutput {
            embeddings,
            response,
        })
    }

    /// Streams a legacy text completion.
    pub async fn stream_completion(&self, params: Value) -> Result<CompletionStream, LLMError> {
        let body = self.post_stream("completions", params).await?;
        Ok(Box::pin(NormalizedStream::new(
            body,
            StreamFormat::OpenAi,
            completion_chunk,
        )))
    }
}

#[async_trait]
impl LLMProvider for OpenAiProvider {
    async fn chat(&self, params: Value) -> Result<ChatCompletion, LLMError> {
        let body = prepare_body(params, self.default_model.as_deref(), false)?;
        let text = self.post("chat/completions", body).await?;
        try_parse(PROVIDER, &text)
    }

    async fn stream_chat(&self, params: Value) -> Result<ChatStream, LLMError> {
        let body = self.post_stream("chat/completions", params).await?;
        Ok(Box::pin(NormalizedStream::new(
            body,
            StreamFormat::OpenAi,
            chat_chunk,
        )))
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}
