use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::error::LLMError;
use crate::provider::{ChatStream, DynProvider};
use crate::types::ChatCompletion;

/// Entry point that dispatches requests to providers registered under handles.
pub struct LLMClient {
    providers: HashMap<String, DynProvider>,
}

impl LLMClient {
    pub fn builder() -> LLMClientBuilder {
        LLMClientBuilder {
            providers: HashMap::new(),
        }
    }

    /// Sends a non-streaming chat request through the provider behind `handle`.
    pub async fn chat(&self, handle: &str, params: Value) -> Result<ChatCompletion, LLMError> {
        let provider = self.get_provider(handle)?;
        provider.chat(params).await
    }

    /// Opens a streaming chat request through the provider behind `handle`.
    pub async fn stream_chat(&self, handle: &str, params: Value) -> Result<ChatStream, LLMError> {
        let provider = self.get_provider(handle)?;
        provider.stream_chat(params).await
    }

    /// Registered handles, in no particular order.
    pub fn handles(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Name of the provider behind `handle`, e.g. `openai`.
    pub fn provider_name(&self, handle: &str) -> Result<&'static str, LLMError> {
        Ok(self.get_provider(handle)?.name())
    }

    fn get_provider(&self, handle: &str) -> Result<DynProvider, LLMError> {
        self.providers
            .get(handle)
            .cloned()
            .ok_or_else(|| LLMError::Validation {
                message: format!("unknown model handle: {handle}"),
            })
    }
}

impl fmt::Debug for LLMClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut handles: Vec<(&str, &str)> = self
            .providers
            .iter()
            .map(|(handle, provider)| (handle.as_str(), provider.name()))
            .collect();
        handles.sort_unstable();
        f.debug_struct("LLMClient")
            .field("providers", &handles)
            .finish()
    }
}

/// Builder registering providers under handles.
pub struct LLMClientBuilder {
    providers: HashMap<String, DynProvider>,
}

impl LLMClientBuilder {
    /// Registers `provider` under `handle`; a later registration of the same
    /// handle replaces the earlier one.
    pub fn register_handle<S: Into<String>>(mut self, handle: S, provider: DynProvider) -> Self {
        self.providers.insert(handle.into(), provider);
        self
    }

    pub fn build(self) -> LLMClient {
        LLMClient {
            providers: self.providers,
        }
    }
}
