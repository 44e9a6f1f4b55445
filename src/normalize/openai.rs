use crate::error::LLMError;
use crate::stream::RawEvent;
use crate::types::{ChatCompletionChunk, Completion, CompletionChunk};

const PROVIDER: &str = "openai";

/// Deserializes one chat-completions stream event into a [`ChatCompletionChunk`].
///
/// OpenAI events already have the canonical shape, so this is a typed decode.
pub fn chat_chunk(event: RawEvent) -> Result<ChatCompletionChunk, LLMError> {
    serde_json::from_value(event.data).map_err(|err| {
        LLMError::provider(PROVIDER, format!("failed to parse stream chunk: {err}"))
    })
}

/// Deserializes one legacy completions stream event and pulls out the first
/// choice's text.
pub fn completion_chunk(event: RawEvent) -> Result<CompletionChunk, LLMError> {
    let response: Completion = serde_json::from_value(event.data).map_err(|err| {
        LLMError::provider(PROVIDER, format!("failed to parse completion chunk: {err}"))
    })?;
    Ok(CompletionChunk {
        completion: response.text().to_string(),
        response,
    })
}
