//! Anthropic Messages -> OpenAI chat-completions translation.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LLMError;
use crate::stream::RawEvent;
use crate::types::{
    ChatCompletion, ChatCompletionChunk, ChatMessage, Choice, ChunkChoice, ChunkDelta,
    FunctionCall, ROLE_ASSISTANT, ToolCall, Usage,
};

use super::Normalizer;

const PROVIDER: &str = "anthropic";

/// Non-streaming response payload returned by Anthropic Messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessageResponse {
    /// Some compatibility layers omit the `id`, so keep it optional.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: String,
    /// Ordered list of content blocks.
    #[serde(default)]
    pub content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
    #[serde(default)]
    pub usage: Option<AnthropicUsage>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Single content block (text, tool use, thinking, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Free-form tool input object.
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Usage counters returned by Anthropic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
}

/// Translates a complete Anthropic message into a [`ChatCompletion`].
///
/// The first text block becomes `content`; every `tool_use` block becomes a
/// function tool call whose `input` is serialized into the `arguments` string.
/// The stop reason is carried over verbatim.
pub fn map_response(resp: AnthropicMessageResponse) -> Result<ChatCompletion, LLMError> {
    let mut content = None;
    let mut tool_calls = Vec::new();

    for block in resp.content {
        match block.kind.as_str() {
            "text" => {
                if content.is_none() {
                    content = Some(block.text.unwrap_or_default());
                }
            }
            "tool_use" => {
                let input = block.input.unwrap_or_else(|| Value::Object(Default::default()));
                let arguments = serde_json::to_string(&input).map_err(|err| {
                    LLMError::provider(PROVIDER, format!("failed to encode tool input: {err}"))
                })?;
                tool_calls.push(ToolCall {
                    id: block.id.unwrap_or_default(),
                    kind: "function".to_string(),
                    function: FunctionCall {
                        name: block.name.unwrap_or_default(),
                        arguments,
                    },
                });
            }
            other => {
                tracing::debug!(block_type = other, "dropping unsupported content block");
            }
        }
    }

    Ok(ChatCompletion {
        id: resp.id.unwrap_or_default(),
        object: "chat.completion".to_string(),
        created: unix_now(),
        model: resp.model,
        choices: vec![Choice {
            index: 0,
            message: ChatMessage {
                role: ROLE_ASSISTANT.to_string(),
                content,
                refusal: None,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            },
            finish_reason: resp.stop_reason,
            logprobs: None,
        }],
        usage: resp.usage.as_ref().map(convert_usage),
    })
}

/// Renames Anthropic token counters to OpenAI naming and computes the total,
/// saturating at `u64::MAX`.
pub fn convert_usage(usage: &AnthropicUsage) -> Usage {
    let prompt_tokens = usage.input_tokens.unwrap_or(0);
    let completion_tokens = usage.output_tokens.unwrap_or(0);
    Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens.saturating_add(completion_tokens),
    }
}

/// Wraps Anthropic `text_delta` payloads into OpenAI-shaped chunks.
///
/// Each chunk carries one choice at index 0 whose delta has
/// `role: "assistant"`, the text as `content` and `refusal: null`.
#[derive(Debug, Clone)]
pub struct AnthropicChunkNormalizer {
    id: String,
    model: String,
    created: u64,
}

impl AnthropicChunkNormalizer {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            model: model.into(),
            created: unix_now(),
        }
    }

    /// Stamps every produced chunk with the given id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Builds the chunk for one delta payload.
    pub fn chunk_for(&self, delta: &Value) -> Result<ChatCompletionChunk, LLMError> {
        let text = delta
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| LLMError::provider(PROVIDER, "text delta without text"))?;
        let finish_reason = delta
            .get("stop_reason")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: Some(ROLE_ASSISTANT.to_string()),
                    content: Some(text.to_string()),
                    refusal: None,
                    tool_calls: None,
                },
                finish_reason,
                logprobs: None,
            }],
            usage: None,
            system_fingerprint: None,
        })
    }
}

impl Normalizer<ChatCompletionChunk> for AnthropicChunkNormalizer {
    fn normalize(&mut self, event: RawEvent) -> Result<ChatCompletionChunk, LLMError> {
        self.chunk_for(&event.data)
    }
}

/// Removes every `role: "system"` entry from an outbound `messages` array.
///
/// Anthropic rejects system messages inside the list. Returns how many were
/// removed.
pub fn strip_system_messages(params: &mut Value) -> usize {
    let Some(Value::Array(messages)) = params.get_mut("messages") else {
        return 0;
    };
    let before = messages.len();
    messages.retain(|message| message.get("role").and_then(Value::as_str) != Some("system"));
    before - messages.len()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
