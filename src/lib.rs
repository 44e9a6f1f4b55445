//! Unified streaming client for OpenAI and Anthropic chat APIs.
//!
//! Both vendors answer in the OpenAI chat-completions shape: Anthropic
//! responses and stream deltas are translated on the fly. The [`stream`]
//! module holds the vendor-agnostic SSE pipeline and can be used on its own
//! with any byte source.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod normalize;
pub mod provider;
pub mod stream;
pub mod types;

pub use client::LLMClient;
pub use error::LLMError;
pub use provider::{ChatStream, LLMProvider};
pub use stream::{NormalizedStream, StreamFormat, transform};
pub use types::*;
