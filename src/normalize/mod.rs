//! Conversion of provider-native events into canonical values.
//!
//! The pipeline never hard-codes provider semantics: it calls whatever
//! [`Normalizer`] the caller injects. Closures work out of the box, and the
//! [`openai`] and [`anthropic`] modules ship the built-in translations.

use crate::error::LLMError;
use crate::stream::RawEvent;

pub mod anthropic;
pub mod openai;

/// Strategy converting one [`RawEvent`] into one normalized value.
///
/// Errors are not fatal to a stream: the pipeline logs them and skips the event.
///
/// # Examples
///
/// ```
/// use llm_relay::error::LLMError;
/// use llm_relay::normalize::Normalizer;
/// use llm_relay::stream::RawEvent;
///
/// let mut text_of = |event: RawEvent| -> Result<String, LLMError> {
///     Ok(event.data["text"].as_str().unwrap_or_default().to_string())
/// };
/// let out = text_of
///     .normalize(RawEvent { event: None, data: serde_json::json!({"text": "hi"}) })
///     .unwrap();
/// assert_eq!(out, "hi");
/// ```
pub trait Normalizer<T>: Send {
    fn normalize(&mut self, event: RawEvent) -> Result<T, LLMError>;
}

impl<T, F> Normalizer<T> for F
where
    F: FnMut(RawEvent) -> Result<T, LLMError> + Send,
{
    fn normalize(&mut self, event: RawEvent) -> Result<T, LLMError> {
        self(event)
    }
}

/// Boxed normalizer as stored by the pipeline.
pub type DynNormalizer<T> = Box<dyn Normalizer<T>>;
