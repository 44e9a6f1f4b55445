use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Aggregates every failure mode exposed by the relay client.
///
/// Callers can match on the specific variant to decide whether to retry, fall back
/// to another provider, or surface an actionable message to the user interface.
#[derive(Debug, Error)]
pub enum LLMError {
    /// Represents transport-layer or networking failures.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Reports invalid or missing credentials.
    #[error("auth failure: {message}")]
    Auth { message: String },
    /// Indicates that the provider throttled the request.
    #[error("rate limited: {message}")]
    RateLimit {
        /// Raw message returned by the upstream provider.
        message: String,
        /// Optional wait duration suggested by the provider before retrying.
        retry_after: Option<Duration>,
    },
    /// Signals validation failures in the request payload.
    #[error("invalid request: {message}")]
    Validation { message: String },
    /// Raised when building or validating configuration fails.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// Name of the configuration field that failed validation.
        field: String,
        /// Additional context explaining why the field is invalid.
        reason: String,
    },
    /// Non-success HTTP status that does not map onto a more specific variant.
    #[error("provider {provider} returned {status}: {message}")]
    Api {
        /// Name of the provider, such as `openai`.
        provider: &'static str,
        /// HTTP status code of the failed response.
        status: u16,
        /// Error message extracted from the body, or the raw body.
        message: String,
        /// Provider error `type`, e.g. `server_error` or `overloaded_error`.
        kind: Option<String>,
        /// Provider error `code`, when present.
        code: Option<String>,
    },
    /// Surfaces cancellations triggered by the consumer side of a stream.
    #[error("request aborted: {message}")]
    Aborted {
        /// Message describing who/what cancelled the request.
        message: String,
    },
    /// Wraps provider-defined errors that cannot be normalized.
    #[error("provider {provider} error: {message}")]
    Provider {
        /// Name of the provider, such as `anthropic`.
        provider: &'static str,
        /// Human-readable error message.
        message: String,
    },
}

impl LLMError {
    /// Creates an [`LLMError::Transport`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::error::LLMError;
    ///
    /// let err = LLMError::transport("dns lookup failed");
    /// assert!(matches!(err, LLMError::Transport { .. }));
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Provider`] with the given provider name and message.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::error::LLMError;
    ///
    /// let err = LLMError::provider("openai", "bad JSON payload");
    /// assert!(matches!(err, LLMError::Provider { provider: "openai", .. }));
    /// ```
    pub fn provider<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Aborted`].
    pub fn aborted<T: Into<String>>(message: T) -> Self {
        Self::Aborted {
            message: message.into(),
        }
    }
}

/// Maps a non-success response onto an [`LLMError`].
///
/// OpenAI and Anthropic share the `{"error": {"message", "type", "code"}}` envelope,
/// so one parser serves both. Bodies that do not match fall back to
/// [`LLMError::Api`] carrying the raw text.
pub(crate) fn parse_api_error(
    provider: &'static str,
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> LLMError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<InnerError>,
    }

    #[derive(Deserialize)]
    struct InnerError {
        message: Option<Value>,
        r#type: Option<String>,
        code: Option<Value>,
    }

    let parsed = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error);
    let Some(error) = parsed else {
        let message = if body.trim().is_empty() {
            "status code (no body)".to_string()
        } else {
            body.to_string()
        };
        return LLMError::Api {
            provider,
            status,
            message,
            kind: None,
            code: None,
        };
    };

    let mut message = match error.message {
        Some(Value::String(text)) => text,
        Some(other) => other.to_string(),
        None => "unknown error".to_string(),
    };
    let code = error.code.and_then(|value| match value {
        Value::String(text) => Some(text),
        Value::Null => None,
        other => Some(other.to_string()),
    });
    if let Some(code) = &code {
        message = format!("{message} ({code})");
    }

    match status {
        401 | 403 => LLMError::Auth { message },
        429 => LLMError::RateLimit {
            message,
            retry_after,
        },
        400 | 422 => LLMError::Validation { message },
        _ => LLMError::Api {
            provider,
            status,
            message,
            kind: error.r#type,
            code,
        },
    }
}
