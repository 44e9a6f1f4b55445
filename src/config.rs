use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::LLMClient;
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::provider::{AnthropicProvider, DynProvider, OpenAiProvider};

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const OPENAI_ORG_ENV: &str = "OPENAI_ORG_ID";

/// One callable backend, addressed by `handle`.
///
/// # Examples
///
/// ```
/// use llm_relay::config::{Credential, ModelConfig, ProviderKind};
///
/// let config: ModelConfig = serde_json::from_str(r#"{
///     "handle": "claude",
///     "provider": "anthropic",
///     "credential": { "type": "env" },
///     "default_model": "claude-3-5-haiku-latest"
/// }"#).unwrap();
/// assert_eq!(config.provider, ProviderKind::Anthropic);
/// assert!(matches!(config.credential, Credential::Env { var: None }));
/// assert_eq!(config.timeout_secs, 60);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Caller-chosen name, e.g. `default-openai`.
    pub handle: String,
    pub provider: ProviderKind,
    pub credential: Credential,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// `OpenAI-Organization`; falls back to `OPENAI_ORG_ID` for OpenAI.
    #[serde(default)]
    pub organization: Option<String>,
    /// `anthropic-version` override.
    #[serde(default)]
    pub version: Option<String>,
    /// `anthropic-beta` value.
    #[serde(default)]
    pub beta: Option<String>,
    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    /// Environment variable consulted by [`Credential::Env`] when no name is given.
    pub fn default_key_env(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// Vendor API key: `Authorization: Bearer` for OpenAI, `x-api-key` for Anthropic.
    ApiKey { key: String },
    /// Sent as `Authorization: Bearer` for both vendors, e.g. an OAuth token
    /// or a gateway token in front of Anthropic.
    Bearer { token: String },
    /// Read the key from an environment variable at build time.
    Env {
        #[serde(default)]
        var: Option<String>,
    },
    /// For local gateways that need no authentication.
    None,
}

/// Builds an [`LLMClient`] with one provider per config, all sharing `transport`.
///
/// # Errors
///
/// Returns [`LLMError::InvalidConfig`] for duplicate handles or
/// [`LLMError::Auth`] when a credential cannot be resolved.
pub fn build_client_from_configs(
    configs: &[ModelConfig],
    transport: DynHttpTransport,
) -> Result<LLMClient, LLMError> {
    let mut builder = LLMClient::builder();
    let mut seen = Vec::with_capacity(configs.len());

    for config in configs {
        if seen.contains(&config.handle.as_str()) {
            return Err(LLMError::InvalidConfig {
                field: "handle".to_string(),
                reason: format!("duplicate handle {}", config.handle),
            });
        }
        seen.push(config.handle.as_str());

        let provider = build_provider_from_config(config, transport.clone())?;
        tracing::debug!(handle = %config.handle, provider = provider.name(), "registered provider");
        builder = builder.register_handle(config.handle.clone(), provider);
    }

    Ok(builder.build())
}

fn build_provider_from_config(
    config: &ModelConfig,
    transport: DynHttpTransport,
) -> Result<DynProvider, LLMError> {
    let auth = resolve_credential(&config.credential, config.provider)?;
    let timeout = Duration::from_secs(config.timeout_secs);

    let provider: DynProvider = match config.provider {
        ProviderKind::OpenAi => {
            let key = match auth {
                ResolvedAuth::ApiKey(key) | ResolvedAuth::Bearer(key) => key,
                ResolvedAuth::None => String::new(),
            };
            let mut provider = OpenAiProvider::new(transport, key).with_timeout(timeout);

            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            if let Some(model) = &config.default_model {
                provider = provider.with_default_model(model.clone());
            }
            let organization = config
                .organization
                .clone()
                .or_else(|| std::env::var(OPENAI_ORG_ENV).ok());
            if let Some(organization) = organization {
                provider = provider.with_organization(organization);
            }
            for (name, value) in &config.headers {
                provider = provider.with_header(name.clone(), value.clone());
            }

            Arc::new(provider)
        }
        ProviderKind::Anthropic => {
            let mut provider = match auth {
                ResolvedAuth::ApiKey(key) => AnthropicProvider::new(transport, key),
                ResolvedAuth::Bearer(token) => {
                    AnthropicProvider::new(transport, String::new()).with_auth_token(token)
                }
                ResolvedAuth::None => AnthropicProvider::new(transport, String::new()),
            }
            .with_timeout(timeout);

            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            if let Some(model) = &config.default_model {
                provider = provider.with_default_model(model.clone());
            }
            if let Some(version) = &config.version {
                provider = provider.with_version(version.clone());
            }
            if let Some(beta) = &config.beta {
                provider = provider.with_beta(beta.clone());
            }
            for (name, value) in &config.headers {
                provider = provider.with_header(name.clone(), value.clone());
            }

            Arc::new(provider)
        }
    };

    Ok(provider)
}

#[derive(Debug, PartialEq, Eq)]
enum ResolvedAuth {
    ApiKey(String),
    Bearer(String),
    None,
}

fn resolve_credential(
    credential: &Credential,
    provider: ProviderKind,
) -> Result<ResolvedAuth, LLMError> {
    match credential {
        Credential::ApiKey { key } => Ok(ResolvedAuth::ApiKey(key.clone())),
        Credential::Bearer { token } => Ok(ResolvedAuth::Bearer(token.clone())),
        Credential::Env { var } => {
            let name = var.as_deref().unwrap_or(provider.default_key_env());
            match std::env::var(name) {
                Ok(key) if !key.trim().is_empty() => Ok(ResolvedAuth::ApiKey(key)),
                _ => Err(LLMError::Auth {
                    message: format!(
                        "missing {} API key: set the {name} environment variable",
                        provider.as_str()
                    ),
                }),
            }
        }
        Credential::None => Ok(ResolvedAuth::None),
    }
}
