pub mod openai_compat;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::config::Config;

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

pub const KNOWN_PROVIDERS: &[&str] = &["openai", "anthropic", "gemini", "openrouter", "ollama"];

/// Provider name and the model id to send on the wire.
///
/// An explicit `provider.default` wins; otherwise a `name/` prefix on the
/// model selects the provider. Models without a known prefix go to OpenAI.
/// OpenRouter model ids keep their own `vendor/` prefix.
pub fn resolve_model(config: &Config) -> (String, String) {
    let model = config.provider.model.trim();
    let prefixed = model
        .split_once('/')
        .filter(|(prefix, _)| KNOWN_PROVIDERS.contains(prefix));

    let provider = match (&config.provider.default, prefixed) {
        (Some(name), _) if !name.trim().is_empty() => name.trim().to_lowercase(),
        (_, Some((prefix, _))) => prefix.to_string(),
        _ => "openai".to_string(),
    };

    let wire_model = match prefixed {
        Some((prefix, rest)) if prefix == provider => rest.to_string(),
        _ => model.to_string(),
    };
    (provider, wire_model)
}

/// `OLLAMA_HOST` wins over the configured host; a bare `host:port` gets `http://`.
fn ollama_base_url(configured: Option<&str>) -> String {
    let env_host = std::env::var("OLLAMA_HOST").ok();
    let host = [env_host.as_deref(), configured]
        .into_iter()
        .flatten()
        .map(|h| h.trim().trim_end_matches('/'))
        .find(|h| !h.is_empty())
        .unwrap_or(DEFAULT_OLLAMA_HOST);
    let host = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    };
    format!("{host}/v1")
}

pub fn default_base_url(provider: &str) -> anyhow::Result<String> {
    Ok(match provider {
        "openai" => "https://api.openai.com/v1".into(),
        "anthropic" => "https://api.anthropic.com/v1".into(),
        "gemini" => "https://generativelanguage.googleapis.com/v1beta/openai".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "ollama" => ollama_base_url(None),
        _ => anyhow::bail!("Unknown provider: {provider}"),
    })
}

/// Factory: build a chat client for the configured provider and model.
pub fn create_provider(config: &Config) -> anyhow::Result<openai_compat::OpenAICompatProvider> {
    let (name, model) = resolve_model(config);
    let base_url = match &config.provider.base_url {
        Some(url) if !url.trim().is_empty() => url.trim().trim_end_matches('/').to_string(),
        _ if name == "ollama" => ollama_base_url(config.provider.ollama_host.as_deref()),
        _ => default_base_url(&name)?,
    };
    let api_key = if name == "ollama" {
        config
            .provider
            .resolve_api_key(&name)
            .unwrap_or_else(|_| Zeroizing::new("ollama".into()))
    } else {
        config.provider.resolve_api_key(&name)?
    };
    tracing::debug!("provider={name} model={model} base_url={base_url}");
    openai_compat::OpenAICompatProvider::new(
        api_key,
        base_url,
        model,
        config.provider.max_tokens,
        config.provider.timeout_seconds,
    )
}

/// Text of the first choice in an OpenAI-format response.
pub fn parse_openai_response(json: &serde_json::Value) -> anyhow::Result<String> {
    let choice = json["choices"]
        .get(0)
        .ok_or_else(|| anyhow::anyhow!("No choices in response"))?;
    let content = choice["message"]["content"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("Response has no message content"))?;
    Ok(content.trim().to_string())
}
