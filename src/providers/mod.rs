use anyhow::{Result, anyhow};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::data::DataAttachment;

mod claude;
mod gemini;
mod openai;
mod retry;

pub use claude::Claude;
pub use gemini::Gemini;
pub use openai::OpenAI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAI,
    Groq,
    Gemini,
    Claude,
}

impl ProviderKind {
    const DETECTION_ORDER: [ProviderKind; 4] = [
        ProviderKind::Groq,
        ProviderKind::OpenAI,
        ProviderKind::Gemini,
        ProviderKind::Claude,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAI),
            "groq" => Some(ProviderKind::Groq),
            "gemini" | "google" => Some(ProviderKind::Gemini),
            "claude" | "anthropic" => Some(ProviderKind::Claude),
            _ => None,
        }
    }

    pub fn key_env_vars(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::OpenAI => &["OPENAI_API_KEY"],
            ProviderKind::Groq => &["GROQ_API_KEY"],
            ProviderKind::Gemini => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
            ProviderKind::Claude => &["ANTHROPIC_API_KEY"],
        }
    }

    fn env_key(&self) -> Option<String> {
        self.key_env_vars().iter().find_map(|name| get_env(name))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Groq => "groq",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Claude => "claude",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => openai::DEFAULT_MODEL,
            ProviderKind::Groq => openai::GROQ_DEFAULT_MODEL,
            ProviderKind::Gemini => gemini::DEFAULT_MODEL,
            ProviderKind::Claude => claude::DEFAULT_MODEL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSelection {
    pub provider: ProviderKind,
    pub requested_model: Option<String>,
}

/// Sampling and transport limits for a single completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 1024,
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderResponse {
    pub text: String,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

/// One piece of the single user turn sent to a backend.
#[derive(Debug, Clone)]
pub enum MessagePart {
    Text(String),
    Data(DataAttachment),
}

pub type ProviderFuture = Pin<Box<dyn Future<Output = Result<ProviderResponse>> + Send>>;

/// A chat-style model endpoint. Builders consume `self`, so a configured
/// provider can be cloned per request.
pub trait Provider: Clone + Send + Sync {
    fn append_user_input(self, input: String) -> Self;
    fn append_user_data(self, data: DataAttachment) -> Self;
    fn complete(self, options: CompletionOptions) -> ProviderFuture;
}

#[derive(Debug, Clone)]
pub enum ProviderImpl {
    OpenAI(OpenAI),
    Gemini(Gemini),
    Claude(Claude),
}

impl Provider for ProviderImpl {
    fn append_user_input(self, input: String) -> Self {
        match self {
            ProviderImpl::OpenAI(provider) => {
                ProviderImpl::OpenAI(provider.append_user_input(input))
            }
            ProviderImpl::Gemini(provider) => {
                ProviderImpl::Gemini(provider.append_user_input(input))
            }
            ProviderImpl::Claude(provider) => {
                ProviderImpl::Claude(provider.append_user_input(input))
            }
        }
    }

    fn append_user_data(self, data: DataAttachment) -> Self {
        match self {
            ProviderImpl::OpenAI(provider) => ProviderImpl::OpenAI(provider.append_user_data(data)),
            ProviderImpl::Gemini(provider) => ProviderImpl::Gemini(provider.append_user_data(data)),
            ProviderImpl::Claude(provider) => ProviderImpl::Claude(provider.append_user_data(data)),
        }
    }

    fn complete(self, options: CompletionOptions) -> ProviderFuture {
        match self {
            ProviderImpl::OpenAI(provider) => provider.complete(options),
            ProviderImpl::Gemini(provider) => provider.complete(options),
            ProviderImpl::Claude(provider) => provider.complete(options),
        }
    }
}

pub fn build_provider(provider: ProviderKind, key: String, model: String) -> ProviderImpl {
    match provider {
        ProviderKind::OpenAI => ProviderImpl::OpenAI(OpenAI::new(key).with_model(model)),
        ProviderKind::Groq => ProviderImpl::OpenAI(OpenAI::groq(key).with_model(model)),
        ProviderKind::Gemini => ProviderImpl::Gemini(Gemini::new(key).with_model(model)),
        ProviderKind::Claude => ProviderImpl::Claude(Claude::new(key).with_model(model)),
    }
}

pub fn resolve_provider_selection(
    model_arg: Option<&str>,
    override_key: Option<&str>,
) -> Result<ProviderSelection> {
    match model_arg {
        Some(model) => parse_model_arg(model),
        None => default_provider_selection(override_key),
    }
}

/// `--key` wins over the environment.
pub fn resolve_key(provider: ProviderKind, override_key: Option<&str>) -> Result<String> {
    override_key
        .map(|key| key.to_string())
        .or_else(|| provider.env_key())
        .ok_or_else(|| {
            anyhow!(
                "API key not found for provider {} (set {})",
                provider.as_str(),
                provider.key_env_vars().join(" or ")
            )
        })
}

// First provider with a key in the environment. A bare `--key` means Groq.
fn default_provider_selection(override_key: Option<&str>) -> Result<ProviderSelection> {
    let provider = ProviderKind::DETECTION_ORDER
        .into_iter()
        .find(|kind| kind.env_key().is_some())
        .or_else(|| override_key.map(|_| ProviderKind::Groq))
        .ok_or_else(|| {
            let checked = ProviderKind::DETECTION_ORDER
                .iter()
                .map(|kind| kind.key_env_vars().join("/"))
                .collect::<Vec<_>>();
            anyhow!("no API keys found (checked {})", checked.join(", "))
        })?;
    Ok(ProviderSelection {
        provider,
        requested_model: None,
    })
}

fn parse_model_arg(model_arg: &str) -> Result<ProviderSelection> {
    let raw = model_arg.trim();
    if raw.is_empty() {
        return Err(anyhow!("model argument is empty"));
    }
    let (name, model) = match raw.split_once(':') {
        Some((name, model)) => (name, Some(model.trim())),
        None => (raw, None),
    };
    let provider = ProviderKind::from_name(name).ok_or_else(|| {
        anyhow!(
            "unable to infer provider from model '{}'. Use provider:model (groq:, openai:, gemini:, claude:)",
            raw
        )
    })?;
    Ok(ProviderSelection {
        provider,
        requested_model: model
            .filter(|value| !value.is_empty())
            .map(|value| value.to_string()),
    })
}

fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_only_model_arg_uses_default_model() {
        let selection = parse_model_arg("Groq").expect("selection");
        assert_eq!(selection.provider, ProviderKind::Groq);
        assert!(selection.requested_model.is_none());
    }

    #[test]
    fn model_ids_may_contain_slashes() {
        let selection =
            parse_model_arg("groq:meta-llama/llama-4-scout-17b-16e-instruct").expect("selection");
        assert_eq!(selection.provider, ProviderKind::Groq);
        assert_eq!(
            selection.requested_model.as_deref(),
            Some("meta-llama/llama-4-scout-17b-16e-instruct")
        );
    }

    #[test]
    fn aliases_and_empty_model_suffix() {
        let selection = parse_model_arg(" anthropic: ").expect("selection");
        assert_eq!(selection.provider, ProviderKind::Claude);
        assert!(selection.requested_model.is_none());
        assert_eq!(ProviderKind::from_name("Google"), Some(ProviderKind::Gemini));
        assert_eq!(ProviderKind::Gemini.key_env_vars().len(), 2);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = parse_model_arg("mistral:large").unwrap_err();
        assert!(err.to_string().contains("unable to infer provider"));
    }

    #[test]
    fn override_key_is_used_verbatim() {
        let key = resolve_key(ProviderKind::Claude, Some("sk-test")).expect("key");
        assert_eq!(key, "sk-test");
    }
}
