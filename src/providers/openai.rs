use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::{Value, json};

use super::retry::{format_error_parts, send_with_retry};
use super::{
    CompletionOptions, MessagePart, Provider, ProviderFuture, ProviderResponse, ProviderUsage,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub(crate) const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub(crate) const GROQ_DEFAULT_MODEL: &str = "meta-llama/llama-4-maverick-17b-128e-instruct";

/// Chat completions client. Also drives Groq, whose API is wire compatible.
#[derive(Debug, Clone)]
pub struct OpenAI {
    client: reqwest::Client,
    label: &'static str,
    key: String,
    model: String,
    base_url: String,
    parts: Vec<MessagePart>,
}

impl OpenAI {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            label: "OpenAI",
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: env_or("OPENAI_BASE_URL", DEFAULT_BASE_URL),
            parts: Vec::new(),
        }
    }

    pub fn groq(key: impl Into<String>) -> Self {
        Self {
            label: "Groq",
            model: GROQ_DEFAULT_MODEL.to_string(),
            base_url: env_or("GROQ_BASE_URL", GROQ_BASE_URL),
            ..Self::new(key)
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

}

impl Provider for OpenAI {
    fn append_user_input(mut self, input: String) -> Self {
        self.parts.push(MessagePart::Text(input));
        self
    }

    fn append_user_data(mut self, data: crate::data::DataAttachment) -> Self {
        self.parts.push(MessagePart::Data(data));
        self
    }

    fn complete(self, options: CompletionOptions) -> ProviderFuture {
        Box::pin(async move {
            let url = format!("{}/chat/completions", self.base_url);
            let body = build_body(&self.model, self.parts, &options);
            let text = send_with_retry(
                self.label,
                || {
                    self.client
                        .post(&url)
                        .bearer_auth(&self.key)
                        .timeout(options.timeout)
                        .json(&body)
                },
                extract_openai_error,
            )
            .await?;
            extract_text_response(&text, &self.model)
        })
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
        .trim_end_matches('/')
        .to_string()
}

fn build_body(model: &str, parts: Vec<MessagePart>, options: &CompletionOptions) -> Value {
    let content = parts
        .into_iter()
        .map(|part| match part {
            MessagePart::Text(text) => json!({"type": "text", "text": text}),
            MessagePart::Data(data) => {
                let url = format!("data:{};base64,{}", data.mime, BASE64.encode(&data.bytes));
                json!({"type": "image_url", "image_url": {"url": url}})
            }
        })
        .collect::<Vec<_>>();

    json!({
        "model": model,
        "messages": [{"role": "user", "content": content}],
        "temperature": options.temperature,
        "max_completion_tokens": options.max_tokens
    })
}

fn extract_text_response(text: &str, fallback_model: &str) -> Result<ProviderResponse> {
    let payload: OpenAIResponse =
        serde_json::from_str(text).with_context(|| "failed to parse chat completion JSON")?;
    let choice = payload
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no choices returned from chat completion"))?;
    let model = payload
        .model
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage.map(|usage| ProviderUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    });
    Ok(ProviderResponse {
        text: choice.message.content.unwrap_or_default(),
        model,
        usage,
    })
}

fn extract_openai_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<OpenAIError>,
    }

    #[derive(Deserialize)]
    struct OpenAIError {
        message: Option<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
        code: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(error.message, error.kind, error.code))
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    model: Option<String>,
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}
