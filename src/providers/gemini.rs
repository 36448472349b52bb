use anyhow::{Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::{Value, json};

use super::retry::{format_error_parts, send_with_retry};
use super::{
    CompletionOptions, MessagePart, Provider, ProviderFuture, ProviderResponse, ProviderUsage,
};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub(crate) const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Clone)]
pub struct Gemini {
    client: reqwest::Client,
    key: String,
    model: String,
    parts: Vec<MessagePart>,
}

impl Gemini {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            parts: Vec::new(),
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

impl Provider for Gemini {
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
            let url = format!("{}/{}:generateContent", BASE_URL, self.model);
            let body = build_body(self.parts, &options);
            let text = send_with_retry(
                "Gemini",
                || {
                    self.client
                        .post(&url)
                        .header("x-goog-api-key", &self.key)
                        .timeout(options.timeout)
                        .json(&body)
                },
                extract_gemini_error,
            )
            .await?;
            extract_text_response(&text, &self.model)
        })
    }
}

fn build_body(parts: Vec<MessagePart>, options: &CompletionOptions) -> Value {
    let parts = parts
        .into_iter()
        .map(|part| match part {
            MessagePart::Text(text) => json!({"text": text}),
            MessagePart::Data(data) => json!({
                "inline_data": {
                    "mime_type": data.mime,
                    "data": BASE64.encode(&data.bytes)
                }
            }),
        })
        .collect::<Vec<_>>();

    json!({
        "contents": [{"role": "user", "parts": parts}],
        "generationConfig": {
            "temperature": options.temperature,
            "maxOutputTokens": options.max_tokens
        }
    })
}

fn extract_text_response(text: &str, fallback_model: &str) -> Result<ProviderResponse> {
    let payload: GeminiResponse = serde_json::from_str(text)
        .map_err(|err| anyhow!("failed to parse Gemini response JSON: {}", err))?;
    let candidate = payload
        .candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .ok_or_else(|| anyhow!("no candidate returned from Gemini"))?;

    let text = candidate
        .parts
        .iter()
        .filter_map(|part| part.text.as_deref())
        .collect::<Vec<_>>()
        .join("");
    let model = payload
        .model_version
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage_metadata.map(|usage| ProviderUsage {
        prompt_tokens: usage.prompt_token_count,
        completion_tokens: usage.candidates_token_count,
        total_tokens: usage.total_token_count,
    });
    Ok(ProviderResponse { text, model, usage })
}

fn extract_gemini_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<GeminiError>,
    }

    #[derive(Deserialize)]
    struct GeminiError {
        message: Option<String>,
        status: Option<String>,
        code: Option<i32>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(
        error.message,
        error.status,
        error.code.map(|value| value.to_string()),
    ))
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
    #[serde(rename = "modelVersion")]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}
