use anyhow::{Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::{Value, json};

use super::retry::{format_error_parts, send_with_retry};
use super::{
    CompletionOptions, MessagePart, Provider, ProviderFuture, ProviderResponse, ProviderUsage,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
pub(crate) const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

#[derive(Debug, Clone)]
pub struct Claude {
    client: reqwest::Client,
    key: String,
    model: String,
    parts: Vec<MessagePart>,
}

impl Claude {
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

impl Provider for Claude {
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
            let url = base_url();
            let body = build_body(&self.model, self.parts, &options);
            let text = send_with_retry(
                "Claude",
                || {
                    self.client
                        .post(&url)
                        .header("x-api-key", &self.key)
                        .header("anthropic-version", "2023-06-01")
                        .timeout(options.timeout)
                        .json(&body)
                },
                extract_claude_error,
            )
            .await?;
            extract_text_response(&text, &self.model)
        })
    }
}

fn base_url() -> String {
    std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

fn build_body(model: &str, parts: Vec<MessagePart>, options: &CompletionOptions) -> Value {
    let content = parts
        .into_iter()
        .map(|part| match part {
            MessagePart::Text(text) => json!({"type": "text", "text": text}),
            MessagePart::Data(data) => json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": data.mime,
                    "data": BASE64.encode(&data.bytes)
                }
            }),
        })
        .collect::<Vec<_>>();

    json!({
        "model": model,
        "max_tokens": options.max_tokens,
        "temperature": options.temperature,
        "messages": [{"role": "user", "content": content}]
    })
}

fn extract_text_response(text: &str, fallback_model: &str) -> Result<ProviderResponse> {
    let payload: ClaudeResponse = serde_json::from_str(text)
        .map_err(|err| anyhow!("failed to parse Claude response JSON: {}", err))?;
    let text = payload
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text.as_deref())
        .collect::<Vec<_>>()
        .join("");
    let model = payload
        .model
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage.map(|usage| ProviderUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage
            .input_tokens
            .zip(usage.output_tokens)
            .map(|(input, output)| input + output),
    });
    Ok(ProviderResponse { text, model, usage })
}

fn extract_claude_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<ClaudeError>,
    }

    #[derive(Deserialize)]
    struct ClaudeError {
        #[serde(rename = "type")]
        kind: Option<String>,
        message: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(error.message, error.kind, None))
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    #[serde(default)]
    content: Vec<ClaudeContent>,
    model: Option<String>,
    usage: Option<ClaudeUsage>,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::image_from_bytes;

    #[test]
    fn concatenates_text_blocks() {
        let payload = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/claude_response.json"
        ));
        let response = extract_text_response(payload, DEFAULT_MODEL).unwrap();
        assert_eq!(
            response.text,
            "[RAW_TEXT]\nF = ma\n\n[DIAGRAMS]\nDiagram_1:\nBounds: x_min=5, y_min=40, x_max=95, y_max=80"
        );
        let usage = response.usage.expect("usage");
        assert_eq!(usage.total_tokens, Some(1300));
    }

    #[test]
    fn images_become_base64_image_blocks() {
        let body = build_body(
            DEFAULT_MODEL,
            vec![
                MessagePart::Text("find diagrams".to_string()),
                MessagePart::Data(image_from_bytes(vec![1, 2, 3], Some("scan.png"))),
            ],
            &CompletionOptions::default(),
        );
        assert_eq!(body["messages"][0]["content"][0]["text"], "find diagrams");
        let block = &body["messages"][0]["content"][1];
        assert_eq!(block["type"], "image");
        assert_eq!(block["source"]["media_type"], "image/png");
        assert_eq!(block["source"]["data"], "AQID");
    }

    #[test]
    fn error_body_is_summarized() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        assert_eq!(
            extract_claude_error(body).as_deref(),
            Some("Overloaded | type: overloaded_error")
        );
    }
}
