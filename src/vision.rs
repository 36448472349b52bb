use anyhow::Result;
use std::path::Path;
use tracing::debug;

use crate::data::{self, DataAttachment};
use crate::prompts::{DIAGRAM_PROMPT, TRANSCRIBE_PROMPT};
use crate::providers::{CompletionOptions, Provider, ProviderResponse};
use crate::settings::ModelSettings;

/// The two vision requests made per page, sharing one configured provider.
#[derive(Debug, Clone)]
pub struct VisionClient<P: Provider> {
    provider: P,
    text_options: CompletionOptions,
    diagram_options: CompletionOptions,
}

impl<P: Provider> VisionClient<P> {
    pub fn new(provider: P, settings: &ModelSettings) -> Self {
        let base = CompletionOptions {
            temperature: settings.temperature,
            max_tokens: settings.text_max_tokens,
            timeout: settings.timeout,
        };
        Self {
            provider,
            text_options: base,
            diagram_options: CompletionOptions {
                max_tokens: settings.diagram_max_tokens,
                ..base
            },
        }
    }

    /// Returns the verbatim transcription of the page; possibly empty.
    pub async fn transcribe(&self, image: DataAttachment) -> Result<String> {
        let name = image.name.clone().unwrap_or_default();
        let response = self
            .ask(TRANSCRIBE_PROMPT, image, self.text_options)
            .await?;
        log_response("transcription", &name, &response);
        Ok(response.text)
    }

    /// Re-reads the image at `image_path` and returns the detector's raw
    /// `[RAW_TEXT]` / `[DIAGRAMS]` response.
    pub async fn detect_diagrams(&self, image_path: &Path) -> Result<String> {
        let image = data::load_image(image_path)?;
        let name = image.name.clone().unwrap_or_default();
        let response = self
            .ask(DIAGRAM_PROMPT, image, self.diagram_options)
            .await?;
        log_response("diagram detection", &name, &response);
        Ok(response.text)
    }

    async fn ask(
        &self,
        prompt: &str,
        image: DataAttachment,
        options: CompletionOptions,
    ) -> Result<ProviderResponse> {
        self.provider
            .clone()
            .append_user_input(prompt.to_string())
            .append_user_data(image)
            .complete(options)
            .await
    }
}

fn log_response(stage: &str, name: &str, response: &ProviderResponse) {
    let tokens = response
        .usage
        .as_ref()
        .and_then(|usage| usage.total_tokens)
        .map(|total| total.to_string())
        .unwrap_or_else(|| "unavailable".to_string());
    debug!(
        "{} for {}: {} chars (model: {}, tokens: {})",
        stage,
        name,
        response.text.len(),
        response.model.as_deref().unwrap_or("unavailable"),
        tokens
    );
}
