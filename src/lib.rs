use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;

pub mod bounds;
pub mod crop;
pub mod data;
pub mod docx;
pub mod error;
pub mod logging;
pub mod page;
pub mod pipeline;
pub mod prompts;
mod providers;
pub mod settings;
#[cfg(test)]
mod test_util;
pub mod vision;

pub use bounds::{BoundingBox, PixelRect, parse_diagram_bounds};
pub use docx::DocumentStyle;
pub use error::{ModelStage, PipelineError};
pub use page::{CroppedDiagram, PageContent};
pub use pipeline::{ConvertRequest, convert};
pub use providers::{CompletionOptions, Provider, ProviderFuture, ProviderResponse, ProviderUsage};
pub use vision::VisionClient;

#[derive(Debug, Clone)]
pub struct Config {
    pub images: Vec<PathBuf>,
    pub output: PathBuf,
    pub model: Option<String>,
    pub key: Option<String>,
    /// `Some(0)` means one page per CPU.
    pub concurrency: Option<usize>,
    pub work_dir: Option<PathBuf>,
    pub settings_path: Option<PathBuf>,
}

/// Resolves settings and the provider, then converts the images. Returns
/// the path of the written document.
pub async fn run(config: Config) -> Result<PathBuf> {
    let settings = settings::load_settings(config.settings_path.as_deref())?;

    let selection =
        providers::resolve_provider_selection(config.model.as_deref(), config.key.as_deref())?;
    let key = providers::resolve_key(selection.provider, config.key.as_deref())
        .with_context(|| "no API key found for selected provider")?;
    let model = selection
        .requested_model
        .unwrap_or_else(|| selection.provider.default_model().to_string());
    info!("using {}:{}", selection.provider.as_str(), model);

    let provider = providers::build_provider(selection.provider, key, model);
    let client = VisionClient::new(provider, &settings.model);
    let request = ConvertRequest {
        images: config.images,
        output: config.output,
        work_dir: config.work_dir,
        concurrency: resolve_concurrency(config.concurrency, settings.concurrency),
    };
    let style = DocumentStyle::from(&settings.document);
    convert(&client, &request, &style).await
}

fn resolve_concurrency(requested: Option<usize>, configured: usize) -> usize {
    match requested {
        Some(0) => num_cpus::get(),
        Some(value) => value,
        None => configured.max(1),
    }
}
