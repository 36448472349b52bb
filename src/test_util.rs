use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{ImageFormat, Rgb, RgbImage};

use crate::data::DataAttachment;
use crate::prompts::DIAGRAM_SECTION_MARKER;
use crate::providers::{
    CompletionOptions, Provider, ProviderFuture, ProviderResponse, ProviderUsage,
};

pub(crate) fn with_temp_home<F, R>(func: F) -> R
where
    F: FnOnce(&Path) -> R,
{
    static HOME_MUTEX: Mutex<()> = Mutex::new(());
    let _guard = HOME_MUTEX.lock().unwrap_or_else(|poison| poison.into_inner());
    let dir = tempfile::tempdir().expect("tempdir");
    let old_home = std::env::var("HOME").ok();
    // SAFETY: HOME is only mutated while HOME_MUTEX is held.
    unsafe { std::env::set_var("HOME", dir.path()) };
    let result = func(dir.path());
    unsafe {
        match old_home {
            Some(old) => std::env::set_var("HOME", old),
            None => std::env::remove_var("HOME"),
        }
    }
    result
}

/// Writes an image whose pixel at (x, y) encodes x in red and y in green, so
/// crops can be checked by sampling.
pub(crate) fn write_gradient_png(path: &Path, width: u32, height: u32) {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    image
        .save_with_format(path, ImageFormat::Png)
        .expect("write test png");
}

#[derive(Debug, Clone, Default)]
pub(crate) struct PageScript {
    pub(crate) transcript: String,
    pub(crate) detection: String,
    pub(crate) delay: Duration,
    pub(crate) fail_detection: bool,
}

/// Answers by attachment name: the text prompt gets the transcript, the
/// diagram prompt gets the detection response.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedProvider {
    scripts: Arc<HashMap<String, PageScript>>,
    calls: Arc<Mutex<Vec<String>>>,
    prompt: String,
    attachment: Option<String>,
}

impl ScriptedProvider {
    pub(crate) fn new(scripts: HashMap<String, PageScript>) -> Self {
        Self {
            scripts: Arc::new(scripts),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl Provider for ScriptedProvider {
    fn append_user_input(mut self, input: String) -> Self {
        self.prompt.push_str(&input);
        self
    }

    fn append_user_data(mut self, data: DataAttachment) -> Self {
        self.attachment = data.name;
        self
    }

    fn complete(self, _options: CompletionOptions) -> ProviderFuture {
        Box::pin(async move {
            let name = self.attachment.clone().unwrap_or_default();
            let detect = self.prompt.contains(DIAGRAM_SECTION_MARKER);
            let kind = if detect { "detect" } else { "transcribe" };
            self.calls
                .lock()
                .expect("calls lock")
                .push(format!("{kind}:{name}"));
            let script = self
                .scripts
                .get(&name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no script for {}", name))?;
            if !script.delay.is_zero() {
                tokio::time::sleep(script.delay).await;
            }
            if detect && script.fail_detection {
                return Err(anyhow::anyhow!("Scripted API error (500): boom"));
            }
            let text = if detect {
                script.detection
            } else {
                script.transcript
            };
            Ok(ProviderResponse {
                text,
                model: Some("scripted".to_string()),
                usage: Some(ProviderUsage {
                    prompt_tokens: Some(1),
                    completion_tokens: Some(1),
                    total_tokens: Some(2),
                }),
            })
        })
    }
}
