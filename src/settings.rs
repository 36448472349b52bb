use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub model: ModelSettings,
    pub document: DocumentSettings,
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub text_max_tokens: u32,
    pub diagram_max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DocumentSettings {
    pub font_family: String,
    pub body_font_size: f32,
    pub heading_font_size: f32,
    pub subheading_font_size: f32,
    pub label_font_size: f32,
    pub max_image_width_in: f64,
    pub max_image_height_in: f64,
    pub pixels_per_inch: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: ModelSettings::default(),
            document: DocumentSettings::default(),
            concurrency: 1,
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            text_max_tokens: 1024,
            diagram_max_tokens: 2048,
            temperature: 0.0,
            timeout: Duration::from_secs(120),
        }
    }
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            font_family: "Arial".to_string(),
            body_font_size: 12.0,
            heading_font_size: 16.0,
            subheading_font_size: 14.0,
            label_font_size: 11.0,
            max_image_width_in: 6.0,
            max_image_height_in: 4.0,
            pixels_per_inch: 96.0,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    model: Option<ModelSection>,
    document: Option<DocumentSection>,
    system: Option<SystemSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelSection {
    text_max_tokens: Option<u32>,
    diagram_max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DocumentSection {
    font_family: Option<String>,
    body_font_size: Option<f32>,
    heading_font_size: Option<f32>,
    subheading_font_size: Option<f32>,
    label_font_size: Option<f32>,
    max_image_width_in: Option<f64>,
    max_image_height_in: Option<f64>,
    pixels_per_inch: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct SystemSection {
    concurrency: Option<usize>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed = parse_settings(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }

    Ok(settings)
}

fn parse_settings(content: &str) -> Result<SettingsFile> {
    Ok(toml::from_str(content)?)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(model) = incoming.model {
            self.model.merge(model);
        }
        if let Some(document) = incoming.document {
            self.document.merge(document);
        }
        if let Some(system) = incoming.system
            && let Some(concurrency) = system.concurrency
            && concurrency > 0
        {
            self.concurrency = concurrency;
        }
    }
}

impl ModelSettings {
    fn merge(&mut self, incoming: ModelSection) {
        if let Some(tokens) = incoming.text_max_tokens.filter(|value| *value > 0) {
            self.text_max_tokens = tokens;
        }
        if let Some(tokens) = incoming.diagram_max_tokens.filter(|value| *value > 0) {
            self.diagram_max_tokens = tokens;
        }
        if let Some(temperature) = incoming.temperature.filter(|value| *value >= 0.0) {
            self.temperature = temperature;
        }
        if let Some(secs) = incoming.timeout_secs.filter(|value| *value > 0) {
            self.timeout = Duration::from_secs(secs);
        }
    }
}

impl DocumentSettings {
    fn merge(&mut self, incoming: DocumentSection) {
        if let Some(family) = incoming.font_family
            && !family.trim().is_empty()
        {
            self.font_family = family;
        }
        merge_positive(&mut self.body_font_size, incoming.body_font_size);
        merge_positive(&mut self.heading_font_size, incoming.heading_font_size);
        merge_positive(&mut self.subheading_font_size, incoming.subheading_font_size);
        merge_positive(&mut self.label_font_size, incoming.label_font_size);
        merge_positive(&mut self.max_image_width_in, incoming.max_image_width_in);
        merge_positive(&mut self.max_image_height_in, incoming.max_image_height_in);
        merge_positive(&mut self.pixels_per_inch, incoming.pixels_per_inch);
    }
}

fn merge_positive<T: PartialOrd + Default + Copy>(target: &mut T, incoming: Option<T>) {
    if let Some(value) = incoming
        && value > T::default()
    {
        *target = value;
    }
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".notes-to-docx"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_temp_home;

    #[test]
    fn bundled_defaults_match_builtin_defaults() {
        let mut settings = Settings::default();
        settings.merge(parse_settings(DEFAULT_SETTINGS_TOML).expect("parse defaults"));
        let builtin = Settings::default();
        assert_eq!(settings.model.text_max_tokens, builtin.model.text_max_tokens);
        assert_eq!(
            settings.model.diagram_max_tokens,
            builtin.model.diagram_max_tokens
        );
        assert_eq!(settings.model.timeout, builtin.model.timeout);
        assert_eq!(settings.document.font_family, "Arial");
        assert_eq!(settings.document.pixels_per_inch, 96.0);
        assert_eq!(settings.concurrency, 1);
    }

    #[test]
    fn non_positive_values_are_ignored() {
        let mut settings = Settings::default();
        let parsed = parse_settings(
            r#"
[model]
text_max_tokens = 0
timeout_secs = 30

[document]
font_family = "  "
max_image_width_in = -1.0
label_font_size = 10

[system]
concurrency = 0
"#,
        )
        .expect("parse");
        settings.merge(parsed);
        assert_eq!(settings.model.text_max_tokens, 1024);
        assert_eq!(settings.model.timeout, Duration::from_secs(30));
        assert_eq!(settings.document.font_family, "Arial");
        assert_eq!(settings.document.max_image_width_in, 6.0);
        assert_eq!(settings.document.label_font_size, 10.0);
        assert_eq!(settings.concurrency, 1);
    }

    #[test]
    fn extra_settings_file_overrides_defaults() {
        with_temp_home(|home| {
            let extra = home.join("extra.toml");
            fs::write(&extra, "[system]\nconcurrency = 4\n").expect("write extra");
            let settings = load_settings(Some(extra.as_path())).expect("load settings");
            assert_eq!(settings.concurrency, 4);
            assert!(home.join(".notes-to-docx/settings.toml").exists());
        });
    }

    #[test]
    fn missing_extra_settings_file_is_an_error() {
        with_temp_home(|home| {
            let err = load_settings(Some(home.join("nope.toml").as_path())).unwrap_err();
            assert!(err.to_string().contains("settings file not found"));
        });
    }
}
