use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort a conversion. Wrapped in `anyhow::Error` on the way
/// up; callers recover the kind with `downcast_ref::<PipelineError>()`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to read image {}: {reason}", path.display())]
    ImageRead { path: PathBuf, reason: String },
    #[error("{stage} request failed for page {page}")]
    ModelCall {
        stage: ModelStage,
        page: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStage {
    Transcribe,
    Detect,
}

impl ModelStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStage::Transcribe => "transcription",
            ModelStage::Detect => "diagram detection",
        }
    }
}

impl fmt::Display for ModelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PipelineError {
    pub(crate) fn image_read(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        PipelineError::ImageRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn model_call(stage: ModelStage, page: usize, source: anyhow::Error) -> Self {
        PipelineError::ModelCall {
            stage,
            page,
            source: source.into(),
        }
    }
}
