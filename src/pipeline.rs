use anyhow::{Context, Result};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::bounds::{self, BoundingBox};
use crate::crop;
use crate::data;
use crate::docx::{self, DocumentStyle};
use crate::error::{ModelStage, PipelineError};
use crate::page::{CroppedDiagram, PageContent};
use crate::providers::Provider;
use crate::vision::VisionClient;

pub const DEFAULT_OUTPUT: &str = "handwritten_notes.docx";

#[derive(Debug, Clone)]
pub struct ConvertRequest {
    /// Page images in reading order.
    pub images: Vec<PathBuf>,
    pub output: PathBuf,
    /// Keep intermediate crops here instead of a throwaway temp dir.
    pub work_dir: Option<PathBuf>,
    pub concurrency: usize,
}

impl ConvertRequest {
    pub fn new(images: Vec<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            images,
            output: output.into(),
            work_dir: None,
            concurrency: 1,
        }
    }
}

/// Rejects an empty list, missing files and anything that is not a
/// jpg/jpeg/png.
pub fn validate_inputs(images: &[PathBuf]) -> Result<()> {
    if images.is_empty() {
        return Err(PipelineError::InvalidInput("no images given".to_string()).into());
    }
    for path in images {
        if !path.is_file() {
            return Err(PipelineError::InvalidInput(format!(
                "image not found: {}",
                path.display()
            ))
            .into());
        }
        if !data::is_supported_page_extension(path) {
            return Err(PipelineError::InvalidInput(format!(
                "unsupported image type: {} (expected jpg, jpeg or png)",
                path.display()
            ))
            .into());
        }
    }
    Ok(())
}

/// Appends `.docx` unless the path already ends with it.
pub fn normalize_output_path(output: &Path) -> PathBuf {
    if output.as_os_str().is_empty() {
        return PathBuf::from(DEFAULT_OUTPUT);
    }
    let has_extension = output
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("docx"));
    if has_extension {
        return output.to_path_buf();
    }
    let mut name = output.as_os_str().to_owned();
    name.push(".docx");
    PathBuf::from(name)
}

pub fn diagram_dir(work_root: &Path, page_number: usize) -> PathBuf {
    work_root.join(format!("page_{}_diagrams", page_number))
}

/// Where crops go for the duration of one conversion. The temp variant is
/// deleted when dropped.
enum WorkRoot {
    Temp(TempDir),
    Kept(PathBuf),
}

impl WorkRoot {
    fn acquire(work_dir: Option<&Path>) -> Result<Self> {
        match work_dir {
            Some(dir) => {
                fs::create_dir_all(dir).with_context(|| {
                    format!("failed to create work directory: {}", dir.display())
                })?;
                Ok(WorkRoot::Kept(dir.to_path_buf()))
            }
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("notes-to-docx-")
                    .tempdir()
                    .with_context(|| "failed to create temporary work directory")?;
                Ok(WorkRoot::Temp(dir))
            }
        }
    }

    fn path(&self) -> &Path {
        match self {
            WorkRoot::Temp(dir) => dir.path(),
            WorkRoot::Kept(path) => path,
        }
    }
}

/// Runs read, transcribe, detect and crop for one page, in that order.
pub async fn extract_page<P: Provider>(
    client: &VisionClient<P>,
    image_path: &Path,
    page_number: usize,
    work_root: &Path,
) -> Result<PageContent> {
    let bytes = fs::read(image_path).map_err(|err| PipelineError::image_read(image_path, err))?;
    let image_name = image_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| image_path.display().to_string());

    let attachment = data::image_from_bytes(bytes, Some(image_name.as_str()));
    let text = client
        .transcribe(attachment)
        .await
        .map_err(|err| PipelineError::model_call(ModelStage::Transcribe, page_number, err))?;
    debug!("page {}: transcribed {} chars", page_number, text.len());

    let detection = client
        .detect_diagrams(image_path)
        .await
        .map_err(|err| PipelineError::model_call(ModelStage::Detect, page_number, err))?;
    if let Some(raw_text) = bounds::split_detection_sections(&detection).raw_text {
        debug!(
            "page {}: detector raw text has {} chars",
            page_number,
            raw_text.len()
        );
    }
    let boxes = bounds::parse_diagram_bounds(&detection);
    debug!("page {}: {} diagram box(es)", page_number, boxes.len());

    let diagrams = if boxes.is_empty() {
        Vec::new()
    } else {
        crop_in_background(image_path, boxes, diagram_dir(work_root, page_number)).await?
    };

    Ok(PageContent {
        page_number,
        image_name,
        text,
        diagrams,
    })
}

async fn crop_in_background(
    image_path: &Path,
    boxes: Vec<BoundingBox>,
    output_dir: PathBuf,
) -> Result<Vec<CroppedDiagram>> {
    let source = image_path.to_path_buf();
    tokio::task::spawn_blocking(move || crop::crop_diagrams(&source, &boxes, &output_dir))
        .await
        .with_context(|| format!("diagram cropping task failed: {}", image_path.display()))?
}

/// Extracts every page with at most `concurrency` pages in flight. Results
/// come back in input order; the first failure aborts the rest.
pub async fn extract_pages<P: Provider>(
    client: &VisionClient<P>,
    images: &[PathBuf],
    work_root: &Path,
    concurrency: usize,
) -> Result<Vec<PageContent>> {
    let total = images.len();
    stream::iter(images.iter().enumerate())
        .map(move |(idx, path)| async move {
            let page_number = idx + 1;
            info!("processing page {}/{}: {}", page_number, total, path.display());
            extract_page(client, path, page_number, work_root)
                .await
                .with_context(|| {
                    format!("failed to process page {} ({})", page_number, path.display())
                })
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}

/// Validates the inputs, extracts all pages and writes the document.
/// Returns the path actually written.
pub async fn convert<P: Provider>(
    client: &VisionClient<P>,
    request: &ConvertRequest,
    style: &DocumentStyle,
) -> Result<PathBuf> {
    validate_inputs(&request.images)?;
    let work_root = WorkRoot::acquire(request.work_dir.as_deref())?;
    debug!("work root: {}", work_root.path().display());

    let pages = extract_pages(
        client,
        &request.images,
        work_root.path(),
        request.concurrency,
    )
    .await?;

    let output = normalize_output_path(&request.output);
    let style = style.clone();
    let saved = tokio::task::spawn_blocking(move || {
        docx::write_document(&pages, &style, &output)
    })
    .await
    .with_context(|| "document assembly task failed")??;
    drop(work_root);
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ModelSettings;
    use crate::test_util::{PageScript, ScriptedProvider, write_gradient_png};
    use image::GenericImageView;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::tempdir;

    const ONE_BOX: &str = "[RAW_TEXT]\nsketch\n\n[DIAGRAMS]\nDiagram_1:\nBounds: x_min=0, y_min=0, x_max=50, y_max=50\n";
    const NO_BOXES: &str = "[RAW_TEXT]\nonly words\n\n[DIAGRAMS]\nNo diagrams found.\n";

    fn script(transcript: &str, detection: &str) -> PageScript {
        PageScript {
            transcript: transcript.to_string(),
            detection: detection.to_string(),
            ..PageScript::default()
        }
    }

    fn client(scripts: Vec<(&str, PageScript)>) -> VisionClient<ScriptedProvider> {
        let scripts = scripts
            .into_iter()
            .map(|(name, script)| (name.to_string(), script))
            .collect::<HashMap<_, _>>();
        VisionClient::new(ScriptedProvider::new(scripts), &ModelSettings::default())
    }

    fn write_pages(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                write_gradient_png(&path, 40, 40);
                path
            })
            .collect()
    }

    fn invalid_input(err: &anyhow::Error) -> Option<&str> {
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::InvalidInput(message)) => Some(message.as_str()),
            _ => None,
        }
    }

    #[test]
    fn validation_rejects_bad_inputs() {
        let dir = tempdir().expect("tempdir");
        let err = validate_inputs(&[]).unwrap_err();
        assert_eq!(invalid_input(&err), Some("no images given"));

        let missing = dir.path().join("missing.png");
        let err = validate_inputs(&[missing]).unwrap_err();
        assert!(invalid_input(&err).expect("kind").starts_with("image not found"));

        let gif = dir.path().join("page.gif");
        fs::write(&gif, b"GIF89a").expect("write");
        let err = validate_inputs(&[gif]).unwrap_err();
        assert!(
            invalid_input(&err)
                .expect("kind")
                .starts_with("unsupported image type")
        );

        let pages = write_pages(dir.path(), &["a.PNG"]);
        let jpeg = dir.path().join("b.jpeg");
        fs::write(&jpeg, b"not checked here").expect("write");
        validate_inputs(&[pages[0].clone(), jpeg]).expect("valid");
    }

    #[test]
    fn output_path_gets_docx_extension() {
        assert_eq!(
            normalize_output_path(Path::new("notes")),
            PathBuf::from("notes.docx")
        );
        assert_eq!(
            normalize_output_path(Path::new("out/Lecture.DOCX")),
            PathBuf::from("out/Lecture.DOCX")
        );
        assert_eq!(
            normalize_output_path(Path::new("week.3")),
            PathBuf::from("week.3.docx")
        );
        assert_eq!(
            normalize_output_path(Path::new("")),
            PathBuf::from(DEFAULT_OUTPUT)
        );
    }

    #[test]
    fn temporary_work_root_is_removed_on_drop() {
        let root = WorkRoot::acquire(None).expect("work root");
        let path = root.path().to_path_buf();
        assert!(path.is_dir());
        drop(root);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn crop_directory_only_when_boxes_exist() {
        let dir = tempdir().expect("tempdir");
        let pages = write_pages(dir.path(), &["p1.png", "p2.png"]);
        let work = dir.path().join("work");
        fs::create_dir_all(&work).expect("work dir");
        let client = client(vec![
            ("p1.png", script("words", NO_BOXES)),
            ("p2.png", script("", ONE_BOX)),
        ]);

        let first = extract_page(&client, &pages[0], 1, &work).await.expect("page 1");
        assert_eq!(first.text, "words");
        assert!(first.diagrams.is_empty());
        assert!(!diagram_dir(&work, 1).exists());

        let second = extract_page(&client, &pages[1], 2, &work).await.expect("page 2");
        assert_eq!(second.image_name, "p2.png");
        assert_eq!(
            second.diagrams,
            vec![CroppedDiagram {
                index: 1,
                path: work.join("page_2_diagrams").join("diagram_1.png"),
            }]
        );
        let crop = image::open(&second.diagrams[0].path).expect("crop");
        assert_eq!(crop.dimensions(), (20, 20));
    }

    #[tokio::test]
    async fn pages_keep_input_order_under_concurrency() {
        let dir = tempdir().expect("tempdir");
        let pages = write_pages(dir.path(), &["a.png", "b.png", "c.png", "d.png"]);
        let slow = |text: &str, millis: u64| PageScript {
            delay: Duration::from_millis(millis),
            ..script(text, NO_BOXES)
        };
        let client = client(vec![
            ("a.png", slow("first", 80)),
            ("b.png", slow("second", 40)),
            ("c.png", slow("third", 0)),
            ("d.png", slow("fourth", 10)),
        ]);

        let results = extract_pages(&client, &pages, dir.path(), 3)
            .await
            .expect("pages");
        let order = results
            .iter()
            .map(|page| (page.page_number, page.text.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            order,
            vec![(1, "first"), (2, "second"), (3, "third"), (4, "fourth")]
        );
    }

    #[tokio::test]
    async fn detection_failure_names_stage_and_page() {
        let dir = tempdir().expect("tempdir");
        let pages = write_pages(dir.path(), &["ok.png", "bad.png"]);
        let client = client(vec![
            ("ok.png", script("fine", NO_BOXES)),
            (
                "bad.png",
                PageScript {
                    fail_detection: true,
                    ..script("text", NO_BOXES)
                },
            ),
        ]);

        let err = extract_pages(&client, &pages, dir.path(), 1)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("failed to process page 2"));
        assert!(format!("{err:#}").contains("boom"));
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::ModelCall { stage, page, .. }) => {
                assert_eq!(*stage, ModelStage::Detect);
                assert_eq!(*page, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn page_removed_after_validation_is_an_image_read_error() {
        let dir = tempdir().expect("tempdir");
        let pages = write_pages(dir.path(), &["gone.png"]);
        validate_inputs(&pages).expect("valid");
        fs::remove_file(&pages[0]).expect("remove");
        let provider = ScriptedProvider::new(HashMap::from([(
            "gone.png".to_string(),
            script("never", NO_BOXES),
        )]));
        let client = VisionClient::new(provider.clone(), &ModelSettings::default());

        let err = extract_pages(&client, &pages, dir.path(), 1)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("failed to process page 1"));
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::ImageRead { path, .. }) if path == &pages[0]
        ));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn convert_writes_document_and_keeps_work_dir() {
        let dir = tempdir().expect("tempdir");
        let pages = write_pages(dir.path(), &["one.png", "two.png"]);
        let client = client(vec![
            ("one.png", script("Title\n\nbody", ONE_BOX)),
            ("two.png", script("", NO_BOXES)),
        ]);
        let work = dir.path().join("kept");
        let request = ConvertRequest {
            work_dir: Some(work.clone()),
            concurrency: 2,
            ..ConvertRequest::new(pages, dir.path().join("out/notes"))
        };

        let saved = convert(&client, &request, &DocumentStyle::default())
            .await
            .expect("convert");
        assert_eq!(saved, dir.path().join("out/notes.docx"));
        assert!(saved.is_file());
        assert!(work.join("page_1_diagrams/diagram_1.png").is_file());
        assert!(!work.join("page_2_diagrams").exists());
    }

    #[tokio::test]
    async fn failed_conversion_writes_nothing() {
        let dir = tempdir().expect("tempdir");
        let pages = write_pages(dir.path(), &["only.png"]);
        let client = client(Vec::new());
        let output = dir.path().join("never.docx");
        let err = convert(
            &client,
            &ConvertRequest::new(pages, output.clone()),
            &DocumentStyle::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::ModelCall {
                stage: ModelStage::Transcribe,
                page: 1,
                ..
            })
        ));
        assert!(!output.exists());
    }
}
