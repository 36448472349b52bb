//! Assembles extracted pages into a DOCX document.

mod package;

use anyhow::{Context, Result};
use image::{GenericImageView, ImageFormat};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::page::PageContent;
use crate::settings::DocumentSettings;

pub const EMU_PER_INCH: f64 = 914_400.0;
pub const DOCUMENT_TITLE: &str = "Handwritten Notes";
pub const EXTRACTED_TEXT_HEADING: &str = "Extracted Text";
pub const DIAGRAMS_HEADING: &str = "Diagrams";

/// Maximum physical size of an embedded image and the pixel density used to
/// convert pixels to inches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImagePolicy {
    pub max_width_in: f64,
    pub max_height_in: f64,
    pub pixels_per_inch: f64,
}

impl Default for ImagePolicy {
    fn default() -> Self {
        Self {
            max_width_in: 6.0,
            max_height_in: 4.0,
            pixels_per_inch: 96.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplaySize {
    pub width_in: f64,
    pub height_in: f64,
}

impl DisplaySize {
    pub fn to_emu(&self) -> (u64, u64) {
        (
            (self.width_in * EMU_PER_INCH).round() as u64,
            (self.height_in * EMU_PER_INCH).round() as u64,
        )
    }
}

impl ImagePolicy {
    /// Landscape images are capped by width, portrait and square ones by
    /// height. Images under the cap keep their intrinsic size.
    pub fn display_size(&self, width: u32, height: u32) -> DisplaySize {
        if width == 0 || height == 0 {
            return DisplaySize {
                width_in: 0.0,
                height_in: 0.0,
            };
        }
        let (w, h) = (f64::from(width), f64::from(height));
        let aspect = w / h;
        let intrinsic = DisplaySize {
            width_in: w / self.pixels_per_inch,
            height_in: h / self.pixels_per_inch,
        };
        if width > height {
            if w > self.max_width_in * self.pixels_per_inch {
                return DisplaySize {
                    width_in: self.max_width_in,
                    height_in: self.max_width_in / aspect,
                };
            }
        } else if h > self.max_height_in * self.pixels_per_inch {
            return DisplaySize {
                width_in: self.max_height_in * aspect,
                height_in: self.max_height_in,
            };
        }
        intrinsic
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentStyle {
    pub font_family: String,
    pub body_font_size: f32,
    pub heading_font_size: f32,
    pub subheading_font_size: f32,
    pub label_font_size: f32,
    pub image_policy: ImagePolicy,
}

impl Default for DocumentStyle {
    fn default() -> Self {
        Self::from(&DocumentSettings::default())
    }
}

impl From<&DocumentSettings> for DocumentStyle {
    fn from(settings: &DocumentSettings) -> Self {
        Self {
            font_family: settings.font_family.clone(),
            body_font_size: settings.body_font_size,
            heading_font_size: settings.heading_font_size,
            subheading_font_size: settings.subheading_font_size,
            label_font_size: settings.label_font_size,
            image_policy: ImagePolicy {
                max_width_in: settings.max_image_width_in,
                max_height_in: settings.max_image_height_in,
                pixels_per_inch: settings.pixels_per_inch,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadingLevel {
    Page,
    Section,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParagraphKind {
    Body,
    Blank,
    Label,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedImage {
    /// 1-based index into the document's media list.
    pub media_index: usize,
    pub name: String,
    pub size: DisplaySize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading { level: HeadingLevel, text: String },
    Paragraph { kind: ParagraphKind, text: String },
    Image(EmbeddedImage),
    PageBreak,
}

#[derive(Debug, Clone)]
pub struct MediaFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// An in-memory document. Blocks are appended in reading order and the whole
/// thing is serialized once by [`Document::save`].
#[derive(Debug, Clone)]
pub struct Document {
    style: DocumentStyle,
    blocks: Vec<Block>,
    media: Vec<MediaFile>,
}

impl Document {
    pub fn new(style: DocumentStyle) -> Self {
        Self {
            style,
            blocks: Vec::new(),
            media: Vec::new(),
        }
    }

    pub fn style(&self) -> &DocumentStyle {
        &self.style
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn media(&self) -> &[MediaFile] {
        &self.media
    }

    pub fn add_heading(&mut self, level: HeadingLevel, text: impl Into<String>) {
        self.blocks.push(Block::Heading {
            level,
            text: text.into(),
        });
    }

    pub fn add_paragraph(&mut self, kind: ParagraphKind, text: impl Into<String>) {
        self.blocks.push(Block::Paragraph {
            kind,
            text: text.into(),
        });
    }

    pub fn add_blank(&mut self) {
        self.add_paragraph(ParagraphKind::Blank, "");
    }

    pub fn add_page_break(&mut self) {
        self.blocks.push(Block::PageBreak);
    }

    /// Embeds the image at `path`, sized by the style's image policy. On
    /// error the document is left untouched.
    pub fn add_image_file(&mut self, path: &Path) -> Result<()> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let image = image::load_from_memory(&bytes)
            .with_context(|| format!("failed to decode {}", path.display()))?;
        let (width, height) = image.dimensions();
        let png = if image::guess_format(&bytes).ok() == Some(ImageFormat::Png) {
            bytes
        } else {
            let mut encoded = Vec::new();
            image
                .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
                .with_context(|| format!("failed to re-encode {}", path.display()))?;
            encoded
        };

        let media_index = self.media.len() + 1;
        self.media.push(MediaFile {
            file_name: format!("image{}.png", media_index),
            bytes: png,
        });
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("diagram.png")
            .to_string();
        self.blocks.push(Block::Image(EmbeddedImage {
            media_index,
            name,
            size: self.style.image_policy.display_size(width, height),
        }));
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        package::write_package(self, OffsetDateTime::now_utc())
    }

    /// Writes the finished document to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<PathBuf> {
        let bytes = self.to_bytes()?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create output directory: {}", parent.display())
            })?;
        }
        fs::write(path, bytes)
            .with_context(|| format!("failed to write document: {}", path.display()))?;
        info!("document saved: {}", path.display());
        Ok(path.to_path_buf())
    }
}

/// Lays out the pages in order. A diagram that cannot be embedded is
/// replaced by a visible error paragraph; nothing here fails.
pub fn assemble(pages: &[PageContent], style: &DocumentStyle) -> Document {
    let mut document = Document::new(style.clone());
    let total = pages.len();
    for (idx, page) in pages.iter().enumerate() {
        document.add_heading(
            HeadingLevel::Page,
            format!("Page {}: {}", page.page_number, page.image_name),
        );
        document.add_blank();

        if page.has_text() {
            document.add_heading(HeadingLevel::Section, EXTRACTED_TEXT_HEADING);
            for line in page.text_lines() {
                document.add_paragraph(ParagraphKind::Body, line);
            }
            document.add_blank();
        }

        if !page.diagrams.is_empty() {
            document.add_heading(HeadingLevel::Section, DIAGRAMS_HEADING);
            for (position, diagram) in page.diagrams.iter().enumerate() {
                document.add_paragraph(ParagraphKind::Label, format!("Diagram {}", position + 1));
                if let Err(err) = document.add_image_file(&diagram.path) {
                    warn!(
                        "page {}: could not embed diagram {}: {:#}",
                        page.page_number,
                        position + 1,
                        err
                    );
                    document.add_paragraph(
                        ParagraphKind::Error,
                        format!("[Error loading diagram: {:#}]", err),
                    );
                }
                document.add_blank();
            }
        }

        // n pages get n - 1 breaks, none after the last page.
        if idx + 1 < total {
            document.add_page_break();
        }
    }
    document
}

pub fn write_document(
    pages: &[PageContent],
    style: &DocumentStyle,
    output: &Path,
) -> Result<PathBuf> {
    assemble(pages, style).save(output)
}
