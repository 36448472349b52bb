//! Diagram bounding boxes reported by the detection model, and their
//! conversion to pixel rectangles.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::prompts::{DIAGRAM_SECTION_MARKER, RAW_TEXT_SECTION_MARKER};

/// A detected diagram region in percent (nominally 0-100) of the image size.
/// Values are kept exactly as reported, out-of-range or inverted included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x_min: i64,
    pub y_min: i64,
    pub x_max: i64,
    pub y_max: i64,
}

impl BoundingBox {
    pub fn new(x_min: i64, y_min: i64, x_max: i64, y_max: i64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }
}

/// A bounding box resolved against concrete image dimensions.
///
/// Every coordinate lies in `[0, width]` / `[0, height]`, but max is not
/// re-ordered against min: an inverted box stays inverted and reports an
/// empty area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x_min: u32,
    pub y_min: u32,
    pub x_max: u32,
    pub y_max: u32,
}

impl PixelRect {
    pub fn from_percent(bounds: &BoundingBox, width: u32, height: u32) -> Self {
        Self {
            x_min: scale_and_clamp(bounds.x_min, width),
            y_min: scale_and_clamp(bounds.y_min, height),
            x_max: scale_and_clamp(bounds.x_max, width),
            y_max: scale_and_clamp(bounds.y_max, height),
        }
    }

    pub fn width(&self) -> u32 {
        self.x_max.saturating_sub(self.x_min)
    }

    pub fn height(&self) -> u32 {
        self.y_max.saturating_sub(self.y_min)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

// percent / 100 * dimension, truncated toward zero, then clamped.
fn scale_and_clamp(percent: i64, dimension: u32) -> u32 {
    let scaled = (percent as f64 / 100.0 * f64::from(dimension)) as i64;
    scaled.clamp(0, i64::from(dimension)) as u32
}

static DIAGRAM_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Diagram_\d+:[ \t]*\r?\n[ \t]*Bounds:[ \t]*x_min[ \t]*=[ \t]*(-?\d+)[ \t]*,[ \t]*y_min[ \t]*=[ \t]*(-?\d+)[ \t]*,[ \t]*x_max[ \t]*=[ \t]*(-?\d+)[ \t]*,[ \t]*y_max[ \t]*=[ \t]*(-?\d+)",
    )
    .expect("hardcoded diagram block regex is valid")
});

/// The two sections of a detection response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionSections<'a> {
    pub raw_text: Option<&'a str>,
    pub diagrams: &'a str,
}

/// Splits a detection response on its `[RAW_TEXT]` / `[DIAGRAMS]` headers.
/// Without a `[DIAGRAMS]` header the whole response counts as the diagram
/// section.
pub fn split_detection_sections(response: &str) -> DetectionSections<'_> {
    let (before, diagrams) = match response.find(DIAGRAM_SECTION_MARKER) {
        Some(pos) => (
            &response[..pos],
            &response[pos + DIAGRAM_SECTION_MARKER.len()..],
        ),
        None => ("", response),
    };
    let raw_text = before
        .find(RAW_TEXT_SECTION_MARKER)
        .map(|pos| before[pos + RAW_TEXT_SECTION_MARKER.len()..].trim());
    DetectionSections { raw_text, diagrams }
}

/// Extracts every `Diagram_<n>:` / `Bounds: ...` block, in the order the
/// blocks appear in the text.
///
/// Anything that does not match the two-line shape is skipped without an
/// error, as is a block whose numbers do not fit an `i64`. An empty result
/// therefore means either "no diagrams" or "unparseable output"; callers
/// cannot and need not tell the two apart.
pub fn parse_diagram_bounds(response: &str) -> Vec<BoundingBox> {
    let section = split_detection_sections(response).diagrams;
    DIAGRAM_BLOCK
        .captures_iter(section)
        .filter_map(|caps| {
            let value = |idx: usize| caps.get(idx)?.as_str().parse::<i64>().ok();
            Some(BoundingBox::new(value(1)?, value(2)?, value(3)?, value(4)?))
        })
        .collect()
}
