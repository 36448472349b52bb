use anyhow::{Context, Result};
use image::{GenericImageView, ImageFormat};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::bounds::{BoundingBox, PixelRect};
use crate::error::PipelineError;
use crate::page::CroppedDiagram;

fn diagram_file_name(index: usize) -> String {
    format!("diagram_{}.png", index)
}

/// Crops each box out of the image at `image_path` and writes it to
/// `output_dir/diagram_<i>.png`, `i` being the 1-based position of the box.
///
/// Existing files with the same names are overwritten. A box that clamps to
/// an empty rectangle is skipped with a warning, so the result can be
/// shorter than `bounds`; it is always in box order.
pub fn crop_diagrams(
    image_path: &Path,
    bounds: &[BoundingBox],
    output_dir: &Path,
) -> Result<Vec<CroppedDiagram>> {
    fs::create_dir_all(output_dir).with_context(|| {
        format!(
            "failed to create diagram directory: {}",
            output_dir.display()
        )
    })?;

    // decoder follows the file content, not the extension
    let bytes = fs::read(image_path).map_err(|err| PipelineError::image_read(image_path, err))?;
    let image = image::load_from_memory(&bytes)
        .map_err(|err| PipelineError::image_read(image_path, err))?;
    let (width, height) = image.dimensions();

    let mut cropped = Vec::with_capacity(bounds.len());
    for (offset, bbox) in bounds.iter().enumerate() {
        let index = offset + 1;
        let rect = PixelRect::from_percent(bbox, width, height);
        if rect.is_empty() {
            warn!(
                "skipping diagram {} of {}: {:?} is empty on a {}x{} image",
                index,
                image_path.display(),
                bbox,
                width,
                height
            );
            continue;
        }

        let region = image.crop_imm(rect.x_min, rect.y_min, rect.width(), rect.height());
        let path: PathBuf = output_dir.join(diagram_file_name(index));
        region
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("failed to write diagram: {}", path.display()))?;
        debug!(
            "cropped diagram {} ({}x{} at {},{}) -> {}",
            index,
            rect.width(),
            rect.height(),
            rect.x_min,
            rect.y_min,
            path.display()
        );
        cropped.push(CroppedDiagram { index, path });
    }
    Ok(cropped)
}
