use log::info;
use std::path::Path;

use crate::pipeline::{FittedPipeline, PipelineError, Prediction};

/// Extensions offered by the image picker
pub const PICKER_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Classifies a single image. No ground-truth label is needed.
///
/// # Errors
/// - `ImageRead` if the file is missing, unreadable or not a decodable image
///
/// # Example
/// ```no_run
/// # fn run(pipeline: &occipital::FittedPipeline) -> Result<(), occipital::PipelineError> {
/// let prediction = occipital::predict(pipeline, "assets/images/toaster3.jpg")?;
/// println!("{} ({:.3})", prediction.predicted_label, prediction.confidence());
/// # Ok(())
/// # }
/// ```
pub fn predict(pipeline: &FittedPipeline, image_path: impl AsRef<Path>) -> Result<Prediction, PipelineError> {
    let path = image_path.as_ref();
    if !path.is_file() {
        return Err(PipelineError::image_read(path, "file does not exist"));
    }
    let prediction = pipeline.transform_one(path, None)?;
    info!(
        "Image: {} predicted as: {} with score: {}",
        path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
        prediction.predicted_label,
        prediction.confidence()
    );
    Ok(prediction)
}

/// Handler for a UI that lets the user pick an image file: checks the
/// picked path is one of [`PICKER_EXTENSIONS`] and classifies it.
pub fn on_image_selected(pipeline: &FittedPipeline, path: impl AsRef<Path>) -> Result<Prediction, PipelineError> {
    let path = path.as_ref();
    let accepted = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| PICKER_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false);
    if !accepted {
        return Err(PipelineError::image_read(
            path,
            format!("unsupported file type, expected one of {:?}", PICKER_EXTENSIONS),
        ));
    }
    predict(pipeline, path)
}
