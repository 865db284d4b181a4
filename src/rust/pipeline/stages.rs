use image::imageops::FilterType;
use image::DynamicImage;
use log::debug;
use ndarray::{Array1, Array4};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use super::error::PipelineError;
use super::trainer::{LbfgsOptions, TrainedClassifier};
use super::utils::argmax;
use super::vocabulary::LabelVocabulary;
use crate::backbone::FeatureExtractor;

/// How images are brought to the target size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMode {
    /// Stretch to the target size, ignoring aspect ratio
    #[default]
    Fill,
    /// Scale to cover the target size, then center-crop the overflow
    IsoCrop,
}

/// Settings for turning a decoded image into a numeric tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelOptions {
    /// `true` packs channels per pixel (HWC), `false` groups them per channel (CHW)
    pub interleave: bool,
    /// Subtracted from every channel value before scaling
    pub offset: f32,
    /// Multiplied with every channel value after the offset
    pub scale: f32,
}

impl Default for PixelOptions {
    fn default() -> Self {
        Self {
            interleave: false,
            offset: 0.0,
            scale: 1.0,
        }
    }
}

/// Serializable description of one pipeline stage.
///
/// Stages must appear in declaration order; see [`StageDescriptor::rank`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageDescriptor {
    MapValueToKey,
    LoadImage,
    Resize { width: u32, height: u32, mode: ResizeMode },
    ExtractPixels(PixelOptions),
    ScoreBackbone,
    TrainClassifier(LbfgsOptions),
    MapKeyToValue,
}

impl StageDescriptor {
    /// Position of the stage in the fixed pipeline order
    pub fn rank(&self) -> usize {
        match self {
            StageDescriptor::MapValueToKey => 0,
            StageDescriptor::LoadImage => 1,
            StageDescriptor::Resize { .. } => 2,
            StageDescriptor::ExtractPixels(_) => 3,
            StageDescriptor::ScoreBackbone => 4,
            StageDescriptor::TrainClassifier(_) => 5,
            StageDescriptor::MapKeyToValue => 6,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StageDescriptor::MapValueToKey => "map_value_to_key",
            StageDescriptor::LoadImage => "load_image",
            StageDescriptor::Resize { .. } => "resize",
            StageDescriptor::ExtractPixels(_) => "extract_pixels",
            StageDescriptor::ScoreBackbone => "score_backbone",
            StageDescriptor::TrainClassifier(_) => "train_classifier",
            StageDescriptor::MapKeyToValue => "map_key_to_value",
        }
    }
}

/// One row flowing through the pipeline. Each stage fills in its own column.
#[derive(Debug, Clone, Default)]
pub struct Sample {
    pub path: PathBuf,
    pub label: Option<String>,
    pub label_key: Option<usize>,
    pub image: Option<DynamicImage>,
    pub tensor: Option<Array4<f32>>,
    pub features: Option<Array1<f32>>,
    pub scores: Option<Vec<f32>>,
    pub predicted_label: Option<String>,
}

impl Sample {
    pub fn new(path: impl Into<PathBuf>, label: Option<String>) -> Self {
        Self {
            path: path.into(),
            label,
            ..Default::default()
        }
    }

    /// Backbone features when scored, the flattened pixel tensor otherwise
    pub(crate) fn feature_vector(&self) -> Result<Array1<f32>, PipelineError> {
        if let Some(features) = &self.features {
            return Ok(features.clone());
        }
        self.tensor
            .as_ref()
            .map(|t| Array1::from_iter(t.iter().cloned()))
            .ok_or_else(|| missing_column("features", &self.path))
    }
}

fn missing_column(column: &str, path: &std::path::Path) -> PipelineError {
    PipelineError::InvalidPipeline(format!("no '{}' column for {:?}; check stage order", column, path))
}

/// A single transformation applied to each sample in turn.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, sample: Sample) -> Result<Sample, PipelineError>;
}

/// Encodes the ground-truth label into its vocabulary key when a label is present.
pub(crate) struct EncodeLabel {
    pub vocabulary: Arc<LabelVocabulary>,
}

impl Stage for EncodeLabel {
    fn name(&self) -> &'static str {
        "map_value_to_key"
    }

    fn apply(&self, mut sample: Sample) -> Result<Sample, PipelineError> {
        if let Some(label) = &sample.label {
            sample.label_key = Some(self.vocabulary.key_of(label)?);
        }
        Ok(sample)
    }
}

pub(crate) struct LoadImage;

impl Stage for LoadImage {
    fn name(&self) -> &'static str {
        "load_image"
    }

    fn apply(&self, mut sample: Sample) -> Result<Sample, PipelineError> {
        let bytes = fs::read(&sample.path)
            .map_err(|e| PipelineError::image_read(&sample.path, e))?;
        let image = image::load_from_memory(&bytes)
            .map_err(|e| PipelineError::image_read(&sample.path, e))?;
        debug!("Decoded {:?} ({}x{})", sample.path, image.width(), image.height());
        sample.image = Some(image);
        Ok(sample)
    }
}

pub(crate) struct Resize {
    pub width: u32,
    pub height: u32,
    pub mode: ResizeMode,
}

impl Stage for Resize {
    fn name(&self) -> &'static str {
        "resize"
    }

    fn apply(&self, mut sample: Sample) -> Result<Sample, PipelineError> {
        let image = sample.image.take().ok_or_else(|| missing_column("image", &sample.path))?;
        let resized = match self.mode {
            ResizeMode::Fill => image.resize_exact(self.width, self.height, FilterType::Triangle),
            ResizeMode::IsoCrop => image.resize_to_fill(self.width, self.height, FilterType::Triangle),
        };
        sample.image = Some(resized);
        Ok(sample)
    }
}

pub(crate) struct ExtractPixels {
    pub options: PixelOptions,
}

impl ExtractPixels {
    /// Converts an image into a `[1, H, W, 3]` (interleaved) or `[1, 3, H, W]` (planar) tensor
    pub(crate) fn tensor(&self, image: &DynamicImage) -> Array4<f32> {
        let rgb = image.to_rgb8();
        let (width, height) = (rgb.width() as usize, rgb.height() as usize);
        let PixelOptions { interleave, offset, scale } = self.options;
        let value = |x: usize, y: usize, c: usize| {
            (f32::from(rgb.get_pixel(x as u32, y as u32)[c]) - offset) * scale
        };
        if interleave {
            Array4::from_shape_fn((1, height, width, 3), |(_, y, x, c)| value(x, y, c))
        } else {
            Array4::from_shape_fn((1, 3, height, width), |(_, c, y, x)| value(x, y, c))
        }
    }
}

impl Stage for ExtractPixels {
    fn name(&self) -> &'static str {
        "extract_pixels"
    }

    fn apply(&self, mut sample: Sample) -> Result<Sample, PipelineError> {
        let image = sample.image.take().ok_or_else(|| missing_column("image", &sample.path))?;
        sample.tensor = Some(self.tensor(&image));
        Ok(sample)
    }
}

pub(crate) struct ScoreBackbone {
    pub backbone: Arc<dyn FeatureExtractor>,
}

impl Stage for ScoreBackbone {
    fn name(&self) -> &'static str {
        "score_backbone"
    }

    fn apply(&self, mut sample: Sample) -> Result<Sample, PipelineError> {
        let tensor = sample.tensor.take().ok_or_else(|| missing_column("tensor", &sample.path))?;
        sample.features = Some(self.backbone.score(&tensor)?);
        Ok(sample)
    }
}

pub(crate) struct Classify {
    pub classifier: Arc<TrainedClassifier>,
}

impl Stage for Classify {
    fn name(&self) -> &'static str {
        "train_classifier"
    }

    fn apply(&self, mut sample: Sample) -> Result<Sample, PipelineError> {
        let features = sample.feature_vector()?;
        sample.scores = Some(self.classifier.score(features.view())?);
        Ok(sample)
    }
}

pub(crate) struct DecodeLabel {
    pub vocabulary: Arc<LabelVocabulary>,
}

impl Stage for DecodeLabel {
    fn name(&self) -> &'static str {
        "map_key_to_value"
    }

    fn apply(&self, mut sample: Sample) -> Result<Sample, PipelineError> {
        let scores = sample.scores.as_deref().ok_or_else(|| missing_column("scores", &sample.path))?;
        let key = argmax(scores).ok_or_else(|| missing_column("scores", &sample.path))?;
        let label = self.vocabulary.label_of(key).ok_or_else(|| {
            PipelineError::ModelError(format!("predicted key {} is outside the vocabulary", key))
        })?;
        sample.predicted_label = Some(label.to_string());
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn two_by_one() -> DynamicImage {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([10, 20, 30]));
        img.put_pixel(1, 0, Rgb([40, 50, 60]));
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_interleaved_pixels_are_packed_per_pixel() {
        let stage = ExtractPixels {
            options: PixelOptions { interleave: true, offset: 0.0, scale: 1.0 },
        };
        let tensor = stage.tensor(&two_by_one());
        assert_eq!(tensor.shape(), &[1, 1, 2, 3]);
        let flat: Vec<f32> = tensor.iter().cloned().collect();
        assert_eq!(flat, vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0]);
    }

    #[test]
    fn test_planar_pixels_are_grouped_per_channel() {
        let stage = ExtractPixels {
            options: PixelOptions { interleave: false, offset: 10.0, scale: 0.5 },
        };
        let tensor = stage.tensor(&two_by_one());
        assert_eq!(tensor.shape(), &[1, 3, 1, 2]);
        let flat: Vec<f32> = tensor.iter().cloned().collect();
        assert_eq!(flat, vec![0.0, 15.0, 5.0, 20.0, 10.0, 25.0]);
    }

    #[test]
    fn test_fill_resize_ignores_aspect_ratio() {
        let stage = Resize { width: 4, height: 8, mode: ResizeMode::Fill };
        let sample = Sample { image: Some(two_by_one()), ..Default::default() };
        let resized = stage.apply(sample).unwrap().image.unwrap();
        assert_eq!((resized.width(), resized.height()), (4, 8));
    }

    #[test]
    fn test_iso_crop_resize_hits_target_size() {
        let stage = Resize { width: 3, height: 3, mode: ResizeMode::IsoCrop };
        let sample = Sample { image: Some(two_by_one()), ..Default::default() };
        let resized = stage.apply(sample).unwrap().image.unwrap();
        assert_eq!((resized.width(), resized.height()), (3, 3));
    }

    #[test]
    fn test_load_missing_image() {
        let result = LoadImage.apply(Sample::new("/nonexistent/cat.png", None));
        assert!(matches!(result, Err(PipelineError::ImageRead { .. })));
    }

    #[test]
    fn test_load_corrupt_image() {
        let file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        fs::write(file.path(), b"not an image").unwrap();
        let result = LoadImage.apply(Sample::new(file.path(), None));
        assert!(matches!(result, Err(PipelineError::ImageRead { .. })));
    }

    #[test]
    fn test_resize_without_image_reports_stage_order() {
        let stage = Resize { width: 2, height: 2, mode: ResizeMode::Fill };
        assert!(matches!(
            stage.apply(Sample::new("x.png", None)),
            Err(PipelineError::InvalidPipeline(_))
        ));
    }

    #[test]
    fn test_encode_label_rejects_unknown() {
        let stage = EncodeLabel {
            vocabulary: Arc::new(LabelVocabulary::from_labels(["cat", "dog"])),
        };
        let encoded = stage.apply(Sample::new("a.png", Some("dog".into()))).unwrap();
        assert_eq!(encoded.label_key, Some(1));
        assert!(matches!(
            stage.apply(Sample::new("a.png", Some("toaster".into()))),
            Err(PipelineError::UnknownLabel(_))
        ));
        assert_eq!(stage.apply(Sample::new("a.png", None)).unwrap().label_key, None);
    }

    #[test]
    fn test_decode_label_uses_top_score() {
        let stage = DecodeLabel {
            vocabulary: Arc::new(LabelVocabulary::from_labels(["cat", "dog"])),
        };
        let sample = Sample { scores: Some(vec![0.3, 0.7]), ..Default::default() };
        assert_eq!(stage.apply(sample).unwrap().predicted_label.as_deref(), Some("dog"));
    }

    #[test]
    fn test_descriptor_ranks_follow_declaration_order() {
        let stages = [
            StageDescriptor::MapValueToKey,
            StageDescriptor::LoadImage,
            StageDescriptor::Resize { width: 1, height: 1, mode: ResizeMode::Fill },
            StageDescriptor::ExtractPixels(PixelOptions::default()),
            StageDescriptor::ScoreBackbone,
            StageDescriptor::TrainClassifier(LbfgsOptions::default()),
            StageDescriptor::MapKeyToValue,
        ];
        for (i, stage) in stages.iter().enumerate() {
            assert_eq!(stage.rank(), i);
        }
    }
}
