use log::{info, warn};
use ndarray::{Array1, Array2};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::error::PipelineError;
use super::fitted::{assemble_stages, run_stages, FittedPipeline};
use super::stages::{PixelOptions, ResizeMode, Sample, StageDescriptor};
use super::trainer::{LbfgsOptions, TrainedClassifier};
use super::vocabulary::LabelVocabulary;
use crate::backbone::{FeatureExtractor, OnnxBackbone};
use crate::context::PipelineContext;
use crate::dataset::LabeledImage;

/// Input size expected by the Inception backbone
pub const INCEPTION_IMAGE_SIZE: u32 = 224;
/// Per-channel mean subtracted before scoring with Inception
pub const INCEPTION_MEAN: f32 = 117.0;

/// A builder for composing the ordered stage list of an image classification
/// pipeline with a fluent interface.
///
/// Every stage method checks that the stage is appended after the ones
/// already present, so the resulting order always is: label encoding, image
/// loading, resizing, pixel extraction, optional backbone scoring, classifier
/// training, label decoding.
pub struct PipelineBuilder {
    ctx: PipelineContext,
    stages: Vec<StageDescriptor>,
    backbone: Option<Arc<dyn FeatureExtractor>>,
}

impl PipelineBuilder {
    /// Creates an empty builder bound to the given context
    ///
    /// # Example
    /// ```
    /// use occipital::{PipelineBuilder, PipelineContext};
    ///
    /// let builder = PipelineBuilder::new(&PipelineContext::new());
    /// ```
    pub fn new(ctx: &PipelineContext) -> Self {
        Self {
            ctx: ctx.clone(),
            stages: Vec::new(),
            backbone: None,
        }
    }

    /// The pretrained-backbone variant: Inception preprocessing (224x224,
    /// interleaved channels, mean 117) followed by backbone features and an
    /// L-BFGS trained head.
    pub fn inception(
        ctx: &PipelineContext,
        backbone: Arc<dyn FeatureExtractor>,
        options: LbfgsOptions,
    ) -> Result<Pipeline, PipelineError> {
        Self::new(ctx)
            .map_value_to_key()?
            .load_images()?
            .resize_images(INCEPTION_IMAGE_SIZE, INCEPTION_IMAGE_SIZE)?
            .extract_pixels(PixelOptions {
                interleave: true,
                offset: INCEPTION_MEAN,
                scale: 1.0,
            })?
            .score_backbone(backbone)?
            .train_lbfgs(options)?
            .map_key_to_value()?
            .build()
    }

    /// The end-to-end variant: the classifier is trained directly on planar
    /// pixels scaled to `[0, 1]`, without a backbone.
    pub fn raw_pixels(ctx: &PipelineContext, options: LbfgsOptions) -> Result<Pipeline, PipelineError> {
        Self::new(ctx)
            .map_value_to_key()?
            .load_images()?
            .resize_images(INCEPTION_IMAGE_SIZE, INCEPTION_IMAGE_SIZE)?
            .extract_pixels(PixelOptions {
                interleave: false,
                offset: 0.0,
                scale: 1.0 / 255.0,
            })?
            .train_lbfgs(options)?
            .map_key_to_value()?
            .build()
    }

    /// Appends a stage from its descriptor.
    ///
    /// `ScoreBackbone` cannot be appended this way because it needs the
    /// extractor itself; use [`score_backbone`](Self::score_backbone).
    ///
    /// # Errors
    /// - `InvalidPipeline` if the stage is already present or belongs before the last stage
    pub fn append(self, stage: StageDescriptor) -> Result<Self, PipelineError> {
        if matches!(stage, StageDescriptor::ScoreBackbone) {
            return Err(PipelineError::InvalidPipeline(
                "score_backbone needs an extractor; use score_backbone()".to_string(),
            ));
        }
        self.push(stage)
    }

    fn push(mut self, stage: StageDescriptor) -> Result<Self, PipelineError> {
        if let Some(last) = self.stages.last() {
            if stage.rank() <= last.rank() {
                return Err(PipelineError::InvalidPipeline(format!(
                    "stage '{}' cannot follow '{}'",
                    stage.name(),
                    last.name()
                )));
            }
        }
        self.stages.push(stage);
        Ok(self)
    }

    /// Builds the label vocabulary from training labels
    pub fn map_value_to_key(self) -> Result<Self, PipelineError> {
        self.push(StageDescriptor::MapValueToKey)
    }

    /// Reads and decodes each record's image file
    pub fn load_images(self) -> Result<Self, PipelineError> {
        self.push(StageDescriptor::LoadImage)
    }

    /// Stretches every image to `width` x `height`
    pub fn resize_images(self, width: u32, height: u32) -> Result<Self, PipelineError> {
        self.resize_images_with_mode(width, height, ResizeMode::Fill)
    }

    pub fn resize_images_with_mode(
        self,
        width: u32,
        height: u32,
        mode: ResizeMode,
    ) -> Result<Self, PipelineError> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "resize target must be non-zero, got {}x{}",
                width, height
            )));
        }
        self.push(StageDescriptor::Resize { width, height, mode })
    }

    pub fn extract_pixels(self, options: PixelOptions) -> Result<Self, PipelineError> {
        if !options.offset.is_finite() || !options.scale.is_finite() {
            return Err(PipelineError::InvalidConfig("pixel offset and scale must be finite".into()));
        }
        self.push(StageDescriptor::ExtractPixels(options))
    }

    /// Scores the pixel tensor with a frozen feature extractor
    pub fn score_backbone(self, backbone: Arc<dyn FeatureExtractor>) -> Result<Self, PipelineError> {
        let mut builder = self.push(StageDescriptor::ScoreBackbone)?;
        builder.backbone = Some(backbone);
        Ok(builder)
    }

    /// Opens an ONNX backbone with the context's runtime settings and scores with it
    pub fn score_onnx(
        self,
        model_path: impl AsRef<Path>,
        input_name: &str,
        output_name: &str,
    ) -> Result<Self, PipelineError> {
        let backbone = OnnxBackbone::from_file(model_path, input_name, output_name, &self.ctx)?;
        self.score_backbone(Arc::new(backbone))
    }

    pub fn train_lbfgs(self, options: LbfgsOptions) -> Result<Self, PipelineError> {
        options.validate()?;
        self.push(StageDescriptor::TrainClassifier(options))
    }

    /// Maps predicted keys back to label strings
    pub fn map_key_to_value(self) -> Result<Self, PipelineError> {
        self.push(StageDescriptor::MapKeyToValue)
    }

    /// Checks that every mandatory stage is present and returns the unfit pipeline
    ///
    /// # Errors
    /// - `InvalidPipeline` naming the first missing stage
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        validate_stage_list(&self.stages)?;
        Ok(Pipeline {
            stages: self.stages,
            backbone: self.backbone,
        })
    }
}

/// Validates a complete stage list: ranks strictly increasing and every
/// mandatory stage present.
pub(crate) fn validate_stage_list(stages: &[StageDescriptor]) -> Result<(), PipelineError> {
    for pair in stages.windows(2) {
        if pair[1].rank() <= pair[0].rank() {
            return Err(PipelineError::InvalidPipeline(format!(
                "stage '{}' cannot follow '{}'",
                pair[1].name(),
                pair[0].name()
            )));
        }
    }
    let required = [
        StageDescriptor::MapValueToKey,
        StageDescriptor::LoadImage,
        StageDescriptor::Resize { width: 1, height: 1, mode: ResizeMode::Fill },
        StageDescriptor::ExtractPixels(PixelOptions::default()),
        StageDescriptor::TrainClassifier(LbfgsOptions::default()),
        StageDescriptor::MapKeyToValue,
    ];
    for stage in &required {
        if !stages.iter().any(|s| s.rank() == stage.rank()) {
            return Err(PipelineError::InvalidPipeline(format!(
                "missing required stage '{}'",
                stage.name()
            )));
        }
    }
    Ok(())
}

/// An unfit pipeline: an ordered stage list waiting for training data.
pub struct Pipeline {
    stages: Vec<StageDescriptor>,
    backbone: Option<Arc<dyn FeatureExtractor>>,
}

impl Pipeline {
    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    fn trainer_options(&self) -> Result<&LbfgsOptions, PipelineError> {
        self.stages
            .iter()
            .find_map(|s| match s {
                StageDescriptor::TrainClassifier(options) => Some(options),
                _ => None,
            })
            .ok_or_else(|| PipelineError::InvalidPipeline("missing required stage 'train_classifier'".into()))
    }

    /// Runs every stage over the training data and trains the classifier.
    ///
    /// Each call returns a new, independent [`FittedPipeline`]; the frozen
    /// backbone is shared between them.
    ///
    /// # Errors
    /// - `TrainingDataEmpty` if `data` is empty
    /// - `InsufficientClassDiversity` if fewer than two distinct labels are present
    /// - `ImageRead` for any unreadable image
    /// - `TrainingError` if the optimizer fails
    pub fn fit(&self, data: &[LabeledImage]) -> Result<FittedPipeline, PipelineError> {
        if data.is_empty() {
            return Err(PipelineError::TrainingDataEmpty);
        }
        let vocabulary = Arc::new(LabelVocabulary::from_labels(
            data.iter().map(|r| r.label.as_str()),
        ));
        if vocabulary.len() < 2 {
            return Err(PipelineError::InsufficientClassDiversity { found: vocabulary.len() });
        }
        let options = self.trainer_options()?;

        let start = Instant::now();
        info!(
            "Fitting pipeline on {} images, labels: {:?}",
            data.len(),
            vocabulary.labels()
        );
        let feature_stages = assemble_stages(&self.stages, &vocabulary, None, self.backbone.clone())?;

        let mut rows: Vec<Array1<f32>> = Vec::with_capacity(data.len());
        let mut targets = Vec::with_capacity(data.len());
        for record in data {
            let sample = run_stages(
                &feature_stages,
                Sample::new(&record.path, Some(record.label.clone())),
            )?;
            let features = sample.feature_vector()?;
            if let Some(first) = rows.first() {
                if first.len() != features.len() {
                    return Err(PipelineError::ModelError(format!(
                        "feature length changed from {} to {} at {:?}",
                        first.len(),
                        features.len(),
                        record.path
                    )));
                }
            }
            let key = sample
                .label_key
                .ok_or_else(|| PipelineError::UnknownLabel(record.label.clone()))?;
            targets.push(key);
            rows.push(features);
        }
        info!("Extracted features for {} images in {:.2?}", rows.len(), start.elapsed());

        let n_features = rows[0].len();
        if n_features > 100_000 {
            warn!("Training on {} raw features; consider a backbone", n_features);
        }
        let records = Array2::from_shape_fn((rows.len(), n_features), |(i, j)| f64::from(rows[i][j]));
        let classifier = TrainedClassifier::fit(records, Array1::from(targets), vocabulary.len(), options)?;

        let fitted = FittedPipeline::assemble(
            self.stages.clone(),
            vocabulary,
            Arc::new(classifier),
            self.backbone.clone(),
        )?;
        info!("Pipeline fitted in {:.2?}", start.elapsed());
        Ok(fitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PipelineContext {
        PipelineContext::new().with_seed(1)
    }

    #[test]
    fn test_out_of_order_stage_rejected() {
        let result = PipelineBuilder::new(&ctx())
            .map_value_to_key()
            .and_then(|b| b.resize_images(4, 4))
            .and_then(|b| b.load_images());
        assert!(matches!(result, Err(PipelineError::InvalidPipeline(_))));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let result = PipelineBuilder::new(&ctx())
            .map_value_to_key()
            .and_then(|b| b.map_value_to_key());
        assert!(matches!(result, Err(PipelineError::InvalidPipeline(_))));
    }

    #[test]
    fn test_missing_stage_rejected() -> Result<(), PipelineError> {
        let result = PipelineBuilder::new(&ctx())
            .map_value_to_key()?
            .load_images()?
            .extract_pixels(PixelOptions::default())?
            .train_lbfgs(LbfgsOptions::default())?
            .map_key_to_value()?
            .build();
        match result {
            Err(PipelineError::InvalidPipeline(msg)) => assert!(msg.contains("resize")),
            _ => panic!("expected missing resize stage"),
        }
        Ok(())
    }

    #[test]
    fn test_append_refuses_backbone_without_extractor() {
        let result = PipelineBuilder::new(&ctx()).append(StageDescriptor::ScoreBackbone);
        assert!(matches!(result, Err(PipelineError::InvalidPipeline(_))));
    }

    #[test]
    fn test_raw_pixel_preset_stage_order() -> Result<(), PipelineError> {
        let pipeline = PipelineBuilder::raw_pixels(&ctx(), LbfgsOptions::default())?;
        let names: Vec<_> = pipeline.stages().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "map_value_to_key",
                "load_image",
                "resize",
                "extract_pixels",
                "train_classifier",
                "map_key_to_value"
            ]
        );
        Ok(())
    }

    #[test]
    fn test_fit_rejects_empty_data() -> Result<(), PipelineError> {
        let pipeline = PipelineBuilder::raw_pixels(&ctx(), LbfgsOptions::default())?;
        assert!(matches!(pipeline.fit(&[]), Err(PipelineError::TrainingDataEmpty)));
        Ok(())
    }

    #[test]
    fn test_fit_rejects_single_label() -> Result<(), PipelineError> {
        let pipeline = PipelineBuilder::raw_pixels(&ctx(), LbfgsOptions::default())?;
        let data = vec![
            LabeledImage::new("a.png", "cat"),
            LabeledImage::new("b.png", "cat"),
        ];
        assert!(matches!(
            pipeline.fit(&data),
            Err(PipelineError::InsufficientClassDiversity { found: 1 })
        ));
        Ok(())
    }
}
