use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::builder::validate_stage_list;
use super::error::PipelineError;
use super::stages::{
    Classify, DecodeLabel, EncodeLabel, ExtractPixels, LoadImage, Resize, Sample, ScoreBackbone,
    Stage, StageDescriptor,
};
use super::trainer::TrainedClassifier;
use super::vocabulary::LabelVocabulary;
use crate::backbone::{BackboneRef, FeatureExtractor};
use crate::dataset::LabeledImage;

/// The output of a fitted pipeline for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub path: PathBuf,
    /// One score per class, in vocabulary key order
    pub scores: Vec<f32>,
    /// Label at the index of the highest score
    pub predicted_label: String,
}

impl Prediction {
    /// The highest score, i.e. the score of `predicted_label`
    pub fn confidence(&self) -> f32 {
        self.scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max)
    }

    fn from_sample(sample: Sample) -> Result<Self, PipelineError> {
        match (sample.scores, sample.predicted_label) {
            (Some(scores), Some(predicted_label)) => Ok(Self {
                path: sample.path,
                scores,
                predicted_label,
            }),
            _ => Err(PipelineError::InvalidPipeline(format!(
                "pipeline produced no prediction for {:?}",
                sample.path
            ))),
        }
    }
}

/// Intermediate view of one record, for debugging a fitted pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewRow {
    pub path: PathBuf,
    pub label: Option<String>,
    pub label_key: Option<usize>,
    /// Length of the vector handed to the classifier
    pub feature_len: usize,
    pub prediction: Prediction,
}

pub(crate) fn run_stages(stages: &[Box<dyn Stage>], mut sample: Sample) -> Result<Sample, PipelineError> {
    for stage in stages {
        trace!("{:?}: {}", sample.path, stage.name());
        sample = stage.apply(sample)?;
    }
    Ok(sample)
}

/// Instantiates stage objects for the descriptors. Without a classifier the
/// list stops after feature extraction, which is what training needs.
pub(crate) fn assemble_stages(
    descriptors: &[StageDescriptor],
    vocabulary: &Arc<LabelVocabulary>,
    classifier: Option<&Arc<TrainedClassifier>>,
    backbone: Option<Arc<dyn FeatureExtractor>>,
) -> Result<Vec<Box<dyn Stage>>, PipelineError> {
    let mut stages: Vec<Box<dyn Stage>> = Vec::with_capacity(descriptors.len());
    let mut backbone = backbone;
    for descriptor in descriptors {
        match descriptor {
            StageDescriptor::MapValueToKey => stages.push(Box::new(EncodeLabel {
                vocabulary: Arc::clone(vocabulary),
            })),
            StageDescriptor::LoadImage => stages.push(Box::new(LoadImage)),
            StageDescriptor::Resize { width, height, mode } => stages.push(Box::new(Resize {
                width: *width,
                height: *height,
                mode: *mode,
            })),
            StageDescriptor::ExtractPixels(options) => stages.push(Box::new(ExtractPixels {
                options: options.clone(),
            })),
            StageDescriptor::ScoreBackbone => {
                let backbone = backbone.take().ok_or_else(|| {
                    PipelineError::InvalidPipeline("score_backbone stage has no extractor".into())
                })?;
                stages.push(Box::new(ScoreBackbone { backbone }));
            }
            StageDescriptor::TrainClassifier(_) => match classifier {
                Some(classifier) => stages.push(Box::new(Classify {
                    classifier: Arc::clone(classifier),
                })),
                None => break,
            },
            StageDescriptor::MapKeyToValue => stages.push(Box::new(DecodeLabel {
                vocabulary: Arc::clone(vocabulary),
            })),
        }
    }
    if backbone.is_some() {
        return Err(PipelineError::InvalidPipeline(
            "an extractor was supplied but the pipeline has no score_backbone stage".into(),
        ));
    }
    Ok(stages)
}

/// A trained, immutable pipeline from image path to [`Prediction`].
///
/// Holds the label vocabulary and classifier learned by `fit`, the
/// preprocessing stage descriptors, and the frozen backbone. All methods take
/// `&self`; nothing changes between calls.
pub struct FittedPipeline {
    descriptors: Vec<StageDescriptor>,
    vocabulary: Arc<LabelVocabulary>,
    classifier: Arc<TrainedClassifier>,
    backbone: Option<BackboneRef>,
    stages: Vec<Box<dyn Stage>>,
}

impl FittedPipeline {
    pub(crate) fn assemble(
        descriptors: Vec<StageDescriptor>,
        vocabulary: Arc<LabelVocabulary>,
        classifier: Arc<TrainedClassifier>,
        backbone: Option<Arc<dyn FeatureExtractor>>,
    ) -> Result<Self, PipelineError> {
        validate_stage_list(&descriptors)?;
        classifier.validate()?;
        if classifier.num_classes() != vocabulary.len() {
            return Err(PipelineError::InvalidPipeline(format!(
                "classifier has {} classes but the vocabulary has {} labels",
                classifier.num_classes(),
                vocabulary.len()
            )));
        }
        let backbone_ref = backbone.as_ref().map(|b| b.reference());
        let stages = assemble_stages(&descriptors, &vocabulary, Some(&classifier), backbone)?;
        Ok(Self {
            descriptors,
            vocabulary,
            classifier,
            backbone: backbone_ref,
            stages,
        })
    }

    pub fn vocabulary(&self) -> &LabelVocabulary {
        &self.vocabulary
    }

    pub fn stages(&self) -> &[StageDescriptor] {
        &self.descriptors
    }

    /// Reference to the backbone used for training, if the pipeline has one
    pub fn backbone(&self) -> Option<&BackboneRef> {
        self.backbone.as_ref()
    }

    pub(crate) fn classifier(&self) -> &TrainedClassifier {
        &self.classifier
    }

    /// Whether prediction scores are probabilities (softmax) or raw decision values
    pub fn scores_normalized(&self) -> bool {
        self.classifier.scores_normalized()
    }

    fn run(&self, path: &Path, label: Option<&str>) -> Result<Sample, PipelineError> {
        run_stages(&self.stages, Sample::new(path, label.map(str::to_string)))
    }

    /// Applies every stage to one image. When `label` is given it must belong
    /// to the vocabulary.
    pub(crate) fn transform_one(&self, path: &Path, label: Option<&str>) -> Result<Prediction, PipelineError> {
        Prediction::from_sample(self.run(path, label)?)
    }

    /// Applies the pipeline to every record, in order.
    ///
    /// # Errors
    /// - `UnknownLabel` if a record's label is outside the trained vocabulary
    /// - `ImageRead` for any unreadable image
    pub fn transform(&self, records: &[LabeledImage]) -> Result<Vec<Prediction>, PipelineError> {
        debug!("Transforming {} records", records.len());
        records
            .iter()
            .map(|r| self.transform_one(&r.path, Some(r.label.as_str())))
            .collect()
    }

    /// Runs the first `limit` records and reports intermediate columns
    pub fn preview(&self, records: &[LabeledImage], limit: usize) -> Result<Vec<PreviewRow>, PipelineError> {
        records
            .iter()
            .take(limit)
            .map(|r| {
                let sample = self.run(&r.path, Some(r.label.as_str()))?;
                let feature_len = sample.feature_vector()?.len();
                let label = sample.label.clone();
                let label_key = sample.label_key;
                Ok(PreviewRow {
                    path: r.path.clone(),
                    label,
                    label_key,
                    feature_len,
                    prediction: Prediction::from_sample(sample)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_is_max_score() {
        let prediction = Prediction {
            path: PathBuf::from("cat.png"),
            scores: vec![0.1, 0.7, 0.2],
            predicted_label: "dog".into(),
        };
        assert_eq!(prediction.confidence(), 0.7);
    }

    #[test]
    fn test_incomplete_sample_is_not_a_prediction() {
        let sample = Sample::new("cat.png", None);
        assert!(matches!(
            Prediction::from_sample(sample),
            Err(PipelineError::InvalidPipeline(_))
        ));
    }
}
