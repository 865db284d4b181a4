//! Saving and loading fitted pipelines.
//!
//! A model file is one JSON document holding the stage descriptors, the
//! label vocabulary, the classifier parameters and a reference to the
//! backbone. Floats are written with round-trip precision, so a reloaded
//! pipeline predicts exactly what the saved one did.

use log::info;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use crate::backbone::{BackboneRef, FeatureExtractor};
use crate::context::PipelineContext;
use crate::pipeline::{FittedPipeline, LabelVocabulary, PipelineError, StageDescriptor, TrainedClassifier};

const FORMAT: &str = "occipital-pipeline";
const VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct ModelFile {
    format: String,
    version: u32,
    stages: Vec<StageDescriptor>,
    vocabulary: LabelVocabulary,
    classifier: TrainedClassifier,
    backbone: Option<BackboneRef>,
}

/// Writes the fitted pipeline to `path`, creating parent directories.
pub fn save(pipeline: &FittedPipeline, path: impl AsRef<Path>) -> Result<(), PipelineError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let model = ModelFile {
        format: FORMAT.to_string(),
        version: VERSION,
        stages: pipeline.stages().to_vec(),
        vocabulary: pipeline.vocabulary().clone(),
        classifier: pipeline.classifier().clone(),
        backbone: pipeline.backbone().cloned(),
    };
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, &model)
        .map_err(|e| PipelineError::Io(e.into()))?;
    writer.flush()?;
    info!("Saved pipeline ({} labels) to {:?}", model.vocabulary.len(), path);
    Ok(())
}

fn read_model_file(path: &Path) -> Result<ModelFile, PipelineError> {
    let reader = BufReader::new(File::open(path)?);
    let model: ModelFile = serde_json::from_reader(reader)
        .map_err(|e| PipelineError::corrupt_model(path, e))?;
    if model.format != FORMAT {
        return Err(PipelineError::corrupt_model(path, format!("unknown format '{}'", model.format)));
    }
    if model.version != VERSION {
        return Err(PipelineError::corrupt_model(
            path,
            format!("unsupported version {} (expected {})", model.version, VERSION),
        ));
    }
    Ok(model)
}

fn rebuild(
    model: ModelFile,
    backbone: Option<Arc<dyn FeatureExtractor>>,
    path: &Path,
) -> Result<FittedPipeline, PipelineError> {
    let labels = model.vocabulary.len();
    let pipeline = FittedPipeline::assemble(
        model.stages,
        Arc::new(model.vocabulary),
        Arc::new(model.classifier),
        backbone,
    )
    .map_err(|e| match e {
        PipelineError::InvalidPipeline(reason) => PipelineError::corrupt_model(path, reason),
        other => other,
    })?;
    info!("Loaded pipeline ({} labels) from {:?}", labels, path);
    Ok(pipeline)
}

/// Loads a pipeline saved with [`save`], reopening an ONNX backbone if it has one.
///
/// # Errors
/// - `CorruptModelFile` if the file is not a valid model document, or the
///   backbone artifact changed since training
/// - `ModelError` if the pipeline was trained with a custom backbone; use
///   [`load_with_backbone`] instead
pub fn load(path: impl AsRef<Path>, ctx: &PipelineContext) -> Result<FittedPipeline, PipelineError> {
    let path = path.as_ref();
    let model = read_model_file(path)?;
    let backbone = match &model.backbone {
        Some(reference) => Some(reference.open(ctx)?),
        None => None,
    };
    rebuild(model, backbone, path)
}

/// Loads a pipeline whose backbone is supplied by the caller.
///
/// The extractor's [`reference`](FeatureExtractor::reference) must equal the
/// one recorded at save time.
pub fn load_with_backbone(
    path: impl AsRef<Path>,
    backbone: Arc<dyn FeatureExtractor>,
) -> Result<FittedPipeline, PipelineError> {
    let path = path.as_ref();
    let model = read_model_file(path)?;
    let supplied = backbone.reference();
    match &model.backbone {
        Some(recorded) if *recorded == supplied => {}
        Some(recorded) => {
            return Err(PipelineError::ModelError(format!(
                "supplied backbone {:?} does not match the recorded {:?}",
                supplied, recorded
            )))
        }
        None => {
            return Err(PipelineError::ModelError(
                "pipeline was saved without a backbone".to_string(),
            ))
        }
    }
    rebuild(model, Some(backbone), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_is_corrupt() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), b"{ this is not json").unwrap();
        assert!(matches!(
            load(file.path(), &PipelineContext::new()),
            Err(PipelineError::CorruptModelFile { .. })
        ));
    }

    #[test]
    fn test_wrong_format_tag_is_corrupt() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(
            file.path(),
            r#"{"format":"something-else","version":1,"stages":[],"vocabulary":[],
               "classifier":{"scaler":null,"weights":{"v":1,"dim":[0,0],"data":[]},
               "intercept":{"v":1,"dim":[0],"data":[]},"normalize_scores":true},"backbone":null}"#,
        )
        .unwrap();
        match load(file.path(), &PipelineContext::new()) {
            Err(PipelineError::CorruptModelFile { reason, .. }) => assert!(reason.contains("format")),
            Err(other) => panic!("expected CorruptModelFile, got {:?}", other),
            Ok(_) => panic!("expected CorruptModelFile"),
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            load("/nonexistent/model.json", &PipelineContext::new()),
            Err(PipelineError::Io(_))
        ));
    }
}
