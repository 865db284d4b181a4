use log::{debug, info};
use ndarray::{Array1, Array4};
use ort::session::Session;
use ort::value::Tensor;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::context::PipelineContext;
use crate::pipeline::PipelineError;
use crate::runtime::create_session_builder;

/// A frozen, pretrained feature extractor.
///
/// Implementations receive the batched pixel tensor produced by the pixel
/// extraction stage (`[1, H, W, C]` when interleaved, `[1, C, H, W]` when
/// planar) and return a fixed-length feature vector. Their weights are never
/// touched by training.
///
/// Pipelines only call `score` through `&self`; implementations that are not
/// reentrant must serialize access internally.
pub trait FeatureExtractor: Send + Sync {
    /// Describes how to obtain this extractor again when a saved pipeline is loaded
    fn reference(&self) -> BackboneRef;

    /// Runs the network on one input tensor
    fn score(&self, tensor: &Array4<f32>) -> Result<Array1<f32>, PipelineError>;
}

/// Persisted description of the backbone a pipeline was trained with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackboneRef {
    /// An ONNX graph on disk; `sha256` pins the exact artifact used for training
    Onnx {
        model_path: PathBuf,
        input_name: String,
        output_name: String,
        sha256: String,
    },
    /// Any other extractor; it must be supplied again by name when loading
    Custom { name: String },
}

impl BackboneRef {
    /// Reopens the referenced backbone.
    ///
    /// ONNX artifacts are verified against the recorded hash first, since a
    /// different graph would silently change every prediction.
    ///
    /// # Errors
    /// - `CorruptModelFile` if the artifact hash no longer matches
    /// - `ModelError` if the reference is `Custom`, or the model cannot be opened
    pub fn open(&self, ctx: &PipelineContext) -> Result<Arc<dyn FeatureExtractor>, PipelineError> {
        match self {
            BackboneRef::Onnx { model_path, input_name, output_name, sha256 } => {
                if !verify_file(model_path, sha256)? {
                    return Err(PipelineError::corrupt_model(
                        model_path,
                        "backbone artifact does not match the hash recorded at training time",
                    ));
                }
                let backbone = OnnxBackbone::from_file(model_path, input_name, output_name, ctx)?;
                Ok(Arc::new(backbone))
            }
            BackboneRef::Custom { name } => Err(PipelineError::ModelError(format!(
                "Backbone '{}' is not an ONNX model; supply it explicitly when loading",
                name
            ))),
        }
    }
}

/// Computes the SHA-256 of a file as lowercase hex
pub fn file_sha256(path: &Path) -> Result<String, PipelineError> {
    let bytes = fs::read(path)
        .map_err(|e| PipelineError::ModelError(format!("Failed to read model file {:?}: {}", path, e)))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn verify_file(path: &Path, expected_hash: &str) -> Result<bool, PipelineError> {
    debug!("Verifying backbone artifact: {:?}", path);
    let hash = file_sha256(path)?;
    debug!("Calculated hash: {}", hash);
    debug!("Expected hash:   {}", expected_hash);
    Ok(hash == expected_hash)
}

/// Runs a pretrained network exported to ONNX and returns one named output
/// (e.g. the pre-activation layer of Inception) as the feature vector.
#[derive(Debug)]
pub struct OnnxBackbone {
    session: Session,
    model_path: PathBuf,
    input_name: String,
    output_name: String,
    sha256: String,
}

impl OnnxBackbone {
    /// Default input tensor name of the Inception graph
    pub const INCEPTION_INPUT: &'static str = "input";
    /// Penultimate layer of the Inception graph, used as its feature vector
    pub const INCEPTION_OUTPUT: &'static str = "softmax2_pre_activation";

    /// Opens an ONNX model file and checks it exposes the named input and output
    ///
    /// # Arguments
    /// * `model_path` - Path to the `.onnx` file
    /// * `input_name` - Name of the image input tensor
    /// * `output_name` - Name of the output used as the feature vector
    /// * `ctx` - Supplies the ONNX Runtime threading configuration
    ///
    /// # Errors
    /// - `ModelError` if the file is missing, cannot be loaded, or lacks the named tensors
    pub fn from_file(
        model_path: impl AsRef<Path>,
        input_name: &str,
        output_name: &str,
        ctx: &PipelineContext,
    ) -> Result<Self, PipelineError> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(PipelineError::ModelError(format!("Model file not found: {:?}", model_path)));
        }
        let sha256 = file_sha256(model_path)?;

        let session = create_session_builder(ctx.runtime_config())?
            .commit_from_file(model_path)?;
        Self::validate_model(&session, input_name, output_name)?;
        info!("Backbone {:?} loaded, features from '{}'", model_path, output_name);

        Ok(Self {
            session,
            model_path: model_path.to_path_buf(),
            input_name: input_name.to_string(),
            output_name: output_name.to_string(),
            sha256,
        })
    }

    /// Opens the Inception graph with its default tensor names
    pub fn inception(model_path: impl AsRef<Path>, ctx: &PipelineContext) -> Result<Self, PipelineError> {
        Self::from_file(model_path, Self::INCEPTION_INPUT, Self::INCEPTION_OUTPUT, ctx)
    }

    fn validate_model(session: &Session, input_name: &str, output_name: &str) -> Result<(), PipelineError> {
        if !session.inputs.iter().any(|input| input.name == input_name) {
            return Err(PipelineError::ModelError(format!(
                "Model has no input named '{}' (found: {:?})",
                input_name,
                session.inputs.iter().map(|i| i.name.as_str()).collect::<Vec<_>>()
            )));
        }
        if !session.outputs.iter().any(|output| output.name == output_name) {
            return Err(PipelineError::ModelError(format!(
                "Model has no output named '{}' (found: {:?})",
                output_name,
                session.outputs.iter().map(|o| o.name.as_str()).collect::<Vec<_>>()
            )));
        }
        Ok(())
    }
}

impl FeatureExtractor for OnnxBackbone {
    fn reference(&self) -> BackboneRef {
        BackboneRef::Onnx {
            model_path: self.model_path.clone(),
            input_name: self.input_name.clone(),
            output_name: self.output_name.clone(),
            sha256: self.sha256.clone(),
        }
    }

    fn score(&self, tensor: &Array4<f32>) -> Result<Array1<f32>, PipelineError> {
        let mut input_tensors = HashMap::new();
        input_tensors.insert(
            self.input_name.as_str(),
            Tensor::from_array(tensor.as_standard_layout().into_owned())
                .map_err(|e| PipelineError::ModelError(format!("Failed to create input tensor: {}", e)))?,
        );

        let outputs = self.session.run(input_tensors)
            .map_err(|e| PipelineError::ModelError(format!("Failed to run model: {}", e)))?;
        let output_tensor = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()
            .map_err(|e| PipelineError::ModelError(format!("Failed to extract output tensor: {}", e)))?;

        // Drop the batch dimension: [1, ..features] -> [features]
        Ok(Array1::from_iter(output_tensor.iter().cloned()))
    }
}
