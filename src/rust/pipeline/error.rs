use ort::Error as OrtError;
use std::io;
use std::path::PathBuf;

/// Represents the different types of errors that can occur while loading data,
/// fitting, evaluating or persisting an image classification pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// An image file is missing, unreadable or cannot be decoded
    #[error("Failed to read image {path:?}: {reason}")]
    ImageRead { path: PathBuf, reason: String },
    /// A tag file row does not have the `[imagePath, label]` shape (1-based row)
    #[error("Malformed record at row {row}: {reason}")]
    MalformedRecord { row: usize, reason: String },
    /// A label required downstream is absent from the trained vocabulary
    #[error("Unknown label: {0}")]
    UnknownLabel(String),
    /// Evaluation data references a label the pipeline was never trained on
    #[error("Schema mismatch: label '{0}' is not part of the trained vocabulary")]
    SchemaMismatch(String),
    #[error("Training data is empty")]
    TrainingDataEmpty,
    /// Multiclass training needs at least two distinct labels
    #[error("Training data must contain at least 2 distinct labels, found {found}")]
    InsufficientClassDiversity { found: usize },
    #[error("Evaluation data is empty")]
    EmptyEvaluationSet,
    #[error("Corrupt model file {path:?}: {reason}")]
    CorruptModelFile { path: PathBuf, reason: String },
    /// The stage list handed to the builder is incomplete or out of order
    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// Error occurred while loading or running the backbone model
    #[error("Model error: {0}")]
    ModelError(String),
    /// Error reported by the classifier optimizer
    #[error("Training error: {0}")]
    TrainingError(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<OrtError> for PipelineError {
    fn from(err: OrtError) -> Self {
        PipelineError::ModelError(err.to_string())
    }
}

impl PipelineError {
    pub(crate) fn image_read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PipelineError::ImageRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn corrupt_model(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PipelineError::CorruptModelFile {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
