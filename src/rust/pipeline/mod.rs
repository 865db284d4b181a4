//! Composition of the image classification pipeline: stage descriptors, the
//! builder that orders them, and the fitted result.

mod builder;
mod error;
mod fitted;
pub mod stages;
mod trainer;
mod utils;
mod vocabulary;

pub use builder::{Pipeline, PipelineBuilder, INCEPTION_IMAGE_SIZE, INCEPTION_MEAN};
pub use error::PipelineError;
pub use fitted::{FittedPipeline, Prediction, PreviewRow};
pub use stages::{PixelOptions, ResizeMode, StageDescriptor};
pub use trainer::{LbfgsOptions, TrainedClassifier};
pub use vocabulary::LabelVocabulary;

pub(crate) use utils::softmax;
