//! Image classification by transfer learning: a frozen pretrained network
//! turns each image into a feature vector, and a multinomial logistic
//! regression head trained with L-BFGS maps those features to labels.
//!
//! # Basic Usage
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use occipital::{evaluate, load_tag_file, predict, LbfgsOptions, OnnxBackbone, PipelineBuilder, PipelineContext};
//! use std::sync::Arc;
//!
//! let ctx = PipelineContext::new().with_seed(1);
//! let backbone = Arc::new(OnnxBackbone::inception("assets/inception/inception.onnx", &ctx)?);
//! let pipeline = PipelineBuilder::inception(&ctx, backbone, LbfgsOptions::default())?;
//!
//! let fitted = pipeline.fit(&load_tag_file("assets/images/tags.tsv")?)?;
//! let metrics = evaluate(&fitted, &load_tag_file("assets/images/test-tags.tsv")?)?;
//! println!("macro accuracy: {:.3}", metrics.macro_accuracy);
//!
//! let prediction = predict(&fitted, "assets/images/toaster3.jpg")?;
//! println!("{}", prediction.predicted_label);
//! # Ok(())
//! # }
//! ```
//!
//! # Custom stages
//!
//! Pipelines are composed stage by stage; the builder rejects any order other
//! than label encoding, image loading, resizing, pixel extraction, backbone
//! scoring, training and label decoding:
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use occipital::{LbfgsOptions, PipelineBuilder, PipelineContext, PixelOptions};
//!
//! let ctx = PipelineContext::new();
//! let pipeline = PipelineBuilder::new(&ctx)
//!     .map_value_to_key()?
//!     .load_images()?
//!     .resize_images(32, 32)?
//!     .extract_pixels(PixelOptions { interleave: false, offset: 0.0, scale: 1.0 / 255.0 })?
//!     .train_lbfgs(LbfgsOptions::default().with_max_iterations(100))?
//!     .map_key_to_value()?
//!     .build()?;
//! # let _ = pipeline;
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! A [`FittedPipeline`] is immutable after `fit` or `load` and can be shared
//! across threads with `Arc`.

pub mod backbone;
mod context;
pub mod dataset;
pub mod evaluation;
pub mod persistence;
pub mod pipeline;
mod predictor;
mod runtime;

pub use backbone::{file_sha256, BackboneRef, FeatureExtractor, OnnxBackbone};
pub use context::PipelineContext;
pub use dataset::{
    load_from_folders, load_labeled_folders, load_tag_file, load_tag_file_with_root, train_test_split,
    LabeledImage,
};
pub use evaluation::{evaluate, ConfusionMatrix, Metrics};
pub use persistence::{load, load_with_backbone, save};
pub use pipeline::{
    FittedPipeline, LabelVocabulary, LbfgsOptions, Pipeline, PipelineBuilder, PipelineError, PixelOptions,
    Prediction, PreviewRow, ResizeMode, StageDescriptor, TrainedClassifier, INCEPTION_IMAGE_SIZE, INCEPTION_MEAN,
};
pub use predictor::{on_image_selected, predict, PICKER_EXTENSIONS};
pub use runtime::{create_session_builder, RuntimeConfig};

pub fn init_logger() {
    env_logger::init();
}
