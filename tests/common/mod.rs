#![allow(dead_code)]

use image::{Rgb, RgbImage};
use ndarray::{Array1, Array4, Axis};
use occipital::{
    BackboneRef, FeatureExtractor, LabeledImage, LbfgsOptions, Pipeline, PipelineBuilder, PipelineContext,
    PipelineError, PixelOptions,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Writes a `size` x `size` PNG whose pixels vary slightly around `base`
pub fn write_image(dir: &Path, name: &str, base: [u8; 3], size: u32) -> PathBuf {
    let path = dir.join(name);
    let image = RgbImage::from_fn(size, size, |x, y| {
        let jitter = ((x * 7 + y * 13) % 20) as u8;
        Rgb([
            base[0].saturating_add(jitter),
            base[1].saturating_add(jitter / 2),
            base[2].saturating_add(jitter),
        ])
    });
    image.save(&path).unwrap();
    path
}

/// Reddish images labeled "cat" and bluish images labeled "dog", `per_label` of each
pub fn cats_and_dogs(dir: &Path, per_label: usize) -> Vec<LabeledImage> {
    let mut records = Vec::new();
    for i in 0..per_label {
        let shade = (i * 10) as u8;
        let cat = write_image(dir, &format!("cat{}.png", i), [200 + shade / 2, 20 + shade, 30], 12);
        records.push(LabeledImage::new(cat, "cat"));
        let dog = write_image(dir, &format!("dog{}.png", i), [30, 20 + shade, 200 + shade / 2], 12);
        records.push(LabeledImage::new(dog, "dog"));
    }
    records
}

/// Mean value of each channel of an interleaved `[1, H, W, 3]` tensor
pub struct MeanColor;

impl FeatureExtractor for MeanColor {
    fn reference(&self) -> BackboneRef {
        BackboneRef::Custom { name: "mean_color".into() }
    }

    fn score(&self, tensor: &Array4<f32>) -> Result<Array1<f32>, PipelineError> {
        let pixels = tensor.len() / 3;
        Ok(tensor.sum_axis(Axis(0)).sum_axis(Axis(0)).sum_axis(Axis(0)) / pixels as f32)
    }
}

pub fn ctx() -> PipelineContext {
    PipelineContext::new().with_seed(7)
}

/// Small planar raw-pixel pipeline
pub fn raw_pixel_pipeline(options: LbfgsOptions) -> Result<Pipeline, PipelineError> {
    PipelineBuilder::new(&ctx())
        .map_value_to_key()?
        .load_images()?
        .resize_images(8, 8)?
        .extract_pixels(PixelOptions {
            interleave: false,
            offset: 0.0,
            scale: 1.0 / 255.0,
        })?
        .train_lbfgs(options)?
        .map_key_to_value()?
        .build()
}

/// Interleaved pipeline scored with [`MeanColor`]
pub fn mean_color_pipeline() -> Result<Pipeline, PipelineError> {
    PipelineBuilder::new(&ctx())
        .map_value_to_key()?
        .load_images()?
        .resize_images(8, 8)?
        .extract_pixels(PixelOptions {
            interleave: true,
            offset: 0.0,
            scale: 1.0,
        })?
        .score_backbone(Arc::new(MeanColor))?
        .train_lbfgs(LbfgsOptions::default())?
        .map_key_to_value()?
        .build()
}
