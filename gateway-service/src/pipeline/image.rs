//! Face image classification with test-time augmentation.
//!
//! Each image is decoded, resized to the model input, luma-equalized in YUV
//! space, lightly blurred, then scored three times (as-is, mirrored,
//! brightened). The mean score is thresholded.

use crate::models::Classification;
use crate::pipeline::classifier::{checked_confidence, Classifier, InputTensor};
use crate::pipeline::error::PipelineError;
use axum::body::Bytes;
use futures::stream::{self, StreamExt};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use std::sync::Arc;

pub const DEFAULT_IMAGE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_INPUT_SIZE: u32 = 224;
pub const BRIGHTNESS_FACTOR: f32 = 1.1;
pub const BLUR_SIGMA: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImagePolicy {
    pub input_width: u32,
    pub input_height: u32,
    pub threshold: f32,
    pub brightness_factor: f32,
    pub blur_sigma: f32,
}

impl Default for ImagePolicy {
    fn default() -> Self {
        Self {
            input_width: DEFAULT_INPUT_SIZE,
            input_height: DEFAULT_INPUT_SIZE,
            threshold: DEFAULT_IMAGE_THRESHOLD,
            brightness_factor: BRIGHTNESS_FACTOR,
            blur_sigma: BLUR_SIGMA,
        }
    }
}

#[derive(Clone)]
pub struct ImageEnsembleClassifier {
    classifier: Arc<dyn Classifier>,
    policy: ImagePolicy,
}

impl ImageEnsembleClassifier {
    pub fn new(classifier: Arc<dyn Classifier>, policy: ImagePolicy) -> Self {
        Self { classifier, policy }
    }

    pub fn policy(&self) -> &ImagePolicy {
        &self.policy
    }

    pub fn preprocess(&self, bytes: &[u8]) -> Result<RgbImage, PipelineError> {
        let decoded =
            image::load_from_memory(bytes).map_err(|e| PipelineError::ImageDecode(e.to_string()))?;
        let resized = imageops::resize(
            &decoded.to_rgb8(),
            self.policy.input_width,
            self.policy.input_height,
            FilterType::CatmullRom,
        );
        let equalized = equalize_luma(&resized);
        Ok(imageops::blur(&equalized, self.policy.blur_sigma))
    }

    /// Scores one image. CPU bound; call from a blocking context.
    pub fn classify(&self, bytes: &[u8]) -> Result<Classification, PipelineError> {
        let normalized = self.preprocess(bytes)?;
        let base = InputTensor::from_rgb(&normalized);
        let mirrored = base.mirrored();
        let brightened = base.brightened(self.policy.brightness_factor);

        let mut total = 0.0;
        for view in [&base, &mirrored, &brightened] {
            total += checked_confidence(self.classifier.predict(view)?)?;
        }
        let mean = total / 3.0;

        tracing::debug!(confidence = mean, "Image scored");

        Ok(Classification::new(mean, self.policy.threshold))
    }

    /// Scores every image on the blocking pool, at most `workers` at a time.
    /// Results keep submission order and there is exactly one per input.
    pub async fn classify_batch(
        &self,
        images: Vec<Bytes>,
        workers: usize,
    ) -> Vec<Result<Classification, PipelineError>> {
        stream::iter(images.into_iter().map(|bytes| {
            let this = self.clone();
            async move {
                tokio::task::spawn_blocking(move || this.classify(&bytes))
                    .await
                    .unwrap_or_else(|e| Err(PipelineError::Worker(e.to_string())))
            }
        }))
        .buffered(workers.max(1))
        .collect()
        .await
    }
}

/// Histogram-equalizes the luma channel in YUV space, leaving chroma alone.
pub fn equalize_luma(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let pixels = (width * height) as usize;
    let mut luma = Vec::with_capacity(pixels);
    let mut chroma = Vec::with_capacity(pixels);

    for pixel in image.pixels() {
        let [r, g, b] = pixel.0.map(f32::from);
        let y = 0.299 * r + 0.587 * g + 0.114 * b;
        luma.push(to_u8(y));
        chroma.push((
            to_u8((b - y) * 0.492 + 128.0),
            to_u8((r - y) * 0.877 + 128.0),
        ));
    }

    equalize_histogram(&mut luma);

    let mut out = RgbImage::new(width, height);
    for ((pixel, y), (u, v)) in out.pixels_mut().zip(luma).zip(chroma) {
        let y = f32::from(y);
        let u = f32::from(u) - 128.0;
        let v = f32::from(v) - 128.0;
        *pixel = Rgb([
            to_u8(y + 1.140 * v),
            to_u8(y - 0.395 * u - 0.581 * v),
            to_u8(y + 2.032 * u),
        ]);
    }
    out
}

/// Spreads the cumulative histogram over `0..=255`. A single-valued channel is
/// left unchanged.
fn equalize_histogram(channel: &mut [u8]) {
    if channel.is_empty() {
        return;
    }

    let mut hist = [0usize; 256];
    for &v in channel.iter() {
        hist[v as usize] += 1;
    }

    let total = channel.len();
    let first = hist.iter().position(|&c| c > 0).unwrap_or(0);
    if hist[first] == total {
        return;
    }

    let scale = 255.0 / (total - hist[first]) as f32;
    let mut lut = [0u8; 256];
    let mut sum = 0usize;
    for i in (first + 1)..256 {
        sum += hist[i];
        lut[i] = to_u8(sum as f32 * scale);
    }

    for v in channel.iter_mut() {
        *v = lut[*v as usize];
    }
}

fn to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
