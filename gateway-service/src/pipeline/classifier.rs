//! The injected classification capability and its input tensor.
//!
//! Both modalities feed the same shape of model: a `1 x H x W x 3` (NHWC)
//! `f32` tensor with values in `[0, 1]`, producing a single confidence.

use crate::pipeline::error::ClassifierError;
use image::RgbImage;
use std::path::Path;
use tract_onnx::prelude::*;

/// Shared, read-only inference capability. Implementations must be safe for
/// concurrent `predict` calls.
pub trait Classifier: Send + Sync {
    fn predict(&self, input: &InputTensor) -> Result<f32, ClassifierError>;
}

/// Rejects confidences a well-behaved model cannot produce.
pub fn checked_confidence(confidence: f32) -> Result<f32, ClassifierError> {
    if confidence.is_finite() && (0.0..=1.0).contains(&confidence) {
        Ok(confidence)
    } else {
        Err(ClassifierError::OutOfRange(confidence))
    }
}

/// HWC, 3-channel `f32` image normalized to `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl InputTensor {
    pub fn from_rgb(image: &RgbImage) -> Self {
        let data = image
            .as_raw()
            .iter()
            .map(|&v| f32::from(v) / 255.0)
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }

    /// Left-right mirror.
    pub fn mirrored(&self) -> Self {
        let row_len = self.width as usize * 3;
        let mut data = Vec::with_capacity(self.data.len());
        for row in self.data.chunks_exact(row_len) {
            for pixel in row.chunks_exact(3).rev() {
                data.extend_from_slice(pixel);
            }
        }
        Self {
            width: self.width,
            height: self.height,
            data,
        }
    }

    /// Scales every value by `factor`, clamped to `[0, 1]`.
    pub fn brightened(&self, factor: f32) -> Self {
        Self {
            width: self.width,
            height: self.height,
            data: self
                .data
                .iter()
                .map(|v| (v * factor).clamp(0.0, 1.0))
                .collect(),
        }
    }
}

/// ONNX model executed with tract. The graph is optimized for a fixed
/// `1 x height x width x 3` input at load time.
pub struct OnnxClassifier {
    plan: TypedRunnableModel<TypedModel>,
    width: u32,
    height: u32,
}

impl OnnxClassifier {
    pub fn load(path: &Path, width: u32, height: u32) -> Result<Self, ClassifierError> {
        let load_err = |e: TractError| ClassifierError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(load_err)?
            .with_input_fact(
                0,
                f32::fact([1, height as usize, width as usize, 3]).into(),
            )
            .map_err(load_err)?
            .into_optimized()
            .map_err(load_err)?
            .into_runnable()
            .map_err(load_err)?;

        tracing::info!(
            model_path = %path.display(),
            width = width,
            height = height,
            "Classifier model loaded"
        );

        Ok(Self {
            plan,
            width,
            height,
        })
    }
}

impl Classifier for OnnxClassifier {
    fn predict(&self, input: &InputTensor) -> Result<f32, ClassifierError> {
        if input.width() != self.width || input.height() != self.height {
            return Err(ClassifierError::Shape {
                width: self.width,
                height: self.height,
                got_width: input.width(),
                got_height: input.height(),
            });
        }

        let inference_err = |e: TractError| ClassifierError::Inference(e.to_string());

        let tensor = Tensor::from_shape(
            &[1, self.height as usize, self.width as usize, 3],
            input.data(),
        )
        .map_err(inference_err)?;

        let outputs = self.plan.run(tvec!(tensor.into())).map_err(inference_err)?;
        let output = outputs
            .first()
            .ok_or_else(|| ClassifierError::Inference("model produced no outputs".to_string()))?;
        let view = output.to_array_view::<f32>().map_err(inference_err)?;

        view.iter()
            .next()
            .copied()
            .ok_or_else(|| ClassifierError::Inference("model output is empty".to_string()))
    }
}
