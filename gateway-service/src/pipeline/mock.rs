//! Mock classifier and decoder implementations for testing.

use crate::pipeline::classifier::{Classifier, InputTensor};
use crate::pipeline::decoder::AudioDecoder;
use crate::pipeline::error::{ClassifierError, PipelineError};
use async_trait::async_trait;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy)]
enum Scoring {
    Fixed(f32),
    MeanIntensity,
    Failing,
}

/// Mock classifier that counts its calls.
#[derive(Debug)]
pub struct MockClassifier {
    scoring: Scoring,
    calls: AtomicUsize,
}

impl MockClassifier {
    fn with(scoring: Scoring) -> Self {
        Self {
            scoring,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always returns `confidence`.
    pub fn fixed(confidence: f32) -> Self {
        Self::with(Scoring::Fixed(confidence))
    }

    /// Returns the mean pixel value, so bright inputs score high.
    pub fn mean_intensity() -> Self {
        Self::with(Scoring::MeanIntensity)
    }

    pub fn failing() -> Self {
        Self::with(Scoring::Failing)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for MockClassifier {
    fn predict(&self, input: &InputTensor) -> Result<f32, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.scoring {
            Scoring::Fixed(confidence) => Ok(confidence),
            Scoring::MeanIntensity => Ok(input.mean()),
            Scoring::Failing => Err(ClassifierError::Inference(
                "mock classifier failure".to_string(),
            )),
        }
    }
}

/// Mock decoder that synthesizes PCM instead of reading the input. Like
/// ffmpeg with `-t`, it stops at the requested window.
#[derive(Debug)]
pub struct MockDecoder {
    signal: Option<(f32, f32)>,
    calls: AtomicUsize,
}

impl MockDecoder {
    /// Sine tone of `freq` Hz lasting `seconds`.
    pub fn tone(freq: f32, seconds: f32) -> Self {
        Self {
            signal: Some((freq, seconds)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn silence(seconds: f32) -> Self {
        Self::tone(0.0, seconds)
    }

    pub fn failing() -> Self {
        Self {
            signal: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioDecoder for MockDecoder {
    async fn decode(
        &self,
        _input: &Path,
        output: &Path,
        sample_rate: u32,
        _channels: u16,
        max_duration_secs: f32,
    ) -> Result<(), PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (freq, seconds) = self
            .signal
            .ok_or_else(|| PipelineError::Decoder("mock decoder failure".to_string()))?;

        let n = (sample_rate as f32 * seconds.min(max_duration_secs)) as usize;
        let pcm: Vec<u8> = (0..n)
            .map(|i| {
                (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin() * 0.5
            })
            .flat_map(f32::to_le_bytes)
            .collect();

        tokio::fs::write(output, pcm).await?;
        Ok(())
    }
}

/// PNG of a single color.
pub fn solid_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageOutputFormat::Png)
        .expect("in-memory PNG encoding");
    buf.into_inner()
}
