//! Voice clip classification through a rendered mel spectrogram.
//!
//! Stages run in order and the first failure stops the clip:
//! size gate, container normalization, bounded PCM load, spectrogram
//! rendering, single-pass inference.

use crate::models::Classification;
use crate::pipeline::classifier::{checked_confidence, Classifier, InputTensor};
use crate::pipeline::decoder::AudioDecoder;
use crate::pipeline::error::PipelineError;
use crate::pipeline::spectrogram::{
    power_to_db, rasterize, MelSpectrogram, SpectrogramConfig, DEFAULT_HOP_LENGTH,
    DEFAULT_N_FFT, DEFAULT_N_MELS,
};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

pub const DEFAULT_AUDIO_THRESHOLD: f32 = 0.8;
pub const MIN_AUDIO_BYTES: u64 = 1000;
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;
pub const DEFAULT_MAX_DURATION_SECS: f32 = 5.0;
pub const DEFAULT_RASTER_SIZE: u32 = 300;

pub const PCM_FILE_NAME: &str = "audio.pcm";
pub const SPECTROGRAM_FILE_NAME: &str = "audio_spec.png";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioPolicy {
    pub threshold: f32,
    pub min_bytes: u64,
    pub sample_rate: u32,
    pub max_duration_secs: f32,
    pub input_size: u32,
    pub raster_size: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
}

impl Default for AudioPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_AUDIO_THRESHOLD,
            min_bytes: MIN_AUDIO_BYTES,
            sample_rate: DEFAULT_SAMPLE_RATE,
            max_duration_secs: DEFAULT_MAX_DURATION_SECS,
            input_size: crate::pipeline::image::DEFAULT_INPUT_SIZE,
            raster_size: DEFAULT_RASTER_SIZE,
            n_fft: DEFAULT_N_FFT,
            hop_length: DEFAULT_HOP_LENGTH,
            n_mels: DEFAULT_N_MELS,
        }
    }
}

impl AudioPolicy {
    pub fn max_samples(&self) -> usize {
        (self.sample_rate as f32 * self.max_duration_secs).round() as usize
    }

    fn spectrogram_config(&self) -> SpectrogramConfig {
        SpectrogramConfig {
            sample_rate: self.sample_rate,
            n_fft: self.n_fft,
            hop_length: self.hop_length,
            n_mels: self.n_mels,
        }
    }
}

#[derive(Clone)]
pub struct AudioSpectrogramClassifier {
    classifier: Arc<dyn Classifier>,
    decoder: Arc<dyn AudioDecoder>,
    mel: Arc<MelSpectrogram>,
    policy: AudioPolicy,
}

impl AudioSpectrogramClassifier {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        decoder: Arc<dyn AudioDecoder>,
        policy: AudioPolicy,
    ) -> Self {
        Self {
            classifier,
            decoder,
            mel: Arc::new(MelSpectrogram::new(policy.spectrogram_config())),
            policy,
        }
    }

    pub fn policy(&self) -> &AudioPolicy {
        &self.policy
    }

    pub fn passes_size_gate(&self, size: u64) -> bool {
        size >= self.policy.min_bytes
    }

    /// Classifies the clip at `clip`. Intermediate artifacts (`audio.pcm`,
    /// `audio_spec.png`) are written to `work_dir`.
    pub async fn classify(
        &self,
        clip: &Path,
        work_dir: &Path,
    ) -> Result<Classification, PipelineError> {
        let size = tokio::fs::metadata(clip).await?.len();
        if !self.passes_size_gate(size) {
            return Err(PipelineError::AudioTooSmall {
                size,
                min: self.policy.min_bytes,
            });
        }

        let pcm_path = work_dir.join(PCM_FILE_NAME);
        self.decoder
            .decode(
                clip,
                &pcm_path,
                self.policy.sample_rate,
                1,
                self.policy.max_duration_secs,
            )
            .await?;

        let samples = load_pcm(&pcm_path, self.policy.max_samples()).await?;
        tracing::debug!(samples = samples.len(), "Audio decoded");

        let this = self.clone();
        let spectrogram_path = work_dir.join(SPECTROGRAM_FILE_NAME);
        tokio::task::spawn_blocking(move || this.score(&samples, &spectrogram_path))
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))?
    }

    /// Mel spectrogram of `samples` painted at the raster size.
    pub fn render(&self, samples: &[f32]) -> Result<RgbImage, PipelineError> {
        if samples.is_empty() {
            return Err(PipelineError::EmptySignal);
        }
        let power = self.mel.power(samples);
        if power.is_empty() {
            return Err(PipelineError::Spectrogram("no frames".to_string()));
        }
        let db = power_to_db(&power);
        Ok(rasterize(&db, self.policy.raster_size, self.policy.raster_size))
    }

    fn score(&self, samples: &[f32], spectrogram_path: &Path) -> Result<Classification, PipelineError> {
        let raster = self.render(samples)?;
        raster
            .save(spectrogram_path)
            .map_err(|e| PipelineError::Spectrogram(e.to_string()))?;

        let resized = imageops::resize(
            &raster,
            self.policy.input_size,
            self.policy.input_size,
            FilterType::CatmullRom,
        );
        let tensor = InputTensor::from_rgb(&resized);
        let confidence = checked_confidence(self.classifier.predict(&tensor)?)?;

        tracing::debug!(confidence = confidence, "Audio scored");

        Ok(Classification::new(confidence, self.policy.threshold))
    }
}

/// Reads up to `max_samples` little-endian `f32` samples. Bytes past the
/// window are never read. Non-finite samples are zeroed.
pub async fn load_pcm(path: &Path, max_samples: usize) -> Result<Vec<f32>, PipelineError> {
    let limit = max_samples.saturating_mul(4) as u64;
    let mut bytes = Vec::new();
    tokio::fs::File::open(path)
        .await?
        .take(limit)
        .read_to_end(&mut bytes)
        .await?;

    let samples: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|chunk| {
            let v = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            if v.is_finite() { v } else { 0.0 }
        })
        .collect();

    if samples.is_empty() {
        return Err(PipelineError::EmptySignal);
    }
    Ok(samples)
}
