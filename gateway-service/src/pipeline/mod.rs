pub mod audio;
pub mod classifier;
pub mod decoder;
pub mod error;
pub mod fusion;
pub mod image;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod spectrogram;

pub use audio::{AudioPolicy, AudioSpectrogramClassifier};
pub use classifier::{Classifier, InputTensor, OnnxClassifier};
pub use decoder::{AudioDecoder, FfmpegDecoder};
pub use error::{ClassifierError, PipelineError};
pub use fusion::{FusionDecision, FusionPolicy};
pub use self::image::{ImageEnsembleClassifier, ImagePolicy};

use crate::models::{Classification, Verdict};

/// The single fail-closed fold: any stage error is `FAKE`.
pub fn fail_closed(result: &Result<Classification, PipelineError>) -> Verdict {
    match result {
        Ok(classification) => classification.verdict,
        Err(_) => Verdict::Fake,
    }
}
