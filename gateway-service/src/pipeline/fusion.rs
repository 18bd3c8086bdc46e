//! Cross-modality fusion of per-image labels and the audio label.

use crate::models::Verdict;
use serde::Serialize;

/// Minimum number of `REAL` images for the face modality to pass,
/// regardless of how many images were submitted.
pub const DEFAULT_IMAGE_QUORUM: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusionPolicy {
    pub image_quorum: usize,
}

impl Default for FusionPolicy {
    fn default() -> Self {
        Self {
            image_quorum: DEFAULT_IMAGE_QUORUM,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FusionDecision {
    pub real_images: usize,
    pub image_final: Verdict,
    pub final_decision: Verdict,
}

impl FusionPolicy {
    pub fn new(image_quorum: usize) -> Self {
        Self { image_quorum }
    }

    /// `Real` iff at least `image_quorum` labels are `Real`.
    pub fn image_verdict(&self, labels: &[Verdict]) -> Verdict {
        let real = count_real(labels);
        if real >= self.image_quorum {
            Verdict::Real
        } else {
            Verdict::Fake
        }
    }

    /// Both modalities must pass independently.
    pub fn fuse(&self, image_labels: &[Verdict], audio_label: Verdict) -> FusionDecision {
        let image_final = self.image_verdict(image_labels);
        let final_decision = if image_final.is_real() && audio_label.is_real() {
            Verdict::Real
        } else {
            Verdict::Fake
        };

        FusionDecision {
            real_images: count_real(image_labels),
            image_final,
            final_decision,
        }
    }
}

fn count_real(labels: &[Verdict]) -> usize {
    labels.iter().filter(|v| v.is_real()).count()
}
