use serde::{Deserialize, Serialize};
use std::fmt;

/// Liveness label for a single piece of evidence, a modality, or a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Real,
    Fake,
}

impl Verdict {
    /// `Real` iff `confidence >= threshold`. NaN is never real.
    pub fn from_confidence(confidence: f32, threshold: f32) -> Self {
        if confidence >= threshold {
            Verdict::Real
        } else {
            Verdict::Fake
        }
    }

    pub fn is_real(self) -> bool {
        self == Verdict::Real
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Real => "REAL",
            Verdict::Fake => "FAKE",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier output together with the label it produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub verdict: Verdict,
    pub confidence: f32,
}

impl Classification {
    pub fn new(confidence: f32, threshold: f32) -> Self {
        Self {
            verdict: Verdict::from_confidence(confidence, threshold),
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_inclusive() {
        assert_eq!(Verdict::from_confidence(0.5, 0.5), Verdict::Real);
        assert_eq!(Verdict::from_confidence(0.4999, 0.5), Verdict::Fake);
        assert_eq!(Verdict::from_confidence(0.8, 0.8), Verdict::Real);
        assert_eq!(Verdict::from_confidence(0.79, 0.8), Verdict::Fake);
    }

    #[test]
    fn nan_confidence_is_fake() {
        assert_eq!(Verdict::from_confidence(f32::NAN, 0.5), Verdict::Fake);
    }

    #[test]
    fn serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Verdict::Real).unwrap(), "\"REAL\"");
        assert_eq!(Verdict::Fake.to_string(), "FAKE");
    }
}
