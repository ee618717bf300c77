//! Quality metric container

use serde::{Deserialize, Serialize};

/// Four quality signals for one response, each in `[0, 5]`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Weighted blend of the other three
    pub overall: f64,
    /// Rescaled Flesch reading ease
    pub readability: f64,
    /// Adjacent-sentence word overlap
    pub coherence: f64,
    /// Rescaled type-token ratio
    pub vocabulary: f64,
}

impl QualityMetrics {
    /// Weight of readability in the overall score
    pub const READABILITY_WEIGHT: f64 = 0.4;
    /// Weight of coherence in the overall score
    pub const COHERENCE_WEIGHT: f64 = 0.3;
    /// Weight of vocabulary in the overall score
    pub const VOCABULARY_WEIGHT: f64 = 0.3;

    /// All-zero metrics, used for failed or empty responses
    #[inline]
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }

    /// Combine component signals into a full metric set
    #[must_use]
    pub fn from_components(readability: f64, coherence: f64, vocabulary: f64) -> Self {
        let overall = Self::READABILITY_WEIGHT * readability
            + Self::COHERENCE_WEIGHT * coherence
            + Self::VOCABULARY_WEIGHT * vocabulary;

        Self {
            overall: overall.min(crate::MAX_SCORE),
            readability,
            coherence,
            vocabulary,
        }
    }

    /// Whether every signal is zero
    #[inline]
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.overall == 0.0
            && self.readability == 0.0
            && self.coherence == 0.0
            && self.vocabulary == 0.0
    }
}
