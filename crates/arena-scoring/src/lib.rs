//! Arena Scoring - Text quality signals
//!
//! Turns a raw model response into four numeric quality signals, each on a
//! `[0, 5]` scale:
//! - **Readability**: Flesch reading ease, rescaled
//! - **Coherence**: mean Jaccard overlap of adjacent sentences
//! - **Vocabulary**: type-token ratio, rescaled
//! - **Overall**: weighted blend of the three
//!
//! Scoring is pure and total: degenerate input produces zero scores, never an
//! error.
//!
//! # Example
//!
//! ```rust
//! use arena_scoring::score;
//!
//! let metrics = score("The cat sat. The cat slept.");
//! assert!(metrics.readability > 0.0);
//! assert!(metrics.coherence > 0.0);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod metrics;
mod scorer;
mod text;

pub use metrics::QualityMetrics;
pub use scorer::{coherence, readability, score, type_token_ratio, vocabulary, QualityScorer};
pub use text::{count_syllables, TextProfile};

/// Upper bound of every quality signal
pub const MAX_SCORE: f64 = 5.0;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
