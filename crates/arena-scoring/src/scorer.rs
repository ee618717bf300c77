//! Quality scoring algorithms

use crate::metrics::QualityMetrics;
use crate::text::{words_of, TextProfile};
use crate::MAX_SCORE;
use std::collections::HashSet;

/// Flesch reading ease intercept
const FLESCH_BASE: f64 = 206.835;
/// Penalty per word of average sentence length
const FLESCH_SENTENCE_WEIGHT: f64 = 1.015;
/// Penalty per syllable of average word length
const FLESCH_SYLLABLE_WEIGHT: f64 = 84.6;
/// Flesch points per quality point
const FLESCH_SCALE: f64 = 20.0;
/// Quality points per unit of type-token ratio
const TTR_SCALE: f64 = 10.0;

/// Stateless scorer, for call sites that want a value rather than a function
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityScorer;

impl QualityScorer {
    /// Score one response
    #[inline]
    #[must_use]
    pub fn score(&self, text: &str) -> QualityMetrics {
        score(text)
    }
}

/// Score a response on all four signals
#[must_use]
pub fn score(text: &str) -> QualityMetrics {
    let profile = TextProfile::new(text);

    QualityMetrics::from_components(
        readability_of(&profile),
        coherence_of(&profile),
        vocabulary_of(&profile),
    )
}

/// Rescaled Flesch reading ease in `[0, 5]`
#[must_use]
pub fn readability(text: &str) -> f64 {
    readability_of(&TextProfile::new(text))
}

/// Mean adjacent-sentence Jaccard similarity, scaled to `[0, 5]`
#[must_use]
pub fn coherence(text: &str) -> f64 {
    coherence_of(&TextProfile::new(text))
}

/// Rescaled type-token ratio in `[0, 5]`
#[must_use]
pub fn vocabulary(text: &str) -> f64 {
    vocabulary_of(&TextProfile::new(text))
}

/// Distinct words over total words, in `[0, 1]`; zero for wordless text
#[must_use]
pub fn type_token_ratio(text: &str) -> f64 {
    ttr(&TextProfile::new(text))
}

fn readability_of(profile: &TextProfile) -> f64 {
    let words = profile.words().len();
    let sentences = profile.sentences().len();
    if words == 0 || sentences == 0 {
        return 0.0;
    }

    let asl = words as f64 / sentences as f64;
    let asw = profile.syllables() as f64 / words as f64;
    let flesch = FLESCH_BASE - FLESCH_SENTENCE_WEIGHT * asl - FLESCH_SYLLABLE_WEIGHT * asw;

    clamp_score(flesch / FLESCH_SCALE)
}

fn coherence_of(profile: &TextProfile) -> f64 {
    let sentences = profile.sentences();
    if sentences.len() <= 1 {
        return 0.0;
    }

    let word_sets: Vec<HashSet<String>> = sentences
        .iter()
        .map(|s| words_of(s).into_iter().collect())
        .collect();

    let total: f64 = word_sets
        .windows(2)
        .map(|pair| jaccard(&pair[0], &pair[1]))
        .sum();

    clamp_score(total / (sentences.len() - 1) as f64 * MAX_SCORE)
}

fn vocabulary_of(profile: &TextProfile) -> f64 {
    clamp_score(ttr(profile) * TTR_SCALE)
}

fn ttr(profile: &TextProfile) -> f64 {
    let words = profile.words();
    if words.is_empty() {
        return 0.0;
    }
    let distinct: HashSet<&str> = words.iter().map(String::as_str).collect();
    distinct.len() as f64 / words.len() as f64
}

/// Intersection over union; zero when both sets are empty
fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[inline]
fn clamp_score(value: f64) -> f64 {
    value.clamp(0.0, MAX_SCORE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPS: f64 = 1e-9;

    fn in_range(v: f64) -> bool {
        (0.0..=MAX_SCORE).contains(&v)
    }

    #[test]
    fn empty_text_scores_zero() {
        let m = score("");
        assert!(m.is_zero(), "{m:?}");
    }

    #[test]
    fn code_only_text_scores_zero() {
        let m = score("```\nlet x = 1; let y = 2;\n```");
        assert!(m.is_zero(), "{m:?}");
    }

    #[test]
    fn short_repetitive_sentences() {
        let text = "The cat sat. The cat slept.";
        let m = score(text);

        // ASL = 3, ASW = 1 -> flesch 119.19 -> clamped to 5
        assert!((m.readability - 5.0).abs() < EPS);
        // {the, cat, sat} vs {the, cat, slept}: 2 / 4
        assert!((m.coherence - 2.5).abs() < EPS);
        // 4 distinct of 6 words; x10 saturates the scale
        assert!((type_token_ratio(text) - 4.0 / 6.0).abs() < EPS);
        assert!(type_token_ratio(text) < 1.0);
        assert!((m.vocabulary - 5.0).abs() < EPS);
        assert!((m.overall - 4.25).abs() < EPS);
    }

    #[test]
    fn single_sentence_has_no_coherence() {
        assert_eq!(coherence("Just one sentence here"), 0.0);
        assert!(readability("Just one sentence here") > 0.0);
    }

    #[test]
    fn disjoint_sentences_have_zero_coherence() {
        assert_eq!(coherence("Apples grow. Rivers flow."), 0.0);
    }

    #[test]
    fn punctuation_only_sentence_pairs_are_zero() {
        // "1" has a word; "_" has a word; sets are disjoint
        assert_eq!(coherence("1. _."), 0.0);
    }

    #[test]
    fn dense_polysyllabic_text_reads_poorly() {
        let text = "Institutionalization notwithstanding, interdisciplinary \
                    collaborations necessitate unprecedented organizational \
                    accountability considerations";
        assert_eq!(readability(text), 0.0);
    }

    #[test]
    fn vocabulary_scales_low_ratio() {
        // 2 distinct of 10 words -> ttr 0.2 -> 2.0
        let text = "go stop go stop go stop go stop go stop";
        assert!((vocabulary(text) - 2.0).abs() < EPS);
    }

    #[test]
    fn case_is_ignored_for_vocabulary() {
        assert!((type_token_ratio("Word word WORD") - 1.0 / 3.0).abs() < EPS);
    }

    #[test]
    fn scorer_value_matches_function() {
        let text = "Rust is fast. Rust is safe!";
        assert_eq!(QualityScorer.score(text), score(text));
    }

    proptest! {
        #[test]
        fn prop_metrics_in_range(text in ".{0,400}") {
            let m = score(&text);
            prop_assert!(in_range(m.readability));
            prop_assert!(in_range(m.coherence));
            prop_assert!(in_range(m.vocabulary));
            prop_assert!(in_range(m.overall));
        }

        #[test]
        fn prop_prose_metrics_in_range(
            words in proptest::collection::vec("[a-zA-Z]{1,12}", 0..60),
            breaks in proptest::collection::vec(prop_oneof![Just(" "), Just(". "), Just("! "), Just("? ")], 0..60),
        ) {
            let text: String = words
                .iter()
                .zip(breaks.iter().chain(std::iter::repeat(&" ")))
                .map(|(w, b)| format!("{w}{b}"))
                .collect();
            let m = score(&text);
            prop_assert!(in_range(m.readability));
            prop_assert!(in_range(m.coherence));
            prop_assert!(in_range(m.vocabulary));
            prop_assert!(in_range(m.overall));
        }

        #[test]
        fn prop_score_is_deterministic(text in ".{0,200}") {
            let a = score(&text);
            let b = score(&text);
            prop_assert_eq!(a.overall.to_bits(), b.overall.to_bits());
            prop_assert_eq!(a.readability.to_bits(), b.readability.to_bits());
            prop_assert_eq!(a.coherence.to_bits(), b.coherence.to_bits());
            prop_assert_eq!(a.vocabulary.to_bits(), b.vocabulary.to_bits());
        }
    }
}
