//! Text segmentation for scoring
//!
//! Fenced code blocks are removed before any segmentation. Words are runs of
//! ASCII word characters (`[A-Za-z0-9_]`); sentences are the non-blank pieces
//! between runs of `.`, `!` and `?`.

use once_cell::sync::Lazy;
use regex::Regex;

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```[\s\S]*?```").expect("code fence pattern is valid"));

static SENTENCE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+").expect("sentence break pattern is valid"));

static WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9_]+").expect("word pattern is valid"));

static VOWEL_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[aeiouy]+").expect("vowel group pattern is valid"));

/// Segmented view of a response, computed once and shared by every metric
#[derive(Debug, Clone)]
pub struct TextProfile {
    /// Non-blank sentences of the prose
    sentences: Vec<String>,
    /// Lowercased word tokens, in order
    words: Vec<String>,
    /// Syllable estimate over the alphabetic tokens
    syllables: usize,
}

impl TextProfile {
    /// Segment `text` for scoring
    #[must_use]
    pub fn new(text: &str) -> Self {
        let prose = strip_code_fences(text);

        let sentences = SENTENCE_BREAK
            .split(&prose)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_owned)
            .collect();

        Self {
            sentences,
            words: words_of(&prose),
            syllables: count_syllables(&prose),
        }
    }

    /// Sentences in reading order
    #[inline]
    #[must_use]
    pub fn sentences(&self) -> &[String] {
        &self.sentences
    }

    /// Lowercased words in reading order
    #[inline]
    #[must_use]
    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Estimated syllable total
    #[inline]
    #[must_use]
    pub fn syllables(&self) -> usize {
        self.syllables
    }
}

/// Remove fenced (```) code blocks
pub(crate) fn strip_code_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text, "").into_owned()
}

/// Lowercased word tokens of `text`
pub(crate) fn words_of(text: &str) -> Vec<String> {
    WORD.find_iter(text)
        .map(|m| m.as_str().to_ascii_lowercase())
        .collect()
}

/// Estimate the syllables in `text`
///
/// Every maximal run of ASCII letters is a word. A word counts one syllable per
/// vowel group, minus one for a trailing silent `e` (but not `le`), and never
/// fewer than one.
#[must_use]
pub fn count_syllables(text: &str) -> usize {
    let lowered = text.to_ascii_lowercase();

    lowered
        .split(|c: char| !c.is_ascii_lowercase())
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut count = VOWEL_GROUP.find_iter(word).count();
            if word.ends_with('e') && !word.ends_with("le") {
                count = count.saturating_sub(1);
            }
            count.max(1)
        })
        .sum()
}
