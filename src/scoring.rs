use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("token regex"));

/// Fidelity metric between an original text and a reconstruction of it.
/// Implementations must return values in [0, 1], higher = more faithful.
pub trait SimilarityScorer {
    fn similarity(&self, original: &str, reconstruction: &str) -> f32;
}

/// Default scorer: token-overlap F1 between the two texts' token bags.
/// Deterministic, order-insensitive, cheap; good enough to rank round-trip
/// reconstructions of the same source against each other.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokenOverlapScorer;

impl SimilarityScorer for TokenOverlapScorer {
    fn similarity(&self, original: &str, reconstruction: &str) -> f32 {
        token_f1(original, reconstruction)
    }
}

/// Lowercased word/number tokens, punctuation dropped.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Count-aware token-overlap F1 (harmonic mean of precision and recall).
///
/// Follows the usual extractive-QA convention: if either side has no tokens,
/// the score is 1.0 when both are empty and 0.0 otherwise.
#[must_use]
pub fn token_f1(predicted: &str, reference: &str) -> f32 {
    let pred = tokenize(predicted);
    let gold = tokenize(reference);
    if pred.is_empty() || gold.is_empty() {
        return if pred.is_empty() && gold.is_empty() {
            1.0
        } else {
            0.0
        };
    }

    let gold_counts = token_counter(&gold);
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut common = 0usize;
    for tok in &pred {
        let used = seen.entry(tok.as_str()).or_insert(0);
        if *used < gold_counts.get(tok.as_str()).copied().unwrap_or(0) {
            common += 1;
        }
        *used += 1;
    }
    if common == 0 {
        return 0.0;
    }

    let precision = common as f32 / pred.len() as f32;
    let recall = common as f32 / gold.len() as f32;
    2.0 * precision * recall / (precision + recall)
}

fn token_counter(tokens: &[String]) -> HashMap<&str, usize> {
    let mut out: HashMap<&str, usize> = HashMap::new();
    for tok in tokens {
        *out.entry(tok.as_str()).or_insert(0) += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{token_f1, tokenize, SimilarityScorer, TokenOverlapScorer};

    #[test]
    fn tokenize_lowercases_and_drops_punctuation() {
        assert_eq!(tokenize("Paris, France!"), vec!["paris", "france"]);
        assert_eq!(tokenize("Раздел 4.1"), vec!["раздел", "4", "1"]);
        assert!(tokenize("—…").is_empty());
    }

    #[test]
    fn identical_texts_score_one() {
        assert_eq!(token_f1("the cat sat", "The cat sat."), 1.0);
    }

    #[test]
    fn disjoint_texts_score_zero() {
        assert_eq!(token_f1("alpha beta", "gamma delta"), 0.0);
    }

    #[test]
    fn partial_overlap_is_harmonic_mean() {
        // pred {paris, france}, gold {paris}: precision 1/2, recall 1 -> 2/3.
        let f1 = token_f1("paris, france", "Paris");
        assert!((f1 - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn four_of_five_overlap_scores_point_eight() {
        let f1 = token_f1("the cat sat on mat", "the cat sat on rug");
        assert!((f1 - 0.8).abs() < 1e-6);
    }

    #[test]
    fn counts_matter_for_repeated_tokens() {
        // pred has "the" twice but gold only once; the second copy is not common.
        let f1 = token_f1("the the cat", "the cat");
        let precision = 2.0 / 3.0;
        let recall = 1.0;
        let expected = 2.0 * precision * recall / (precision + recall);
        assert!((f1 - expected).abs() < 1e-6);
    }

    #[test]
    fn empty_sides_follow_qa_convention() {
        assert_eq!(token_f1("", ""), 1.0);
        assert_eq!(token_f1("", "paris"), 0.0);
        assert_eq!(token_f1("paris", ""), 0.0);
    }

    #[test]
    fn scorer_stays_in_unit_range() {
        let scorer = TokenOverlapScorer;
        let s = scorer.similarity(
            "The quick brown fox jumps over the lazy dog",
            "A quick brown fox leaped over a lazy dog",
        );
        assert!((0.0..=1.0).contains(&s));
        assert!(s > 0.5);
    }
}
