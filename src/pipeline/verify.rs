use anyhow::Context;

use crate::ir::{QaOutcome, QualityMetric};
use crate::models::AnswerModel;
use crate::scoring::token_f1;

#[derive(Clone, Copy, Debug)]
pub struct VerifyPolicy {
    /// Minimum model confidence for a verdict when no reference answer exists.
    pub confidence_threshold: f32,
    /// Minimum token-overlap F1 against a supplied reference answer.
    pub answer_f1_threshold: f32,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            answer_f1_threshold: 0.8,
        }
    }
}

pub struct Verification {
    pub outcome: QaOutcome,
    pub is_correct: bool,
    pub metric: QualityMetric,
}

/// Ask the QA collaborator and turn its raw (answer, confidence) pair into a
/// verdict.
///
/// Without a reference answer the verdict is a heuristic proxy for "the
/// answer is actually present in the context": non-blank span AND confidence
/// at or above the threshold. It is not a semantic correctness check.
///
/// With a reference answer the verdict is token-overlap F1 against it,
/// boundary inclusive; that path supersedes the heuristic. The metric carries
/// its own discriminator so the two numbers are never conflated.
pub fn verify_answer(
    model: &mut dyn AnswerModel,
    policy: &VerifyPolicy,
    question: &str,
    context: &str,
    reference_answer: Option<&str>,
) -> anyhow::Result<Verification> {
    let raw = model
        .answer_question(question, context)
        .context("answer question")?;
    let outcome = QaOutcome {
        confidence: raw.confidence.clamp(0.0, 1.0),
        ..raw
    };

    let (is_correct, metric) = match reference_answer {
        Some(reference) => {
            let f1 = token_f1(&outcome.answer, reference);
            (f1 >= policy.answer_f1_threshold, QualityMetric::AnswerF1(f1))
        }
        None => {
            let found = !outcome.answer.trim().is_empty()
                && outcome.confidence >= policy.confidence_threshold;
            (found, QualityMetric::Confidence(outcome.confidence))
        }
    };

    Ok(Verification {
        outcome,
        is_correct,
        metric,
    })
}

#[cfg(test)]
mod tests {
    use super::{verify_answer, VerifyPolicy};
    use crate::ir::{QaOutcome, QualityMetric};
    use crate::models::AnswerModel;

    struct FixedAnswerer {
        answer: String,
        confidence: f32,
    }

    impl FixedAnswerer {
        fn new(answer: &str, confidence: f32) -> Self {
            Self {
                answer: answer.to_string(),
                confidence,
            }
        }
    }

    impl AnswerModel for FixedAnswerer {
        fn answer_question(&mut self, _question: &str, _context: &str) -> anyhow::Result<QaOutcome> {
            Ok(QaOutcome {
                answer: self.answer.clone(),
                confidence: self.confidence,
                answer_start: None,
            })
        }
    }

    fn verify(answer: &str, confidence: f32, reference: Option<&str>) -> super::Verification {
        let mut model = FixedAnswerer::new(answer, confidence);
        verify_answer(
            &mut model,
            &VerifyPolicy::default(),
            "What is the capital?",
            "Париж — столица Франции.",
            reference,
        )
        .expect("verify")
    }

    #[test]
    fn empty_answer_fails_even_with_high_confidence() {
        let v = verify("", 0.9, None);
        assert!(!v.is_correct);
        assert_eq!(v.metric, QualityMetric::Confidence(0.9));
    }

    #[test]
    fn confident_answer_passes() {
        let v = verify("Paris", 0.6, None);
        assert!(v.is_correct);
        assert_eq!(v.metric, QualityMetric::Confidence(0.6));
    }

    #[test]
    fn low_confidence_answer_fails() {
        let v = verify("Paris", 0.4, None);
        assert!(!v.is_correct);
    }

    #[test]
    fn confidence_boundary_is_inclusive() {
        assert!(verify("Paris", 0.5, None).is_correct);
    }

    #[test]
    fn confidence_is_clamped_to_unit_range() {
        let v = verify("Paris", 1.7, None);
        assert!(v.is_correct);
        assert_eq!(v.metric, QualityMetric::Confidence(1.0));
    }

    #[test]
    fn reference_path_supersedes_confidence() {
        // High confidence but low overlap with the reference: verdict false.
        let v = verify("paris, france", 0.99, Some("Paris"));
        assert!(!v.is_correct);
        match v.metric {
            QualityMetric::AnswerF1(f1) => assert!((f1 - 2.0 / 3.0).abs() < 1e-6),
            other => panic!("expected answer_f1 metric, got {other:?}"),
        }
    }

    #[test]
    fn f1_boundary_is_inclusive() {
        // 4-of-5 token overlap yields exactly 0.8, which must pass.
        let v = verify("the cat sat on mat", 0.1, Some("the cat sat on rug"));
        assert!(v.is_correct);
        match v.metric {
            QualityMetric::AnswerF1(f1) => assert!((f1 - 0.8).abs() < 1e-6),
            other => panic!("expected answer_f1 metric, got {other:?}"),
        }
        // And a score just below the threshold must fail.
        assert!(0.79_f32 < VerifyPolicy::default().answer_f1_threshold);
        let below = verify("the cat sat", 0.99, Some("the cat sat on rug"));
        assert!(!below.is_correct);
    }

    #[test]
    fn exact_reference_match_passes() {
        let v = verify("Paris", 0.0, Some("paris"));
        assert!(v.is_correct);
        assert_eq!(v.metric, QualityMetric::AnswerF1(1.0));
    }
}
