use anyhow::{anyhow, Context};

use crate::ir::TranslationAttempt;
use crate::models::TranslateModel;
use crate::scoring::SimilarityScorer;

#[derive(Clone, Copy, Debug)]
pub struct RefineOptions {
    pub max_iterations: usize,
    pub similarity_threshold: f32,
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            similarity_threshold: 0.85,
        }
    }
}

/// Outcome of the improvement loop. A collaborator failure stops the loop but
/// does not discard the attempts already made; both travel back together so
/// the caller can still select a candidate from the partial history.
pub struct RefineOutcome {
    pub attempts: Vec<TranslationAttempt>,
    pub failure: Option<anyhow::Error>,
}

/// Iteratively translate, back-translate and score until the round-trip
/// similarity reaches the threshold or the iteration budget runs out.
///
/// The threshold is a "good enough" stopping rule, not a best-score search:
/// the last appended attempt is not necessarily the best one. Picking the
/// winner is `best_attempt`'s job, so a noisy late iteration cannot override
/// an earlier high-quality one.
pub fn refine_translation(
    model: &mut dyn TranslateModel,
    scorer: &dyn SimilarityScorer,
    source: &str,
    opts: &RefineOptions,
) -> RefineOutcome {
    let mut attempts: Vec<TranslationAttempt> = Vec::new();
    let max_iterations = opts.max_iterations.max(1);

    for iteration in 1..=max_iterations {
        let forward = match model
            .translate_forward(source)
            .with_context(|| format!("forward translation (iteration {iteration})"))
        {
            Ok(t) => t,
            Err(err) => return RefineOutcome { attempts, failure: Some(err) },
        };
        if forward.trim().is_empty() {
            return RefineOutcome {
                attempts,
                failure: Some(anyhow!("empty_forward_translation (iteration {iteration})")),
            };
        }

        let back = match model
            .translate_backward(&forward)
            .with_context(|| format!("back translation (iteration {iteration})"))
        {
            Ok(t) => t,
            Err(err) => return RefineOutcome { attempts, failure: Some(err) },
        };
        if back.trim().is_empty() {
            return RefineOutcome {
                attempts,
                failure: Some(anyhow!("empty_back_translation (iteration {iteration})")),
            };
        }

        let score = scorer.similarity(source, &back).clamp(0.0, 1.0);
        attempts.push(TranslationAttempt {
            iteration,
            russian_translation: forward,
            back_translation: back,
            similarity_score: score,
        });

        if score >= opts.similarity_threshold {
            break;
        }
    }

    RefineOutcome {
        attempts,
        failure: None,
    }
}

/// Deterministic max-scan over insertion order; strict `>` means the earliest
/// maximum wins on ties.
pub fn best_attempt(attempts: &[TranslationAttempt]) -> anyhow::Result<&TranslationAttempt> {
    let mut best: Option<&TranslationAttempt> = None;
    for attempt in attempts {
        match best {
            Some(b) if attempt.similarity_score > b.similarity_score => best = Some(attempt),
            None => best = Some(attempt),
            _ => {}
        }
    }
    best.ok_or_else(|| anyhow!("empty_history"))
}
