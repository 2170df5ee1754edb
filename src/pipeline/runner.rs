use crate::ir::{Request, RequestResult};
use crate::models::native::NativeChatModel;
use crate::models::{AnswerModel, TranslateModel};
use crate::progress::ConsoleProgress;
use crate::scoring::{SimilarityScorer, TokenOverlapScorer};

use super::backends::{LocalAnswerer, LocalTranslator};
use super::config::PipelineConfig;
use super::refine::{best_attempt, refine_translation, RefineOptions};
use super::trace::TraceWriter;
use super::verify::{verify_answer, VerifyPolicy};

/// The pipeline wired to local GGUF backends.
pub type LocalPipeline = TranslationQaPipeline<LocalTranslator, LocalAnswerer, TokenOverlapScorer>;

/// Sequences initial translation -> refinement -> selection -> verification
/// into one `RequestResult` per request. Collaborators are injected at
/// construction; the pipeline itself keeps no state across `process` calls.
pub struct TranslationQaPipeline<M, Q, S> {
    refine: RefineOptions,
    policy: VerifyPolicy,
    progress: ConsoleProgress,
    trace: TraceWriter,
    translator: M,
    answerer: Q,
    scorer: S,
}

impl LocalPipeline {
    pub fn load(cfg: &PipelineConfig, progress: ConsoleProgress) -> anyhow::Result<Self> {
        progress.info(format!("Translate model: {}", cfg.translate_backend.name));
        let translate_model =
            NativeChatModel::load(&cfg.translate_backend, cfg.threads, cfg.gpu_layers)?;
        progress.info(format!("QA model: {}", cfg.qa_backend.name));
        let qa_model = NativeChatModel::load(&cfg.qa_backend, cfg.threads, cfg.gpu_layers)?;

        let open_trace = || {
            TraceWriter::new(cfg.trace_dir.clone(), cfg.trace_prompts)
                .unwrap_or_else(|_| TraceWriter::disabled())
        };
        let translator = LocalTranslator::new(translate_model, &cfg.prompts, open_trace());
        let answerer = LocalAnswerer::new(qa_model, &cfg.prompts, open_trace());

        Ok(Self::new(
            cfg.refine_options(),
            cfg.verify_policy(),
            progress,
            open_trace(),
            translator,
            answerer,
            TokenOverlapScorer,
        ))
    }
}

impl<M, Q, S> TranslationQaPipeline<M, Q, S>
where
    M: TranslateModel,
    Q: AnswerModel,
    S: SimilarityScorer,
{
    #[must_use]
    pub fn new(
        refine: RefineOptions,
        policy: VerifyPolicy,
        progress: ConsoleProgress,
        trace: TraceWriter,
        translator: M,
        answerer: Q,
        scorer: S,
    ) -> Self {
        Self {
            refine,
            policy,
            progress,
            trace,
            translator,
            answerer,
            scorer,
        }
    }

    /// Run the full pipeline for one request. Never returns an error: every
    /// failure is captured into the result's `error` field, and fields
    /// computed before the failure stay populated.
    pub fn process(&mut self, request: &Request) -> RequestResult {
        let mut result = RequestResult::new(request);
        let rid = result.request_id.clone();

        self.progress.info(format!("[{rid}] initial translation"));
        let initial = match self.translator.translate_forward(&request.text) {
            Ok(t) => t,
            Err(err) => {
                result.error = Some(format!("initial translation failed: {err:#}"));
                return result;
            }
        };
        result.initial_ru = Some(initial.clone());

        self.progress.info(format!(
            "[{rid}] refine: up to {} iterations, stop at similarity {:.2}",
            self.refine.max_iterations, self.refine.similarity_threshold
        ));
        let outcome =
            refine_translation(&mut self.translator, &self.scorer, &request.text, &self.refine);
        for attempt in &outcome.attempts {
            self.progress.step(
                &format!("[{rid}] refine"),
                attempt.iteration,
                self.refine.max_iterations.max(1),
            );
            let _ = self.trace.write_request_text(
                &rid,
                &format!("refine{}", attempt.iteration),
                "attempt",
                &format!(
                    "similarity={:.4}\nru:\n{}\nen_roundtrip:\n{}",
                    attempt.similarity_score, attempt.russian_translation, attempt.back_translation
                ),
            );
        }

        let improved = match best_attempt(&outcome.attempts) {
            Ok(best) => {
                self.progress.info(format!(
                    "[{rid}] best attempt {} (similarity {:.3})",
                    best.iteration, best.similarity_score
                ));
                best.russian_translation.clone()
            }
            Err(_) => {
                self.progress
                    .warn(format!("[{rid}] no refinement attempts; keeping initial translation"));
                initial.clone()
            }
        };
        result.improved_ru = Some(improved.clone());

        if let Some(err) = outcome.failure {
            result.error = Some(format!("refinement failed: {err:#}"));
            return result;
        }

        self.progress.info(format!("[{rid}] question answering"));
        match verify_answer(
            &mut self.answerer,
            &self.policy,
            &request.question,
            &improved,
            request.reference_answer.as_deref(),
        ) {
            Ok(v) => {
                let _ = self.trace.write_request_text(
                    &rid,
                    "verify",
                    "outcome",
                    &format!(
                        "answer:\n{}\nconfidence={:.4} correct={} metric={:?}",
                        v.outcome.answer, v.outcome.confidence, v.is_correct, v.metric
                    ),
                );
                result.qa_answer = Some(v.outcome.answer);
                result.is_correct = v.is_correct;
                result.metric = Some(v.metric);
            }
            Err(err) => {
                result.error = Some(format!("question answering failed: {err:#}"));
            }
        }

        result
    }
}
