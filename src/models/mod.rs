pub mod native;

use crate::ir::QaOutcome;

/// Stateless-by-contract translation capability for the en<->ru pair.
/// Concrete adapters own whatever mutable inference state they need, hence
/// `&mut self`.
pub trait TranslateModel {
    fn translate_forward(&mut self, text: &str) -> anyhow::Result<String>;
    fn translate_backward(&mut self, text: &str) -> anyhow::Result<String>;
}

/// Extractive question answering: pick a span from `context` that answers
/// `question`, with a confidence in [0, 1]. An empty answer means the model
/// found nothing.
pub trait AnswerModel {
    fn answer_question(&mut self, question: &str, context: &str) -> anyhow::Result<QaOutcome>;
}
