use anyhow::{anyhow, Context};
use serde::Deserialize;

use crate::ir::QaOutcome;
use crate::models::native::{ChatParams, NativeChatModel};
use crate::models::{AnswerModel, TranslateModel};
use crate::textutil::{cleanup_model_text, cyrillic_ratio, has_letters, latin_ratio};

use super::prompts::{render_template, PromptSet};
use super::trace::TraceWriter;

const SOURCE_LANG: &str = "English";
const TARGET_LANG: &str = "Russian";

#[derive(Clone, Copy, Debug)]
enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn tag(self) -> &'static str {
        match self {
            Direction::Forward => "fwd",
            Direction::Backward => "bwd",
        }
    }

    fn langs(self) -> (&'static str, &'static str) {
        match self {
            Direction::Forward => (SOURCE_LANG, TARGET_LANG),
            Direction::Backward => (TARGET_LANG, SOURCE_LANG),
        }
    }

    fn target_script(self) -> TargetScript {
        match self {
            Direction::Forward => TargetScript::Cyrillic,
            Direction::Backward => TargetScript::Latin,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum TargetScript {
    Cyrillic,
    Latin,
}

/// En<->ru translation over one local chat model, with output validation and
/// a single repair reprompt before giving up.
pub struct LocalTranslator {
    model: NativeChatModel,
    forward_tmpl: String,
    backward_tmpl: String,
    repair_tmpl: String,
    trace: TraceWriter,
    calls: usize,
}

impl LocalTranslator {
    #[must_use]
    pub fn new(model: NativeChatModel, prompts: &PromptSet, trace: TraceWriter) -> Self {
        Self {
            model,
            forward_tmpl: prompts.translate_forward.clone(),
            backward_tmpl: prompts.translate_backward.clone(),
            repair_tmpl: prompts.translate_repair.clone(),
            trace,
            calls: 0,
        }
    }

    fn translate(&mut self, text: &str, direction: Direction) -> anyhow::Result<String> {
        let (source_lang, target_lang) = direction.langs();
        let prompt = {
            let tmpl = match direction {
                Direction::Forward => &self.forward_tmpl,
                Direction::Backward => &self.backward_tmpl,
            };
            render_template(
                tmpl,
                &[
                    ("source_lang", source_lang),
                    ("target_lang", target_lang),
                    ("text", text),
                ],
            )
        };

        self.calls += 1;
        let tag = format!("translate.{}.{:04}", direction.tag(), self.calls);
        let _ = self.trace.write_named_text(&format!("{tag}.prompt.txt"), &prompt);

        let params = ChatParams {
            max_tokens: translation_budget(text),
            temperature: 0.12,
            json_mode: false,
        };
        let raw = self.model.chat(&prompt, params)?;
        let _ = self.trace.write_named_text(&format!("{tag}.output.txt"), &raw);
        let mut out = cleanup_model_text(&raw);

        if let Err(err) = validate_output(&out, direction.target_script()) {
            let reason = err.to_string();
            let repair_prompt = render_template(
                &self.repair_tmpl,
                &[
                    ("source_lang", source_lang),
                    ("target_lang", target_lang),
                    ("validation_error", &reason),
                    ("text", text),
                    ("bad", &out),
                ],
            );
            let _ = self
                .trace
                .write_named_text(&format!("{tag}.repair.prompt.txt"), &repair_prompt);
            let raw = self.model.chat(&repair_prompt, params)?;
            let _ = self
                .trace
                .write_named_text(&format!("{tag}.repair.output.txt"), &raw);
            out = cleanup_model_text(&raw);
            validate_output(&out, direction.target_script())
                .with_context(|| format!("translation unusable after repair ({})", direction.tag()))?;
        }

        Ok(out)
    }
}

impl TranslateModel for LocalTranslator {
    fn translate_forward(&mut self, text: &str) -> anyhow::Result<String> {
        self.translate(text, Direction::Forward)
    }

    fn translate_backward(&mut self, text: &str) -> anyhow::Result<String> {
        self.translate(text, Direction::Backward)
    }
}

/// Extractive QA over one local chat model in strict-JSON mode.
pub struct LocalAnswerer {
    model: NativeChatModel,
    answer_tmpl: String,
    json_repair_tmpl: String,
    trace: TraceWriter,
    calls: usize,
}

impl LocalAnswerer {
    #[must_use]
    pub fn new(model: NativeChatModel, prompts: &PromptSet, trace: TraceWriter) -> Self {
        Self {
            model,
            answer_tmpl: prompts.answer.clone(),
            json_repair_tmpl: prompts.json_repair.clone(),
            trace,
            calls: 0,
        }
    }
}

impl AnswerModel for LocalAnswerer {
    fn answer_question(&mut self, question: &str, context: &str) -> anyhow::Result<QaOutcome> {
        let prompt = render_template(
            &self.answer_tmpl,
            &[("question", question), ("context", context)],
        );
        self.calls += 1;
        let tag = format!("answer.{:04}", self.calls);
        let _ = self.trace.write_named_text(&format!("{tag}.prompt.txt"), &prompt);

        let params = ChatParams {
            max_tokens: 400,
            temperature: 0.1,
            json_mode: true,
        };
        let raw = self.model.chat(&prompt, params)?;
        let _ = self.trace.write_named_text(&format!("{tag}.output.raw.txt"), &raw);

        let value = parse_json_with_repair(&mut self.model, &self.json_repair_tmpl, &raw, 400)?;
        let parsed: RawQaResponse = serde_json::from_value(value).context("parse qa json")?;

        let answer = parsed.answer.trim().to_string();
        let answer_start = if answer.is_empty() {
            None
        } else {
            context.find(&answer)
        };
        Ok(QaOutcome {
            answer,
            confidence: parsed.confidence.clamp(0.0, 1.0),
            answer_start,
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
struct RawQaResponse {
    #[serde(default)]
    answer: String,
    // Some models emit "score" for the confidence field; accept both.
    #[serde(default, alias = "score")]
    confidence: f32,
}

fn translation_budget(text: &str) -> u32 {
    (text.chars().count() as u32).saturating_mul(2).clamp(256, 2400)
}

fn validate_output(text: &str, script: TargetScript) -> anyhow::Result<()> {
    if text.trim().is_empty() {
        return Err(anyhow!("empty_output"));
    }
    if !has_letters(text) {
        return Err(anyhow!("no_letters_in_output"));
    }
    let non_ws = text.chars().filter(|c| !c.is_whitespace()).count();
    if non_ws < 20 {
        // Too short to judge scripts reliably.
        return Ok(());
    }
    match script {
        TargetScript::Cyrillic => {
            if cyrillic_ratio(text) < 0.06 && latin_ratio(text) > 0.25 {
                return Err(anyhow!("target_script_missing_cyrillic"));
            }
        }
        TargetScript::Latin => {
            if latin_ratio(text) < 0.18 && cyrillic_ratio(text) > 0.20 {
                return Err(anyhow!("target_script_missing_latin"));
            }
        }
    }
    Ok(())
}

fn extract_json_obj(text: &str) -> anyhow::Result<serde_json::Value> {
    let start = text.find('{').context("no_json_object_start")?;
    let slice = &text[start..];
    let mut de = serde_json::Deserializer::from_str(slice);
    let v: serde_json::Value =
        serde_json::Value::deserialize(&mut de).context("json_parse_failed")?;
    Ok(v)
}

fn parse_json_with_repair(
    model: &mut NativeChatModel,
    repair_tmpl: &str,
    raw: &str,
    max_tokens: u32,
) -> anyhow::Result<serde_json::Value> {
    if let Ok(v) = extract_json_obj(raw) {
        return Ok(v);
    }

    let mut last = raw.to_string();
    for _ in 0..2 {
        let head: String = last.chars().take(8000).collect();
        let prompt = render_template(repair_tmpl, &[("raw", &head)]);
        let out = model.chat(
            &prompt,
            ChatParams {
                max_tokens,
                temperature: 0.1,
                json_mode: true,
            },
        )?;
        if let Ok(v) = extract_json_obj(&out) {
            return Ok(v);
        }
        last = out;
    }

    extract_json_obj(raw)
}

#[cfg(test)]
mod tests {
    use super::{extract_json_obj, translation_budget, validate_output, RawQaResponse, TargetScript};

    #[test]
    fn validate_accepts_russian_output_for_forward() {
        assert!(validate_output("Париж — столица Франции и крупнейший город страны.", TargetScript::Cyrillic).is_ok());
    }

    #[test]
    fn validate_rejects_untranslated_forward_output() {
        let err = validate_output(
            "Paris is the capital of France and its largest city.",
            TargetScript::Cyrillic,
        )
        .expect_err("latin text for a cyrillic target");
        assert!(err.to_string().contains("target_script_missing_cyrillic"));
    }

    #[test]
    fn validate_rejects_untranslated_backward_output() {
        let err = validate_output(
            "Париж — столица Франции и крупнейший город страны.",
            TargetScript::Latin,
        )
        .expect_err("cyrillic text for a latin target");
        assert!(err.to_string().contains("target_script_missing_latin"));
    }

    #[test]
    fn validate_rejects_blank_and_letterless_output() {
        assert!(validate_output("   ", TargetScript::Cyrillic).is_err());
        assert!(validate_output("4. 1 — 2 (3)", TargetScript::Cyrillic).is_err());
    }

    #[test]
    fn validate_skips_script_check_for_short_output() {
        // "Paris" alone is a legitimate span even in a Russian context.
        assert!(validate_output("Paris", TargetScript::Cyrillic).is_ok());
    }

    #[test]
    fn extract_json_skips_leading_prose() {
        let v = extract_json_obj("Sure, here you go: {\"answer\":\"Париж\",\"confidence\":0.9} done")
            .expect("extract json");
        assert_eq!(v["answer"], "Париж");
    }

    #[test]
    fn extract_json_fails_without_object() {
        assert!(extract_json_obj("no json here").is_err());
    }

    #[test]
    fn qa_response_accepts_score_alias() {
        let parsed: RawQaResponse =
            serde_json::from_str(r#"{"answer":"Париж","score":0.87}"#).expect("parse");
        assert!((parsed.confidence - 0.87).abs() < 1e-6);
        let parsed: RawQaResponse =
            serde_json::from_str(r#"{"answer":"Париж","confidence":0.6}"#).expect("parse");
        assert!((parsed.confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn budget_scales_with_text_but_stays_bounded() {
        assert_eq!(translation_budget("hi"), 256);
        assert_eq!(translation_budget(&"x".repeat(5000)), 2400);
    }
}
