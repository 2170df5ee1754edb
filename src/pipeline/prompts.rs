use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

use crate::config::{AppConfig, PromptsSection};

pub const DEFAULT_PROMPTS_DIR: &str = "prompts";

pub const DEFAULT_TRANSLATE_FORWARD: &str = "translate_forward.txt";
pub const DEFAULT_TRANSLATE_BACKWARD: &str = "translate_backward.txt";
pub const DEFAULT_TRANSLATE_REPAIR: &str = "translate_repair.txt";
pub const DEFAULT_ANSWER: &str = "answer.json.txt";
pub const DEFAULT_JSON_REPAIR: &str = "json_repair.txt";

#[derive(Clone, Debug)]
pub struct PromptSet {
    pub translate_forward: String,
    pub translate_backward: String,
    pub translate_repair: String,
    pub answer: String,
    pub json_repair: String,
}

impl PromptSet {
    pub fn load(config_path: &Path, cfg: &AppConfig) -> anyhow::Result<Self> {
        let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        let p = cfg.prompts.clone();
        Ok(Self {
            translate_forward: read_prompt(
                config_dir,
                &p,
                "translate_forward",
                DEFAULT_TRANSLATE_FORWARD,
            )?,
            translate_backward: read_prompt(
                config_dir,
                &p,
                "translate_backward",
                DEFAULT_TRANSLATE_BACKWARD,
            )?,
            translate_repair: read_prompt(
                config_dir,
                &p,
                "translate_repair",
                DEFAULT_TRANSLATE_REPAIR,
            )?,
            answer: read_prompt(config_dir, &p, "answer", DEFAULT_ANSWER)?,
            json_repair: read_prompt(config_dir, &p, "json_repair", DEFAULT_JSON_REPAIR)?,
        })
    }

    /// Built-in templates; used when no config file exists at all.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            translate_forward: DEFAULT_TRANSLATE_FORWARD_TEXT.to_string(),
            translate_backward: DEFAULT_TRANSLATE_BACKWARD_TEXT.to_string(),
            translate_repair: DEFAULT_TRANSLATE_REPAIR_TEXT.to_string(),
            answer: DEFAULT_ANSWER_TEXT.to_string(),
            json_repair: DEFAULT_JSON_REPAIR_TEXT.to_string(),
        }
    }
}

fn read_prompt(
    config_dir: &Path,
    p: &PromptsSection,
    key: &str,
    default_filename: &str,
) -> anyhow::Result<String> {
    let rel = format!("{DEFAULT_PROMPTS_DIR}/{default_filename}");
    let path = match key {
        "translate_forward" => p.translate_forward.clone().unwrap_or(rel),
        "translate_backward" => p.translate_backward.clone().unwrap_or(rel),
        "translate_repair" => p.translate_repair.clone().unwrap_or(rel),
        "answer" => p.answer.clone().unwrap_or(rel),
        "json_repair" => p.json_repair.clone().unwrap_or(rel),
        other => return Err(anyhow!("unknown prompt key: {other}")),
    };

    let mut p = PathBuf::from(path);
    if p.is_relative() {
        p = config_dir.join(&p);
    }
    if !p.exists() {
        return Err(anyhow!(
            "prompt file not found for {key}: {} (run: roundtrip-qa --init-config)",
            p.display()
        ));
    }
    let text =
        std::fs::read_to_string(&p).with_context(|| format!("read prompt: {}", p.display()))?;
    Ok(text)
}

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}

pub fn default_prompt_files() -> Vec<(&'static str, &'static str)> {
    vec![
        (DEFAULT_TRANSLATE_FORWARD, DEFAULT_TRANSLATE_FORWARD_TEXT),
        (DEFAULT_TRANSLATE_BACKWARD, DEFAULT_TRANSLATE_BACKWARD_TEXT),
        (DEFAULT_TRANSLATE_REPAIR, DEFAULT_TRANSLATE_REPAIR_TEXT),
        (DEFAULT_ANSWER, DEFAULT_ANSWER_TEXT),
        (DEFAULT_JSON_REPAIR, DEFAULT_JSON_REPAIR_TEXT),
    ]
}

pub const DEFAULT_TRANSLATE_FORWARD_TEXT: &str = r#"Translate from {{source_lang}} to {{target_lang}}.

Rules:
- Do NOT omit content; do NOT summarize.
- Do NOT use ellipsis placeholders like … or ... to skip content.
- Preserve all digits (0-9) exactly.
- Output ONLY the translation. No labels, no commentary, no quotes.

TEXT:
{{text}}"#;

pub const DEFAULT_TRANSLATE_BACKWARD_TEXT: &str = r#"Translate from {{source_lang}} to {{target_lang}}.

Rules:
- Do NOT omit content; do NOT summarize.
- Do NOT use ellipsis placeholders like … or ... to skip content.
- Preserve all digits (0-9) exactly.
- Translate literally; do not paraphrase or improve the text.
- Output ONLY the translation. No labels, no commentary, no quotes.

TEXT:
{{text}}"#;

pub const DEFAULT_TRANSLATE_REPAIR_TEXT: &str = r#"Fix the translation to satisfy ALL constraints.
Return ONLY the fixed translation.

Constraints:
- Do NOT omit content; do NOT summarize.
- Do NOT add new information.
- Preserve all digits (0-9) exactly.
- Ensure the output is in {{target_lang}} (do not leave it in {{source_lang}}).

Validation error (previous output failed):
{{validation_error}}

Language: {{source_lang}} -> {{target_lang}}

SOURCE:
{{text}}

BAD_OUTPUT:
{{bad}}"#;

pub const DEFAULT_ANSWER_TEXT: &str = r#"Return STRICT JSON only (one JSON object).
Task: extractive question answering.
Copy the shortest span of CONTEXT that answers QUESTION into "answer", verbatim.
If CONTEXT does not contain the answer, set "answer" to "" and "confidence" to 0.0.
"confidence" is how sure you are the span answers the question, from 0.0 to 1.0.

Schema:
{"answer":"...","confidence":0.0}

QUESTION:
{{question}}

CONTEXT:
{{context}}"#;

pub const DEFAULT_JSON_REPAIR_TEXT: &str = r#"You are a JSON repair tool.
Return STRICT JSON only (one JSON object). No markdown. No extra text.
Do not add new facts.
If required keys are missing, add them with empty defaults.

BROKEN_OUTPUT:
{{raw}}"#;

#[cfg(test)]
mod tests {
    use super::render_template;

    #[test]
    fn render_replaces_all_placeholders() {
        let out = render_template(
            "{{a}} and {{b}} and {{a}}",
            &[("a", "x"), ("b", "y")],
        );
        assert_eq!(out, "x and y and x");
    }

    #[test]
    fn render_leaves_unknown_placeholders() {
        let out = render_template("{{known}} {{unknown}}", &[("known", "v")]);
        assert_eq!(out, "v {{unknown}}");
    }
}
