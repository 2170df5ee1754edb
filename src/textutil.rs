use once_cell::sync::Lazy;
use regex::Regex;

static CYRILLIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[Ѐ-ӿ]").expect("cyrillic"));
static LATIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]").expect("latin"));
static LETTER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{L}").expect("letter"));

/// Strip markdown fences, surrounding quotes and labels a chat model tends to
/// wrap its answer in, leaving the bare text.
#[must_use]
pub fn cleanup_model_text(text: &str) -> String {
    let mut s = text.trim().to_string();
    if s.starts_with("```") {
        if let Some(i) = s.find('\n') {
            s = s[i + 1..].to_string();
        }
        if let Some(end) = s.rfind("```") {
            s = s[..end].to_string();
        }
    }
    s.trim().trim_matches('"').trim().to_string()
}

#[must_use]
pub fn has_letters(text: &str) -> bool {
    LETTER_RE.is_match(text)
}

/// Fraction of non-whitespace characters in the Cyrillic block.
#[must_use]
pub fn cyrillic_ratio(text: &str) -> f32 {
    script_ratio(text, &CYRILLIC_RE)
}

/// Fraction of non-whitespace characters that are basic Latin letters.
#[must_use]
pub fn latin_ratio(text: &str) -> f32 {
    script_ratio(text, &LATIN_RE)
}

fn script_ratio(text: &str, re: &Regex) -> f32 {
    let total = text.chars().filter(|c| !c.is_whitespace()).count();
    if total == 0 {
        return 0.0;
    }
    re.find_iter(text).count() as f32 / total as f32
}

#[cfg(test)]
mod tests {
    use super::{cleanup_model_text, cyrillic_ratio, has_letters, latin_ratio};

    #[test]
    fn cleanup_strips_fences_and_quotes() {
        assert_eq!(cleanup_model_text("```text\nПривет\n```"), "Привет");
        assert_eq!(cleanup_model_text("\"Привет\""), "Привет");
        assert_eq!(cleanup_model_text("  Привет  "), "Привет");
    }

    #[test]
    fn script_ratios_distinguish_languages() {
        assert!(cyrillic_ratio("Париж — столица Франции.") > 0.8);
        assert!(cyrillic_ratio("Paris is the capital of France.") < 0.05);
        assert!(latin_ratio("Paris is the capital of France.") > 0.8);
        assert_eq!(cyrillic_ratio("   "), 0.0);
    }

    #[test]
    fn has_letters_ignores_digits_and_punctuation() {
        assert!(has_letters("раздел 4"));
        assert!(!has_letters("4.1 (b) —"));
    }
}
