use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One unit of work: an English passage plus a question about its content.
///
/// `reference_answer` is optional; when present the verifier switches from the
/// confidence heuristic to token-overlap F1 against it.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Request {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub reference_answer: Option<String>,
}

impl Request {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.text.trim().is_empty() {
            return Err(anyhow!("missing_required_field:text"));
        }
        if self.question.trim().is_empty() {
            return Err(anyhow!("missing_required_field:question"));
        }
        Ok(())
    }

    /// Short stable digest of (text, question), used to correlate trace files
    /// with result records.
    #[must_use]
    pub fn request_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.question.as_bytes());
        hex::encode(hasher.finalize())[..12].to_string()
    }
}

/// One iteration of the improvement loop. Immutable once appended to the
/// history; the history's insertion order is the iteration order.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TranslationAttempt {
    pub iteration: usize,
    pub russian_translation: String,
    pub back_translation: String,
    pub similarity_score: f32,
}

/// Raw output of the QA collaborator: an extracted span (possibly empty) and
/// the model's confidence in it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QaOutcome {
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_start: Option<usize>,
}

/// Which verdict policy produced the surfaced quality number. Serialized with
/// an explicit discriminator so consumers never have to guess whether the
/// value is a model confidence or a computed F1.
#[derive(Clone, Copy, Debug, Serialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum QualityMetric {
    Confidence(f32),
    AnswerF1(f32),
}

/// The aggregate output record, exactly one per `process` call.
///
/// On the success path every field is populated. On failure, `error` is set
/// and whatever fields were computed before the failure are preserved.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct RequestResult {
    pub request_id: String,
    pub original_en: String,
    pub question: String,
    pub initial_ru: Option<String>,
    pub improved_ru: Option<String>,
    pub qa_answer: Option<String>,
    pub is_correct: bool,
    pub metric: Option<QualityMetric>,
    pub error: Option<String>,
}

impl RequestResult {
    #[must_use]
    pub fn new(request: &Request) -> Self {
        Self {
            request_id: request.request_id(),
            original_en: request.text.clone(),
            question: request.question.clone(),
            initial_ru: None,
            improved_ru: None,
            qa_answer: None,
            is_correct: false,
            metric: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{QualityMetric, Request, RequestResult};

    fn request(text: &str, question: &str) -> Request {
        Request {
            text: text.to_string(),
            question: question.to_string(),
            reference_answer: None,
        }
    }

    #[test]
    fn validate_rejects_blank_fields() {
        assert!(request("", "Where?").validate().is_err());
        assert!(request("   ", "Where?").validate().is_err());
        assert!(request("Some text.", "").validate().is_err());
        assert!(request("Some text.", "Where?").validate().is_ok());
    }

    #[test]
    fn request_id_is_stable_and_input_sensitive() {
        let a = request("Paris is the capital of France.", "What is the capital?");
        let b = request("Paris is the capital of France.", "What is the capital?");
        let c = request("Paris is the capital of France.", "Which city?");
        assert_eq!(a.request_id(), b.request_id());
        assert_ne!(a.request_id(), c.request_id());
        assert_eq!(a.request_id().len(), 12);
    }

    #[test]
    fn result_json_field_names_are_stable() {
        let mut result = RequestResult::new(&request("text", "question"));
        result.initial_ru = Some("первый".to_string());
        result.improved_ru = Some("лучший".to_string());
        result.qa_answer = Some("ответ".to_string());
        result.is_correct = true;
        result.metric = Some(QualityMetric::Confidence(0.9));

        let json = serde_json::to_value(&result).expect("serialize result");
        for key in [
            "request_id",
            "original_en",
            "question",
            "initial_ru",
            "improved_ru",
            "qa_answer",
            "is_correct",
            "metric",
            "error",
        ] {
            assert!(json.get(key).is_some(), "missing field: {key}");
        }
        assert_eq!(json["metric"]["kind"], "confidence");
        assert_eq!(json["error"], serde_json::Value::Null);
    }

    #[test]
    fn metric_discriminator_distinguishes_paths() {
        let confidence = serde_json::to_value(QualityMetric::Confidence(0.5)).expect("json");
        let f1 = serde_json::to_value(QualityMetric::AnswerF1(0.8)).expect("json");
        assert_eq!(confidence["kind"], "confidence");
        assert_eq!(f1["kind"], "answer_f1");
    }
}
