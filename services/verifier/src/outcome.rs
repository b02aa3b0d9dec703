use crate::error::PredictionError;
use serde::Serialize;
use serde_json::{Number, Value};
use tracing::warn;

/// Result reported by the external classifier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationOutcome {
    /// Label chosen by the classifier
    pub prediction: String,
    /// Confidence, expected in 0..=100, kept exactly as the classifier wrote it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Number>,
}

impl ClassificationOutcome {
    /// Confidence as a float, if present
    pub fn confidence_value(&self) -> Option<f64> {
        self.confidence.as_ref().and_then(Number::as_f64)
    }
}

/// Decode one classifier output record
///
/// The record is a JSON object with a non-empty string `prediction` and an
/// optional numeric `confidence`. Other fields are ignored.
pub fn parse(raw: &str) -> Result<ClassificationOutcome, PredictionError> {
    let malformed = |reason: &str| PredictionError::MalformedResult {
        reason: reason.to_string(),
        raw: raw.to_string(),
    };

    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|e| malformed(&format!("not valid JSON: {e}")))?;
    let Value::Object(record) = value else {
        return Err(malformed("record is not a JSON object"));
    };

    let prediction = match record.get("prediction") {
        Some(Value::String(label)) if !label.trim().is_empty() => label.clone(),
        Some(Value::String(_)) => return Err(malformed("prediction is empty")),
        Some(_) => return Err(malformed("prediction is not a string")),
        None => return Err(malformed("prediction is missing")),
    };

    let confidence = match record.get("confidence") {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Some(n.clone()),
        Some(_) => return Err(malformed("confidence is not a number")),
    };

    if let Some(c) = confidence.as_ref().and_then(Number::as_f64) {
        if !(0.0..=100.0).contains(&c) {
            warn!(confidence = c, "Classifier confidence outside 0-100");
        }
    }

    Ok(ClassificationOutcome {
        prediction,
        confidence,
    })
}
