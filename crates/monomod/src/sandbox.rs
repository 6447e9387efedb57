//! Evaluation seam: turning fetched source into module exports.

use crate::module::{CanonicalKey, ModuleExports};
use serde_json::Value;
use thiserror::Error;

/// Evaluation failure.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct EvalError {
    message: String,
}

impl EvalError {
    /// Create an evaluation error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Evaluates fetched module source into exports.
///
/// Implementations run inside the resolver's load task. A failure is
/// surfaced to every caller waiting on that load and nothing is cached.
pub trait Evaluator: Send + Sync {
    /// Short backend name for logging.
    fn name(&self) -> &str;

    /// Evaluate `source` for the module identified by `key`.
    ///
    /// # Errors
    /// Returns an error if the source cannot be evaluated.
    fn evaluate(&self, key: &CanonicalKey, source: &str) -> Result<ModuleExports, EvalError>;
}

/// Evaluator treating module source as a JSON object of exports.
///
/// The smallest sandbox that exercises the full load pipeline; embedders
/// plug in an engine-backed implementation for real module code.
#[derive(Debug, Default, Clone)]
pub struct JsonEvaluator;

impl JsonEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Evaluator for JsonEvaluator {
    fn name(&self) -> &str {
        "json"
    }

    fn evaluate(&self, key: &CanonicalKey, source: &str) -> Result<ModuleExports, EvalError> {
        let value: Value = serde_json::from_str(source)
            .map_err(|e| EvalError::new(format!("invalid module source for '{key}': {e}")))?;

        match value {
            Value::Object(bindings) => Ok(bindings.into_iter().collect()),
            other => Err(EvalError::new(format!(
                "module source for '{key}' must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CanonicalKey {
        CanonicalKey::new("pkg", "1.0.0", None)
    }

    #[test]
    fn test_evaluate_object() {
        let evaluator = JsonEvaluator::new();
        let exports = evaluator
            .evaluate(&key(), r#"{"default": "pkg", "helper": 42}"#)
            .unwrap();

        assert_eq!(exports.len(), 2);
        assert_eq!(exports.get("helper"), Some(&serde_json::json!(42)));
    }

    #[test]
    fn test_evaluate_rejects_non_object() {
        let evaluator = JsonEvaluator::new();
        let err = evaluator.evaluate(&key(), "[1, 2, 3]").unwrap_err();
        assert!(err.message().contains("must be a JSON object"));
        assert!(err.message().contains("array"));
    }

    #[test]
    fn test_evaluate_rejects_invalid_source() {
        let evaluator = JsonEvaluator::new();
        let err = evaluator.evaluate(&key(), "export default {}").unwrap_err();
        assert!(err.message().contains("invalid module source"));
        assert!(err.message().contains("pkg@1.0.0"));
    }

    #[test]
    fn test_backend_name() {
        assert_eq!(JsonEvaluator::new().name(), "json");
    }
}
