//! Path expression parsing and evaluation.
//!
//! The engine never interprets expression syntax during a fold; stratifier
//! and population expressions are resolved once per measure into
//! [`CompiledExpression`]s and reused for every record. The evaluation
//! contract is deliberately small: given a raw resource and a compiled
//! expression, return zero or more extracted JSON values. All cardinality
//! and type classification happens in the callers.
//!
//! The built-in [`PathEngine`] covers the navigation subset of FHIRPath the
//! engine needs end to end: a resource-type head segment followed by field
//! navigation with implicit collection flattening (`Condition.code.coding`).

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("empty path expression")]
    Empty,

    #[error("invalid path segment '{0}'")]
    InvalidSegment(String),
}

/// A path expression resolved once and reused per record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledExpression {
    /// The resource type the expression applies to.
    resource_type: String,
    /// Field names navigated from the resource root.
    segments: Vec<String>,
}

impl CompiledExpression {
    pub fn source(&self) -> String {
        let mut text = self.resource_type.clone();
        for segment in &self.segments {
            text.push('.');
            text.push_str(segment);
        }
        text
    }
}

/// Resolves and evaluates path expressions against raw resources.
#[derive(Debug, Default)]
pub struct PathEngine;

impl PathEngine {
    pub fn new() -> PathEngine {
        PathEngine
    }

    /// Resolve `text` into a [`CompiledExpression`].
    ///
    /// The first segment names the resource type the expression applies to;
    /// the remaining segments navigate fields.
    pub fn parse(&self, text: &str) -> Result<CompiledExpression, ExpressionError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ExpressionError::Empty);
        }

        let mut segments = trimmed.split('.').map(str::trim);
        let resource_type = segments
            .next()
            .filter(|s| is_identifier(s))
            .ok_or_else(|| ExpressionError::InvalidSegment(trimmed.to_owned()))?
            .to_owned();

        let rest = segments
            .map(|s| {
                if is_identifier(s) {
                    Ok(s.to_owned())
                } else {
                    Err(ExpressionError::InvalidSegment(s.to_owned()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CompiledExpression {
            resource_type,
            segments: rest,
        })
    }

    /// Evaluate `expression` against `resource`, returning all matching
    /// values in document order.
    ///
    /// A resource whose `resourceType` does not match the expression head
    /// yields no values. Arrays encountered along the path are flattened.
    pub fn evaluate(&self, resource: &Value, expression: &CompiledExpression) -> Vec<Value> {
        let resource_type = resource
            .get("resourceType")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if resource_type != expression.resource_type {
            return Vec::new();
        }

        let mut current = vec![resource];
        for segment in &expression.segments {
            let mut next = Vec::new();
            for value in current {
                match value.get(segment) {
                    Some(Value::Array(items)) => next.extend(items.iter()),
                    Some(item) => next.push(item),
                    None => {}
                }
            }
            current = next;
        }

        current.into_iter().cloned().collect()
    }
}

fn is_identifier(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> PathEngine {
        PathEngine::new()
    }

    #[test]
    fn test_parse_head_only() {
        let expr = engine().parse("Condition").unwrap();
        assert_eq!(expr.source(), "Condition");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(matches!(engine().parse("  "), Err(ExpressionError::Empty)));
    }

    #[test]
    fn test_parse_rejects_invalid_segment() {
        let err = engine().parse("Condition.code.where(x)").unwrap_err();
        assert!(matches!(err, ExpressionError::InvalidSegment(_)));
    }

    #[test]
    fn test_evaluate_head_returns_resource() {
        let resource = json!({"resourceType": "Condition", "id": "c1"});
        let expr = engine().parse("Condition").unwrap();

        let found = engine().evaluate(&resource, &expr);
        assert_eq!(found, vec![resource]);
    }

    #[test]
    fn test_evaluate_type_mismatch_is_empty() {
        let resource = json!({"resourceType": "Patient", "id": "p1"});
        let expr = engine().parse("Condition").unwrap();

        assert!(engine().evaluate(&resource, &expr).is_empty());
    }

    #[test]
    fn test_evaluate_navigates_and_flattens_arrays() {
        let resource = json!({
            "resourceType": "Condition",
            "code": {"coding": [
                {"system": "http://snomed.info/sct", "code": "13645005"},
                {"system": "http://hl7.org/fhir/sid/icd-10", "code": "J44"}
            ]}
        });
        let expr = engine().parse("Condition.code.coding.code").unwrap();

        let found = engine().evaluate(&resource, &expr);
        assert_eq!(found, vec![json!("13645005"), json!("J44")]);
    }

    #[test]
    fn test_evaluate_missing_field_is_empty() {
        let resource = json!({"resourceType": "Condition", "id": "c1"});
        let expr = engine().parse("Condition.onsetDateTime").unwrap();

        assert!(engine().evaluate(&resource, &expr).is_empty());
    }
}
