//! Stratifier evaluation: component expressions, stratum keys and
//! per-stratifier results.
//!
//! A stratifier splits a group's population into strata by one or more
//! extracted values. Each component of a stratifier pairs a definition
//! coding with a path expression; evaluating all components against one
//! record yields the record's stratum key. Extraction failures become
//! reserved failure codings instead of errors, so every record lands in a
//! stratum and failure modes stay visible and countable in the report.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::coding::CodingKey;
use crate::error::{EvalError, EvalResult};
use crate::expression::{CompiledExpression, PathEngine};
use crate::group::FHIR_PATH_LANGUAGE;
use crate::populations::{Individual, Populations};
use crate::store::Record;

/// A `(definition, value)` pair of one stratifier component, the value
/// possibly one of the reserved failure codings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StratumComponent {
    pub code: CodingKey,
    pub value: CodingKey,
}

impl StratumComponent {
    pub fn new(code: CodingKey, value: CodingKey) -> StratumComponent {
        StratumComponent { code, value }
    }
}

/// The identity of one stratum: the set of its component pairs.
///
/// Set semantics make the key order- and duplicate-insensitive; the ordered
/// backing keeps report output deterministic.
pub type StratumKey = BTreeSet<StratumComponent>;

/// A definition coding paired with its pre-resolved path expression,
/// resolved once per measure and reused per record.
#[derive(Debug, Clone)]
pub struct ComponentExpression {
    code: CodingKey,
    expression: CompiledExpression,
}

impl ComponentExpression {
    /// Build from a bare criteria stratifier.
    pub fn from_criteria(
        engine: &PathEngine,
        stratifier: &fhir::MeasureGroupStratifier,
    ) -> EvalResult<ComponentExpression> {
        let criteria = stratifier
            .criteria
            .as_ref()
            .ok_or(EvalError::StratifierMissingExpression)?;
        if criteria.language.as_deref() != Some(FHIR_PATH_LANGUAGE) {
            return Err(EvalError::StratifierLanguage(FHIR_PATH_LANGUAGE));
        }
        let text = criteria
            .expression
            .as_deref()
            .ok_or(EvalError::StratifierMissingExpression)?;

        let code = stratifier
            .code
            .as_ref()
            .and_then(fhir::CodeableConcept::coding_first)
            .map(CodingKey::of_fhir_coding)
            .unwrap_or_default();

        Ok(ComponentExpression {
            code,
            expression: engine.parse(text)?,
        })
    }

    /// Build from one component of a multi-component stratifier.
    pub fn from_component(
        engine: &PathEngine,
        component: &fhir::MeasureGroupStratifierComponent,
    ) -> EvalResult<ComponentExpression> {
        let codings = component
            .code
            .as_ref()
            .map(|c| c.coding.as_slice())
            .unwrap_or_default();
        if codings.len() != 1 {
            return Err(EvalError::StratifierComponentCodingCardinality);
        }

        let criteria = component
            .criteria
            .as_ref()
            .ok_or(EvalError::StratifierMissingExpression)?;
        if criteria.language.as_deref() != Some(FHIR_PATH_LANGUAGE) {
            return Err(EvalError::StratifierLanguage(FHIR_PATH_LANGUAGE));
        }
        let text = criteria
            .expression
            .as_deref()
            .ok_or(EvalError::StratifierMissingExpression)?;

        Ok(ComponentExpression {
            code: CodingKey::of_fhir_coding(&codings[0]),
            expression: engine.parse(text)?,
        })
    }

    /// Evaluate this component against one record.
    ///
    /// Zero results, multiple results, non-coding-shaped values and codings
    /// with missing fields all map to their failure coding; they never fail
    /// the fold.
    pub fn evaluate(&self, engine: &PathEngine, record: &Record) -> StratumComponent {
        let found = engine.evaluate(record.resource(), &self.expression);

        if found.is_empty() {
            return StratumComponent::new(self.code.clone(), CodingKey::fail_no_value_found());
        }
        if found.len() > 1 {
            return StratumComponent::new(self.code.clone(), CodingKey::fail_too_many_values());
        }

        let value = match &found[0] {
            Value::Object(fields) => {
                match (
                    fields.get("system").and_then(Value::as_str),
                    fields.get("code").and_then(Value::as_str),
                ) {
                    (Some(system), Some(code)) => {
                        let display = fields
                            .get("display")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        CodingKey::new(system, code, display)
                    }
                    _ => CodingKey::fail_missing_fields(),
                }
            }
            Value::String(code) => CodingKey::of_single_code_value(code.as_str()),
            Value::Bool(b) => CodingKey::of_single_code_value(b.to_string()),
            _ => CodingKey::fail_invalid_type(),
        };

        StratumComponent::new(self.code.clone(), value)
    }
}

/// All distinct strata observed for one stratifier.
///
/// Invariant: every entry of `counts` has the same population shape as the
/// enclosing group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StratifierResult {
    code: Option<CodingKey>,
    counts: HashMap<StratumKey, Populations>,
}

impl StratifierResult {
    /// An empty result for a stratifier declared with `code`.
    pub fn initial(code: Option<CodingKey>) -> StratifierResult {
        StratifierResult {
            code,
            counts: HashMap::new(),
        }
    }

    pub fn code(&self) -> Option<&CodingKey> {
        self.code.as_ref()
    }

    pub fn counts(&self) -> &HashMap<StratumKey, Populations> {
        &self.counts
    }

    /// Merge one record's stratum key and increment into the result.
    pub fn apply(&mut self, key: StratumKey, individual: &Individual) {
        let unit = individual.to_populations();
        match self.counts.entry(key) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                entry.get_mut().merge_from(unit);
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(unit);
            }
        }
    }

    /// Union of two results for the same stratifier, merging the counters of
    /// shared strata.
    pub fn merge(mut self, other: StratifierResult) -> StratifierResult {
        for (key, populations) in other.counts {
            match self.counts.entry(key) {
                std::collections::hash_map::Entry::Occupied(mut entry) => {
                    entry.get_mut().merge_from(populations);
                }
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert(populations);
                }
            }
        }
        self
    }
}

/// One stratifier of a group, resolved to its component expressions.
///
/// A bare criteria stratifier resolves to exactly one component; a
/// multi-component stratifier to one per declared component.
#[derive(Debug, Clone)]
pub struct ParsedStratifier {
    code: Option<CodingKey>,
    components: Vec<ComponentExpression>,
}

impl ParsedStratifier {
    pub fn from_fhir(
        engine: &PathEngine,
        stratifier: &fhir::MeasureGroupStratifier,
    ) -> EvalResult<ParsedStratifier> {
        let components = match (stratifier.criteria.is_some(), !stratifier.component.is_empty()) {
            (true, false) => vec![ComponentExpression::from_criteria(engine, stratifier)?],
            (false, true) => stratifier
                .component
                .iter()
                .map(|c| ComponentExpression::from_component(engine, c))
                .collect::<EvalResult<Vec<_>>>()?,
            _ => return Err(EvalError::StratifierCriteriaConflict),
        };

        let code = stratifier
            .code
            .as_ref()
            .and_then(fhir::CodeableConcept::coding_first)
            .map(CodingKey::of_fhir_coding);

        Ok(ParsedStratifier { code, components })
    }

    pub fn code(&self) -> Option<&CodingKey> {
        self.code.as_ref()
    }

    /// Evaluate every component independently against one record; the
    /// resulting pair set is the record's stratum key for this stratifier.
    pub fn evaluate(&self, engine: &PathEngine, record: &Record) -> StratumKey {
        self.components
            .iter()
            .map(|c| c.evaluate(engine, record))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::populations::InitialPopulation;
    use serde_json::json;

    fn record(resource: Value) -> Record {
        Record::detached(resource)
    }

    fn gender_component(engine: &PathEngine) -> ComponentExpression {
        ComponentExpression {
            code: CodingKey::new("http://example.org/strat", "gender", ""),
            expression: engine.parse("Patient.gender").unwrap(),
        }
    }

    #[test]
    fn test_component_extracts_code_value() {
        let engine = PathEngine::new();
        let component = gender_component(&engine);
        let record = record(json!({"resourceType": "Patient", "gender": "female"}));

        let found = component.evaluate(&engine, &record);
        assert_eq!(found.value, CodingKey::of_single_code_value("female"));
    }

    #[test]
    fn test_component_extracts_coding_value() {
        let engine = PathEngine::new();
        let component = ComponentExpression {
            code: CodingKey::new("http://example.org/strat", "diagnosis", ""),
            expression: engine.parse("Condition.code.coding").unwrap(),
        };
        let record = record(json!({
            "resourceType": "Condition",
            "code": {"coding": [{"system": "http://snomed.info/sct", "code": "13645005"}]}
        }));

        let found = component.evaluate(&engine, &record);
        assert_eq!(
            found.value,
            CodingKey::new("http://snomed.info/sct", "13645005", "")
        );
    }

    #[test]
    fn test_component_no_value_sentinel() {
        let engine = PathEngine::new();
        let component = gender_component(&engine);
        let record = record(json!({"resourceType": "Patient"}));

        let found = component.evaluate(&engine, &record);
        assert_eq!(found.value, CodingKey::fail_no_value_found());
    }

    #[test]
    fn test_component_too_many_values_sentinel() {
        let engine = PathEngine::new();
        let component = ComponentExpression {
            code: CodingKey::new("http://example.org/strat", "diagnosis", ""),
            expression: engine.parse("Condition.code.coding").unwrap(),
        };
        let record = record(json!({
            "resourceType": "Condition",
            "code": {"coding": [
                {"system": "http://snomed.info/sct", "code": "13645005"},
                {"system": "http://hl7.org/fhir/sid/icd-10", "code": "J44"}
            ]}
        }));

        let found = component.evaluate(&engine, &record);
        assert_eq!(found.value, CodingKey::fail_too_many_values());
    }

    #[test]
    fn test_component_missing_fields_sentinel() {
        let engine = PathEngine::new();
        let component = ComponentExpression {
            code: CodingKey::new("http://example.org/strat", "diagnosis", ""),
            expression: engine.parse("Condition.code.coding").unwrap(),
        };
        let record = record(json!({
            "resourceType": "Condition",
            "code": {"coding": [{"system": "http://snomed.info/sct"}]}
        }));

        let found = component.evaluate(&engine, &record);
        assert_eq!(found.value, CodingKey::fail_missing_fields());
    }

    #[test]
    fn test_component_invalid_type_sentinel() {
        let engine = PathEngine::new();
        let component = ComponentExpression {
            code: CodingKey::new("http://example.org/strat", "count", ""),
            expression: engine.parse("Observation.valueInteger").unwrap(),
        };
        let record = record(json!({"resourceType": "Observation", "valueInteger": 42}));

        let found = component.evaluate(&engine, &record);
        assert_eq!(found.value, CodingKey::fail_invalid_type());
    }

    #[test]
    fn test_boolean_value_becomes_code() {
        let engine = PathEngine::new();
        let component = ComponentExpression {
            code: CodingKey::new("http://example.org/strat", "deceased", ""),
            expression: engine.parse("Patient.deceasedBoolean").unwrap(),
        };
        let record = record(json!({"resourceType": "Patient", "deceasedBoolean": true}));

        let found = component.evaluate(&engine, &record);
        assert_eq!(found.value, CodingKey::of_single_code_value("true"));
    }

    #[test]
    fn test_stratum_key_is_order_insensitive() {
        let gender = StratumComponent::new(
            CodingKey::new("http://example.org/strat", "gender", ""),
            CodingKey::of_single_code_value("female"),
        );
        let status = StratumComponent::new(
            CodingKey::new("http://example.org/strat", "status", ""),
            CodingKey::of_single_code_value("active"),
        );

        let forward: StratumKey = [gender.clone(), status.clone()].into_iter().collect();
        let backward: StratumKey = [status, gender].into_iter().collect();

        assert_eq!(forward, backward);
    }

    #[test]
    fn test_apply_opens_and_increments_strata() {
        let mut result = StratifierResult::initial(None);
        let key: StratumKey = [StratumComponent::new(
            CodingKey::new("http://example.org/strat", "gender", ""),
            CodingKey::of_single_code_value("female"),
        )]
        .into_iter()
        .collect();

        result.apply(key.clone(), &Individual::Initial);
        result.apply(key.clone(), &Individual::Initial);

        match result.counts().get(&key) {
            Some(Populations::Initial { initial }) => assert_eq!(initial.count(), 2),
            other => panic!("unexpected entry: {other:?}"),
        }
    }

    #[test]
    fn test_merge_unions_strata() {
        let key_of = |code: &str| -> StratumKey {
            [StratumComponent::new(
                CodingKey::new("http://example.org/strat", "gender", ""),
                CodingKey::of_single_code_value(code),
            )]
            .into_iter()
            .collect()
        };

        let mut a = StratifierResult::initial(None);
        a.apply(key_of("female"), &Individual::Initial);
        let mut b = StratifierResult::initial(None);
        b.apply(key_of("female"), &Individual::Initial);
        b.apply(key_of("male"), &Individual::Initial);

        let merged = a.merge(b);
        assert_eq!(merged.counts().len(), 2);
        match merged.counts().get(&key_of("female")) {
            Some(Populations::Initial { initial }) => {
                assert_eq!(*initial, InitialPopulation::ONE.merge(InitialPopulation::ONE))
            }
            other => panic!("unexpected entry: {other:?}"),
        }
    }
}
