//! Measure wire model.
//!
//! A `Measure` is the input definition of an evaluation: it declares groups,
//! each group's population clauses and its stratifiers. The engine only ever
//! reads measures, so this module provides deserialisation plus a parse
//! helper that reports the path to the failing field.

use serde::{Deserialize, Serialize};

use crate::primitives::{CodeableConcept, Expression, Extension};
use crate::FhirResult;

/// A FHIR `Measure` resource, reduced to the elements the engine evaluates.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group: Vec<MeasureGroup>,
}

impl Measure {
    /// Parse a measure resource from JSON text.
    ///
    /// Uses `serde_path_to_error` to surface a best-effort path (e.g.
    /// `group[0].population[1].criteria`) to the failing field when the JSON
    /// does not match the wire schema.
    pub fn from_json_str(json_text: &str) -> FhirResult<Measure> {
        crate::from_json_str(json_text)
    }
}

/// One unit of evaluation within a measure.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureGroup {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub population: Vec<MeasureGroupPopulation>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stratifier: Vec<MeasureGroupStratifier>,
}

/// A population clause of a group.
///
/// The `code` identifies which population tier the clause declares (initial
/// population, measure population, measure observation); the `criteria`
/// carries the query or path expression. Measure-observation clauses
/// additionally reference their measure population and declare an aggregate
/// method through extensions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureGroupPopulation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub criteria: Option<Expression>,
}

impl MeasureGroupPopulation {
    /// All extensions with the given URL.
    pub fn extensions_by_url<'a>(&'a self, url: &'a str) -> impl Iterator<Item = &'a Extension> {
        self.extension.iter().filter(move |e| e.url == url)
    }
}

/// A stratifier declaration: either a bare `criteria` or a list of
/// `component`s, never both.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureGroupStratifier {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub criteria: Option<Expression>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub component: Vec<MeasureGroupStratifierComponent>,
}

/// One component of a multi-component stratifier.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureGroupStratifierComponent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub criteria: Option<Expression>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FhirError;

    const MEASURE_JSON: &str = r#"{
        "resourceType": "Measure",
        "id": "example",
        "group": [{
            "population": [{
                "id": "initial-population-identifier",
                "code": {"coding": [{
                    "system": "http://terminology.hl7.org/CodeSystem/measure-population",
                    "code": "initial-population"
                }]},
                "criteria": {"language": "text/x-fhir-query", "expression": "Condition"}
            }],
            "stratifier": [{
                "code": {"coding": [{"system": "http://example.org/strat", "code": "diagnosis"}]},
                "criteria": {"language": "text/fhirpath", "expression": "Condition.code.coding"}
            }]
        }]
    }"#;

    #[test]
    fn test_parse_measure() {
        let measure = Measure::from_json_str(MEASURE_JSON).unwrap();

        assert_eq!(measure.id.as_deref(), Some("example"));
        assert_eq!(measure.group.len(), 1);

        let group = &measure.group[0];
        assert_eq!(group.population.len(), 1);
        assert_eq!(group.stratifier.len(), 1);

        let population = &group.population[0];
        let coding = population
            .code
            .as_ref()
            .and_then(CodeableConcept::coding_first)
            .unwrap();
        assert_eq!(coding.code.as_deref(), Some("initial-population"));

        let criteria = population.criteria.as_ref().unwrap();
        assert_eq!(criteria.language.as_deref(), Some("text/x-fhir-query"));
        assert_eq!(criteria.expression.as_deref(), Some("Condition"));
    }

    #[test]
    fn test_parse_error_carries_path() {
        let invalid = r#"{"group": [{"population": [{"criteria": 5}]}]}"#;
        let err = Measure::from_json_str(invalid).unwrap_err();

        match err {
            FhirError::InvalidJson { path, .. } => {
                assert!(path.contains("population"), "path was '{path}'");
                assert!(path.contains("criteria"), "path was '{path}'");
            }
            other => panic!("expected InvalidJson, got {other:?}"),
        }
    }

    #[test]
    fn test_extensions_by_url() {
        let population = MeasureGroupPopulation {
            extension: vec![
                Extension {
                    url: "http://example.org/a".into(),
                    value_string: Some("first".into()),
                    ..Extension::default()
                },
                Extension {
                    url: "http://example.org/b".into(),
                    value_string: Some("second".into()),
                    ..Extension::default()
                },
            ],
            ..MeasureGroupPopulation::default()
        };

        let found: Vec<_> = population.extensions_by_url("http://example.org/b").collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value_as_str(), Some("second"));
    }
}
