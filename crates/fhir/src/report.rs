//! MeasureReport wire model.
//!
//! The report is the only document the engine produces. Its hierarchy mirrors
//! the measure: per group an ordered population-count list and an ordered
//! stratifier list; per stratifier an ordered stratum list where each stratum
//! carries either a single coded `value` or an ordered `component` list.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::primitives::{CodeableConcept, Extension, Quantity};
use crate::{FhirError, FhirResult};

/// A FHIR `MeasureReport` resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureReport {
    pub resource_type: String,

    pub status: String,

    #[serde(rename = "type")]
    pub report_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group: Vec<MeasureReportGroup>,
}

impl MeasureReport {
    /// Create a complete summary report carrying `groups`, dated now.
    pub fn summary(groups: Vec<MeasureReportGroup>) -> MeasureReport {
        MeasureReport {
            resource_type: "MeasureReport".into(),
            status: "complete".into(),
            report_type: "summary".into(),
            date: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
            extension: Vec::new(),
            group: groups,
        }
    }

    /// Serialise the report to pretty-printed JSON.
    pub fn to_json_string(&self) -> FhirResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| FhirError::InvalidInput(e.to_string()))
    }
}

/// The evaluation result of one measure group.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureReportGroup {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub population: Vec<MeasureReportPopulation>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub measure_score: Option<Quantity>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stratifier: Vec<MeasureReportStratifier>,
}

/// A population count entry, used on group and on stratum level.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureReportPopulation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

/// The evaluation result of one stratifier.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureReportStratifier {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code: Vec<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stratum: Vec<StratifierGroup>,
}

/// One stratum: a distinct combination of stratifier component values with
/// its own population counts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StratifierGroup {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub component: Vec<StratifierGroupComponent>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub population: Vec<MeasureReportPopulation>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub measure_score: Option<Quantity>,
}

/// A coded key/value pair of a multi-component stratum.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StratifierGroupComponent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<CodeableConcept>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Coding;

    fn concept(system: &str, code: &str) -> CodeableConcept {
        CodeableConcept {
            coding: vec![Coding {
                system: Some(system.into()),
                code: Some(code.into()),
                display: None,
            }],
            text: None,
        }
    }

    #[test]
    fn test_summary_report_shape() {
        let report = MeasureReport::summary(vec![MeasureReportGroup::default()]);

        assert_eq!(report.resource_type, "MeasureReport");
        assert_eq!(report.status, "complete");
        assert_eq!(report.report_type, "summary");
        assert!(report.date.is_some());
        assert_eq!(report.group.len(), 1);
    }

    #[test]
    fn test_report_type_serialises_as_type() {
        let report = MeasureReport::summary(Vec::new());
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["type"], "summary");
        assert!(json.get("reportType").is_none());
    }

    #[test]
    fn test_stratum_with_single_value() {
        let stratum = StratifierGroup {
            value: Some(concept("http://example.org", "female")),
            population: vec![MeasureReportPopulation {
                code: Some(concept(
                    "http://terminology.hl7.org/CodeSystem/measure-population",
                    "initial-population",
                )),
                count: Some(2),
            }],
            ..StratifierGroup::default()
        };

        let json = serde_json::to_value(&stratum).unwrap();
        assert_eq!(json["value"]["coding"][0]["code"], "female");
        assert_eq!(json["population"][0]["count"], 2);
        assert!(json.get("component").is_none());
    }

    #[test]
    fn test_stratum_with_components() {
        let stratum = StratifierGroup {
            component: vec![StratifierGroupComponent {
                code: Some(concept("http://example.org/strat", "gender")),
                value: Some(concept("http://example.org", "female")),
            }],
            ..StratifierGroup::default()
        };

        let json = serde_json::to_value(&stratum).unwrap();
        assert!(json.get("value").is_none());
        assert_eq!(json["component"][0]["value"]["coding"][0]["code"], "female");
    }
}
