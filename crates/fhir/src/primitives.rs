//! Shared FHIR datatype wire models.
//!
//! These are the handful of general-purpose datatypes the measure and report
//! models are built from. All of them serialise to the standard FHIR JSON
//! element shapes; optional elements are omitted from the output entirely
//! rather than written as `null`.

use serde::{Deserialize, Serialize};

/// A coded value drawn from a code system.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// A concept described by one or more codings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeableConcept {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CodeableConcept {
    /// The first coding, if any.
    pub fn coding_first(&self) -> Option<&Coding> {
        self.coding.first()
    }
}

/// An expression in some expression language, e.g. a FHIR search query or a
/// FHIRPath expression.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expression {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

/// A quantity, optionally carrying a unit.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quantity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Quantity {
    /// A bare quantity with only a value.
    pub fn of(value: f64) -> Self {
        Quantity {
            value: Some(value),
            ..Quantity::default()
        }
    }
}

/// An extension element. Only the value kinds the engine consumes or produces
/// are modelled.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_quantity: Option<Quantity>,
}

impl Extension {
    /// The extension value as a string, regardless of whether it was written
    /// as `valueString` or `valueCode`.
    pub fn value_as_str(&self) -> Option<&str> {
        self.value_string
            .as_deref()
            .or(self.value_code.as_deref())
    }
}
