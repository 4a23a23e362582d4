//! Comparison-stable coding keys.
//!
//! A [`CodingKey`] identifies a concept by `(system, code)`; the display
//! label rides along for report output but is excluded from equality,
//! ordering and hashing, so codings that differ only in display collapse
//! into the same dictionary key.
//!
//! Besides real codings this module defines the reserved failure codings
//! used as stratum values when extraction fails on a record. They live under
//! a fixed out-of-band system so they can never collide with real data.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use fhir::{CodeableConcept, Coding};

/// System of the reserved failure codings.
pub const FAILURE_SYSTEM: &str = "http://fhir-evaluator/strat/system";

const MEASURE_POPULATION_SYSTEM: &str =
    "http://terminology.hl7.org/CodeSystem/measure-population";

/// A coding whose identity is `(system, code)`.
#[derive(Debug, Clone, Default)]
pub struct CodingKey {
    pub system: String,
    pub code: String,
    pub display: String,
}

impl CodingKey {
    pub fn new(
        system: impl Into<String>,
        code: impl Into<String>,
        display: impl Into<String>,
    ) -> CodingKey {
        CodingKey {
            system: system.into(),
            code: code.into(),
            display: display.into(),
        }
    }

    /// The well-known coding of initial-population clauses.
    pub fn initial_population() -> CodingKey {
        CodingKey::new(
            MEASURE_POPULATION_SYSTEM,
            "initial-population",
            "Initial Population",
        )
    }

    /// The well-known coding of measure-population clauses.
    pub fn measure_population() -> CodingKey {
        CodingKey::new(
            MEASURE_POPULATION_SYSTEM,
            "measure-population",
            "Measure Population",
        )
    }

    /// The well-known coding of measure-observation clauses.
    pub fn measure_observation() -> CodingKey {
        CodingKey::new(
            MEASURE_POPULATION_SYSTEM,
            "measure-observation",
            "Measure Observation",
        )
    }

    /// Failure value: the component expression returned no value.
    pub fn fail_no_value_found() -> CodingKey {
        CodingKey::new(FAILURE_SYSTEM, "fail-no-value-found", "Failed No Value Found")
    }

    /// Failure value: the component expression returned more than one value.
    pub fn fail_too_many_values() -> CodingKey {
        CodingKey::new(FAILURE_SYSTEM, "fail-too-many-values", "Failed Too Many Values")
    }

    /// Failure value: the extracted value was not coding-shaped.
    pub fn fail_invalid_type() -> CodingKey {
        CodingKey::new(FAILURE_SYSTEM, "fail-invalid-type", "Failed Invalid Type")
    }

    /// Failure value: the extracted coding was missing its system or code.
    pub fn fail_missing_fields() -> CodingKey {
        CodingKey::new(FAILURE_SYSTEM, "fail-missing-fields", "Failed Missing Fields")
    }

    /// Build a key from a wire coding. Absent fields become empty strings.
    pub fn of_fhir_coding(coding: &Coding) -> CodingKey {
        CodingKey {
            system: coding.system.clone().unwrap_or_default(),
            code: coding.code.clone().unwrap_or_default(),
            display: coding.display.clone().unwrap_or_default(),
        }
    }

    /// Build a key from a bare code value without a system, e.g. an extracted
    /// `code` element or a stringified boolean.
    pub fn of_single_code_value(code: impl Into<String>) -> CodingKey {
        CodingKey {
            system: String::new(),
            code: code.into(),
            display: String::new(),
        }
    }

    pub fn to_coding(&self) -> Coding {
        Coding {
            system: some_unless_empty(&self.system),
            code: some_unless_empty(&self.code),
            display: some_unless_empty(&self.display),
        }
    }

    pub fn to_codeable_concept(&self) -> CodeableConcept {
        CodeableConcept {
            coding: vec![self.to_coding()],
            text: None,
        }
    }
}

fn some_unless_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_owned())
    }
}

impl PartialEq for CodingKey {
    fn eq(&self, other: &Self) -> bool {
        self.system == other.system && self.code == other.code
    }
}

impl Eq for CodingKey {}

impl Hash for CodingKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.system.hash(state);
        self.code.hash(state);
    }
}

impl PartialOrd for CodingKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CodingKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.system, &self.code).cmp(&(&other.system, &other.code))
    }
}
