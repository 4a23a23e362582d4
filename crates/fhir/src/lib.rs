//! FHIR wire/boundary support for the measure evaluation engine.
//!
//! This crate provides **wire models** for the three resource families the
//! engine touches on its boundary:
//! - `Measure` (input definition, parsed from JSON)
//! - `Bundle` (paginated search responses from the FHIR server)
//! - `MeasureReport` (output document, serialised to JSON)
//!
//! This crate focuses on:
//! - FHIR semantic alignment of the JSON shapes (without FHIR REST transport)
//! - serialisation/deserialisation
//! - surfacing a best-effort path to the failing field on parse errors
//!
//! The structs are deliberately partial: only the elements the engine reads or
//! writes are modelled. Unknown elements are ignored on input and never
//! produced on output.

pub mod bundle;
pub mod measure;
pub mod primitives;
pub mod report;

// Re-export wire types
pub use bundle::{Bundle, BundleEntry, BundleEntrySearch, BundleLink};
pub use measure::{
    Measure, MeasureGroup, MeasureGroupPopulation, MeasureGroupStratifier,
    MeasureGroupStratifierComponent,
};
pub use primitives::{CodeableConcept, Coding, Expression, Extension, Quantity};
pub use report::{
    MeasureReport, MeasureReportGroup, MeasureReportPopulation, MeasureReportStratifier,
    StratifierGroup, StratifierGroupComponent,
};

/// Errors returned by the `fhir` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid JSON at '{path}': {source}")]
    InvalidJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;

pub(crate) fn from_json_str<T: serde::de::DeserializeOwned>(json_text: &str) -> FhirResult<T> {
    let deserializer = &mut serde_json::Deserializer::from_str(json_text);
    serde_path_to_error::deserialize(deserializer).map_err(|e| {
        let path = e.path().to_string();
        FhirError::InvalidJson {
            path,
            source: e.into_inner(),
        }
    })
}
