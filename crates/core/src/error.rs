//! Error types of the evaluation engine.
//!
//! Two disjoint classes exist. [`EvalError`] covers definition/structural
//! errors in the measure: wrong cardinality of a population clause, wrong
//! expression-language tag, missing cross-references. These are fatal and
//! abort the whole evaluation. [`StoreError`] covers terminal failures of the
//! FHIR server collaborator. Per-record extraction outcomes are *not* errors;
//! they are encoded as reserved failure codings (see [`crate::coding`]).

use crate::expression::ExpressionError;

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("population in measure did not contain exactly one coding")]
    PopulationCodingCardinality,

    #[error("measure did not contain exactly one initial population")]
    InitialPopulationCardinality,

    #[error("language of initial population was not equal to '{0}'")]
    InitialPopulationLanguage(&'static str),

    #[error("initial population did not contain a criteria expression")]
    InitialPopulationMissingExpression,

    #[error("measure did contain more than one measure population")]
    MeasurePopulationCardinality,

    #[error("language of measure population was not equal to '{0}'")]
    MeasurePopulationLanguage(&'static str),

    #[error("measure population did not contain a criteria expression")]
    MeasurePopulationMissingExpression,

    #[error("measure did contain more than one observation population")]
    ObservationPopulationCardinality,

    #[error("language of measure observation was not equal to '{0}'")]
    ObservationPopulationLanguage(&'static str),

    #[error("measure observation population did not contain a criteria expression")]
    ObservationPopulationMissingExpression,

    #[error("group must not contain a measure observation without a measure population")]
    ObservationWithoutMeasurePopulation,

    #[error("measure observation population did not contain exactly one criteria reference")]
    CriteriaReferenceCardinality,

    #[error("criteria reference of measure observation population has no value")]
    CriteriaReferenceNoValue,

    #[error(
        "value of criteria reference of measure observation population must be equal to the id \
         of the measure population"
    )]
    CriteriaReferenceMismatch,

    #[error("measure observation population did not contain exactly one aggregate method")]
    AggregateMethodCardinality,

    #[error("aggregate method of measure observation population has no value")]
    AggregateMethodNoValue,

    #[error("aggregate method of measure observation population has not value '{expected}'")]
    AggregateMethodUnsupported { expected: &'static str },

    #[error("stratifier did not contain either criteria or component exclusively")]
    StratifierCriteriaConflict,

    #[error("language of stratifier was not equal to '{0}'")]
    StratifierLanguage(&'static str),

    #[error("stratifier did not contain a criteria expression")]
    StratifierMissingExpression,

    #[error("stratifier component did not contain exactly one coding")]
    StratifierComponentCodingCardinality,

    #[error("measure population evaluated into more than one entity")]
    MeasurePopulationTooManyValues,

    #[error("measure population evaluated into different type than 'Resource'")]
    MeasurePopulationInvalidType,

    #[error("measure observation population evaluated into more than one entity")]
    ObservationTooManyValues,

    #[error("measure observation population evaluated into different type than 'String'")]
    ObservationInvalidType,

    #[error("group evaluation task failed: {0}")]
    GroupTask(String),

    #[error("expression error: {0}")]
    Expression(#[from] ExpressionError),

    #[error("data store error: {0}")]
    Store(#[from] StoreError),
}

/// Type alias for Results that can fail with an [`EvalError`].
pub type EvalResult<T> = Result<T, EvalError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),

    #[error("bearer token contains characters that are not valid in a header value")]
    InvalidBearerToken,

    #[error("request to '{url}' failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to '{url}' failed with status code '{status}'")]
    Status { url: String, status: u16 },

    #[error("retries exhausted: {attempts}/{attempts}: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<StoreError>,
    },

    #[error("failed to parse bundle from '{url}': {source}")]
    InvalidBundle {
        url: String,
        #[source]
        source: Box<fhir::FhirError>,
    },

    #[error("malformed resource '{res_type}/{id}' in bundle")]
    MalformedResource { res_type: String, id: String },

    #[error("failed uploading measure report with status code '{status}' and body: '{body}'")]
    ReportUpload { status: u16, body: String },
}

impl StoreError {
    /// Whether the failure is worth retrying: serverside errors and 404, but
    /// never other client errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Status { status, .. } => *status >= 500 || *status == 404,
            _ => false,
        }
    }
}

/// Type alias for Results that can fail with a [`StoreError`].
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_error(status: u16) -> StoreError {
        StoreError::Status {
            url: "http://server/Condition".into(),
            status,
        }
    }

    #[test]
    fn test_server_errors_are_retryable() {
        assert!(status_error(500).is_retryable());
        assert!(status_error(503).is_retryable());
    }

    #[test]
    fn test_not_found_is_retryable() {
        assert!(status_error(404).is_retryable());
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        assert!(!status_error(400).is_retryable());
        assert!(!status_error(401).is_retryable());
        assert!(!status_error(422).is_retryable());
    }

    #[test]
    fn test_retries_exhausted_message() {
        let err = StoreError::RetriesExhausted {
            attempts: 3,
            source: Box::new(status_error(500)),
        };
        assert!(err.to_string().starts_with("retries exhausted: 3/3"));
    }
}
