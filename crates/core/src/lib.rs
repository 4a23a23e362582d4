//! Measure evaluation engine.
//!
//! This crate evaluates a declarative FHIR `Measure` against a population of
//! resources fetched from a FHIR server, producing hierarchical population
//! counts and multi-dimensional stratifications as a `MeasureReport`.
//!
//! The heart of the crate is the aggregation model: [`populations::Populations`]
//! with its associative, commutative merge, [`stratifier::StratifierResult`]
//! mapping stratum keys to population counters, and the per-record fold in
//! [`group::GroupEvaluator`]. Groups of a measure are independent and are
//! evaluated concurrently by [`measure::MeasureEvaluator`].
//!
//! Per-record extraction failures are data, not errors: they surface as
//! reserved failure codings in the report (see [`coding::CodingKey`]), so a
//! single odd resource never discards a whole stratum. Definition errors, in
//! contrast, abort the evaluation (see [`error::EvalError`]).

pub mod coding;
pub mod config;
pub mod error;
pub mod expression;
pub mod group;
pub mod measure;
pub mod populations;
pub mod report;
pub mod store;
pub mod stratifier;

pub use coding::CodingKey;
pub use config::EvaluatorConfig;
pub use error::{EvalError, EvalResult, StoreError, StoreResult};
pub use expression::{CompiledExpression, PathEngine};
pub use measure::MeasureEvaluator;
pub use store::{DataStore, Record};
