//! Group evaluation: population clause resolution and the per-record fold.
//!
//! Evaluating a group has two phases. Resolution inspects the group
//! definition once: it finds the single initial-population clause (whose
//! criteria is the population query), the optional measure-population and
//! measure-observation clauses, and resolves every stratifier into component
//! expressions. Any violation of the structural rules is a fatal
//! [`EvalError`].
//!
//! The fold then streams the population page by page and merges every record
//! into an accumulating [`GroupResult`]. Because the counter merge is
//! associative and commutative, the numeric outcome does not depend on
//! record order.

use serde_json::Value;

use crate::coding::CodingKey;
use crate::error::{EvalError, EvalResult};
use crate::expression::{CompiledExpression, PathEngine};
use crate::populations::{
    Individual, InitialPopulation, MeasurePopulation, ObservationPopulation, Populations,
};
use crate::report;
use crate::store::{DataStore, Record};
use crate::stratifier::{ParsedStratifier, StratifierResult};

pub(crate) const FHIR_QUERY_LANGUAGE: &str = "text/x-fhir-query";
pub(crate) const FHIR_PATH_LANGUAGE: &str = "text/fhirpath";

const CRITERIA_REFERENCE_URL: &str =
    "http://hl7.org/fhir/us/cqfmeasures/StructureDefinition/cqfm-criteriaReference";
const AGGREGATE_METHOD_URL: &str =
    "http://hl7.org/fhir/us/cqfmeasures/StructureDefinition/cqfm-aggregateMethod";
const AGGREGATE_UNIQUE_COUNT: &str = "unique-count";

/// The accumulated result of one group: group-level populations plus one
/// [`StratifierResult`] per declared stratifier, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupResult {
    populations: Populations,
    stratifier_results: Vec<StratifierResult>,
}

impl GroupResult {
    /// The identity result: all counters at zero, one empty stratifier
    /// result per declared stratifier.
    pub fn initial(populations: Populations, stratifier_results: Vec<StratifierResult>) -> GroupResult {
        GroupResult {
            populations,
            stratifier_results,
        }
    }

    pub fn populations(&self) -> &Populations {
        &self.populations
    }

    pub fn stratifier_results(&self) -> &[StratifierResult] {
        &self.stratifier_results
    }

    /// Merge one record into the result: the group-level counters and, per
    /// stratifier, the record's stratum.
    ///
    /// `stratifiers` must be the list the result was initialised for; entry
    /// `i` belongs to stratifier result `i`.
    pub fn apply_record(
        &mut self,
        stratifiers: &[ParsedStratifier],
        engine: &PathEngine,
        record: &Record,
        individual: &Individual,
    ) {
        debug_assert_eq!(stratifiers.len(), self.stratifier_results.len());

        self.populations.merge_from(individual.to_populations());
        for (stratifier, result) in stratifiers.iter().zip(&mut self.stratifier_results) {
            let key = stratifier.evaluate(engine, record);
            result.apply(key, individual);
        }
    }

    /// Merge two partial results of the same group.
    pub fn merge(self, other: GroupResult) -> GroupResult {
        debug_assert_eq!(self.stratifier_results.len(), other.stratifier_results.len());

        GroupResult {
            populations: self.populations.merge(other.populations),
            stratifier_results: self
                .stratifier_results
                .into_iter()
                .zip(other.stratifier_results)
                .map(|(a, b)| a.merge(b))
                .collect(),
        }
    }
}

/// The population shape of a group, resolved from its declared clauses
/// together with the expressions that drive per-record membership.
#[derive(Debug)]
enum ResolvedShape {
    Initial,
    InitialAndMeasure {
        measure: CompiledExpression,
    },
    InitialAndMeasureAndObs {
        measure: CompiledExpression,
        observation: CompiledExpression,
    },
}

impl ResolvedShape {
    fn identity(&self) -> Populations {
        match self {
            ResolvedShape::Initial => Populations::Initial {
                initial: InitialPopulation::ZERO,
            },
            ResolvedShape::InitialAndMeasure { .. } => Populations::InitialAndMeasure {
                initial: InitialPopulation::ZERO,
                measure: MeasurePopulation::ZERO,
            },
            ResolvedShape::InitialAndMeasureAndObs { .. } => Populations::InitialAndMeasureAndObs {
                initial: InitialPopulation::ZERO,
                measure: MeasurePopulation::ZERO,
                observation: ObservationPopulation::empty(),
            },
        }
    }

    /// Evaluate one record into its increment carrier.
    fn individual(&self, engine: &PathEngine, record: &Record) -> EvalResult<Individual> {
        match self {
            ResolvedShape::Initial => Ok(Individual::Initial),
            ResolvedShape::InitialAndMeasure { measure } => {
                let member = measure_population_resource(engine, record, measure)?;
                Ok(Individual::InitialAndMeasure {
                    in_measure: member.is_some(),
                })
            }
            ResolvedShape::InitialAndMeasureAndObs {
                measure,
                observation,
            } => {
                let member = measure_population_resource(engine, record, measure)?;
                let observation = match &member {
                    Some(resource) => observation_value(engine, resource, observation)?,
                    None => None,
                };
                Ok(Individual::InitialAndMeasureAndObs {
                    in_measure: member.is_some(),
                    observation,
                })
            }
        }
    }
}

/// The resource selected by the measure-population expression, if the record
/// is a member.
fn measure_population_resource(
    engine: &PathEngine,
    record: &Record,
    expression: &CompiledExpression,
) -> EvalResult<Option<Value>> {
    let mut found = engine.evaluate(record.resource(), expression);

    if found.is_empty() {
        return Ok(None);
    }
    if found.len() > 1 {
        return Err(EvalError::MeasurePopulationTooManyValues);
    }

    let value = found.remove(0);
    if value.get("resourceType").and_then(Value::as_str).is_some() {
        Ok(Some(value))
    } else {
        Err(EvalError::MeasurePopulationInvalidType)
    }
}

/// The observation value extracted from a measure-population member.
fn observation_value(
    engine: &PathEngine,
    resource: &Value,
    expression: &CompiledExpression,
) -> EvalResult<Option<String>> {
    let mut found = engine.evaluate(resource, expression);

    if found.is_empty() {
        return Ok(None);
    }
    if found.len() > 1 {
        return Err(EvalError::ObservationTooManyValues);
    }

    match found.remove(0) {
        Value::String(s) => Ok(Some(s)),
        _ => Err(EvalError::ObservationInvalidType),
    }
}

/// Evaluates one group of a measure against the record stream its
/// initial-population query selects.
#[derive(Clone)]
pub struct GroupEvaluator {
    store: std::sync::Arc<DataStore>,
    engine: std::sync::Arc<PathEngine>,
}

impl GroupEvaluator {
    pub fn new(store: std::sync::Arc<DataStore>, engine: std::sync::Arc<PathEngine>) -> GroupEvaluator {
        GroupEvaluator { store, engine }
    }

    /// Evaluate `group` into its report fragment.
    pub async fn evaluate_group(
        &self,
        group: &fhir::MeasureGroup,
    ) -> EvalResult<fhir::MeasureReportGroup> {
        let resolved = ResolvedGroup::resolve(&self.engine, group)?;

        let mut result = resolved.identity_result();
        let mut pages = self.store.resources(&resolved.population_query);
        let mut record_count: u64 = 0;

        while let Some(page) = pages.next_page().await {
            let records = page?;
            record_count += records.len() as u64;
            for record in &records {
                let individual = resolved.shape.individual(&self.engine, record)?;
                result.apply_record(&resolved.stratifiers, &self.engine, record, &individual);
            }
        }
        tracing::debug!(records = record_count, "folded group population");

        Ok(report::group_to_report(result))
    }
}

/// A group definition after resolution, ready to fold records.
#[derive(Debug)]
struct ResolvedGroup {
    population_query: String,
    shape: ResolvedShape,
    stratifiers: Vec<ParsedStratifier>,
}

impl ResolvedGroup {
    fn resolve(engine: &PathEngine, group: &fhir::MeasureGroup) -> EvalResult<ResolvedGroup> {
        let initial = find_initial_population(group)?;
        let population_query = initial
            .criteria
            .as_ref()
            .and_then(|c| c.expression.clone())
            .ok_or(EvalError::InitialPopulationMissingExpression)?;

        let measure = find_measure_population(group)?;
        let observation = find_observation_population(group)?;

        let shape = match (measure, observation) {
            (None, None) => ResolvedShape::Initial,
            (Some(measure), None) => ResolvedShape::InitialAndMeasure {
                measure: engine.parse(measure)?,
            },
            (Some(measure), Some(observation)) => ResolvedShape::InitialAndMeasureAndObs {
                measure: engine.parse(measure)?,
                observation: engine.parse(observation)?,
            },
            (None, Some(_)) => return Err(EvalError::ObservationWithoutMeasurePopulation),
        };

        let stratifiers = group
            .stratifier
            .iter()
            .map(|s| ParsedStratifier::from_fhir(engine, s))
            .collect::<EvalResult<Vec<_>>>()?;

        Ok(ResolvedGroup {
            population_query,
            shape,
            stratifiers,
        })
    }

    fn identity_result(&self) -> GroupResult {
        let stratifier_results = self
            .stratifiers
            .iter()
            .map(|s| StratifierResult::initial(s.code().cloned()))
            .collect();
        GroupResult::initial(self.shape.identity(), stratifier_results)
    }
}

/// All population clauses of `group` declared with `code`; every clause must
/// carry exactly one coding.
fn populations_by_code<'a>(
    group: &'a fhir::MeasureGroup,
    code: &CodingKey,
) -> EvalResult<Vec<&'a fhir::MeasureGroupPopulation>> {
    let mut found = Vec::new();
    for population in &group.population {
        let codings = population
            .code
            .as_ref()
            .map(|c| c.coding.as_slice())
            .unwrap_or_default();
        if codings.len() != 1 {
            return Err(EvalError::PopulationCodingCardinality);
        }
        if CodingKey::of_fhir_coding(&codings[0]) == *code {
            found.push(population);
        }
    }
    Ok(found)
}

fn find_initial_population(
    group: &fhir::MeasureGroup,
) -> EvalResult<&fhir::MeasureGroupPopulation> {
    let found = populations_by_code(group, &CodingKey::initial_population())?;
    if found.len() != 1 {
        return Err(EvalError::InitialPopulationCardinality);
    }

    let initial = found[0];
    let language = initial.criteria.as_ref().and_then(|c| c.language.as_deref());
    if language != Some(FHIR_QUERY_LANGUAGE) {
        return Err(EvalError::InitialPopulationLanguage(FHIR_QUERY_LANGUAGE));
    }

    Ok(initial)
}

/// The measure-population expression, if the group declares that clause.
fn find_measure_population(group: &fhir::MeasureGroup) -> EvalResult<Option<&str>> {
    let found = populations_by_code(group, &CodingKey::measure_population())?;
    if found.is_empty() {
        return Ok(None);
    }
    if found.len() > 1 {
        return Err(EvalError::MeasurePopulationCardinality);
    }

    let measure = found[0];
    let criteria = measure
        .criteria
        .as_ref()
        .ok_or(EvalError::MeasurePopulationMissingExpression)?;
    if criteria.language.as_deref() != Some(FHIR_PATH_LANGUAGE) {
        return Err(EvalError::MeasurePopulationLanguage(FHIR_PATH_LANGUAGE));
    }
    criteria
        .expression
        .as_deref()
        .ok_or(EvalError::MeasurePopulationMissingExpression)
        .map(Some)
}

/// The measure-observation expression, if the group declares that clause.
///
/// An observation clause must reference the measure-population clause it
/// aggregates over and declare the unique-count aggregate method.
fn find_observation_population(group: &fhir::MeasureGroup) -> EvalResult<Option<&str>> {
    let found = populations_by_code(group, &CodingKey::measure_observation())?;
    if found.is_empty() {
        return Ok(None);
    }
    if found.len() > 1 {
        return Err(EvalError::ObservationPopulationCardinality);
    }

    let observation = found[0];
    let criteria = observation
        .criteria
        .as_ref()
        .ok_or(EvalError::ObservationPopulationMissingExpression)?;
    if criteria.language.as_deref() != Some(FHIR_PATH_LANGUAGE) {
        return Err(EvalError::ObservationPopulationLanguage(FHIR_PATH_LANGUAGE));
    }

    let references: Vec<_> = observation
        .extensions_by_url(CRITERIA_REFERENCE_URL)
        .collect();
    if references.len() != 1 {
        return Err(EvalError::CriteriaReferenceCardinality);
    }
    let reference = references[0]
        .value_as_str()
        .ok_or(EvalError::CriteriaReferenceNoValue)?;

    let measure_populations = populations_by_code(group, &CodingKey::measure_population())?;
    if let Some(measure_population) = measure_populations.first() {
        if measure_population.id.as_deref() != Some(reference) {
            return Err(EvalError::CriteriaReferenceMismatch);
        }
    }

    let methods: Vec<_> = observation.extensions_by_url(AGGREGATE_METHOD_URL).collect();
    if methods.len() != 1 {
        return Err(EvalError::AggregateMethodCardinality);
    }
    let method = methods[0]
        .value_as_str()
        .ok_or(EvalError::AggregateMethodNoValue)?;
    if method != AGGREGATE_UNIQUE_COUNT {
        return Err(EvalError::AggregateMethodUnsupported {
            expected: AGGREGATE_UNIQUE_COUNT,
        });
    }

    criteria
        .expression
        .as_deref()
        .ok_or(EvalError::ObservationPopulationMissingExpression)
        .map(Some)
}
