//! Projection of aggregation results into the report wire format.
//!
//! The report builder is the only place that erases the population shape: it
//! matches exhaustively over [`Populations`] and emits the `{code, count}`
//! entries of the tiers that exist, plus the measure score for observation
//! shapes. Strata are emitted in key order so the report is deterministic
//! regardless of fold order.

use fhir::{
    MeasureReportGroup, MeasureReportPopulation, MeasureReportStratifier, Quantity,
    StratifierGroup, StratifierGroupComponent,
};

use crate::coding::CodingKey;
use crate::group::GroupResult;
use crate::populations::Populations;
use crate::stratifier::{StratifierResult, StratumKey};

/// Project one group's accumulated result into its report fragment.
pub(crate) fn group_to_report(result: GroupResult) -> MeasureReportGroup {
    let (population, measure_score) = population_entries(result.populations());
    let stratifier = result
        .stratifier_results()
        .iter()
        .map(stratifier_to_report)
        .collect();

    MeasureReportGroup {
        population,
        measure_score,
        stratifier,
    }
}

fn stratifier_to_report(result: &StratifierResult) -> MeasureReportStratifier {
    let mut strata: Vec<(&StratumKey, &Populations)> = result.counts().iter().collect();
    strata.sort_by(|a, b| a.0.cmp(b.0));

    MeasureReportStratifier {
        code: result
            .code()
            .map(|c| vec![c.to_codeable_concept()])
            .unwrap_or_default(),
        stratum: strata
            .into_iter()
            .map(|(key, populations)| stratum_to_report(key, populations))
            .collect(),
    }
}

/// One stratum: a single-pair key becomes a bare `value`, a multi-pair key
/// an ordered `component` list.
fn stratum_to_report(key: &StratumKey, populations: &Populations) -> StratifierGroup {
    let (population, measure_score) = population_entries(populations);

    let (value, component) = if key.len() == 1 {
        let only = key.iter().next().map(|c| c.value.to_codeable_concept());
        (only, Vec::new())
    } else {
        let components = key
            .iter()
            .map(|c| StratifierGroupComponent {
                code: Some(c.code.to_codeable_concept()),
                value: Some(c.value.to_codeable_concept()),
            })
            .collect();
        (None, components)
    };

    StratifierGroup {
        value,
        component,
        population,
        measure_score,
    }
}

/// The `{code, count}` entries of the tiers that exist, in tier order, plus
/// the measure score when an observation population is present.
fn population_entries(
    populations: &Populations,
) -> (Vec<MeasureReportPopulation>, Option<Quantity>) {
    match populations {
        Populations::Initial { initial } => (
            vec![entry(CodingKey::initial_population(), initial.count())],
            None,
        ),
        Populations::InitialAndMeasure { initial, measure } => (
            vec![
                entry(CodingKey::initial_population(), initial.count()),
                entry(CodingKey::measure_population(), measure.count()),
            ],
            None,
        ),
        Populations::InitialAndMeasureAndObs {
            initial,
            measure,
            observation,
        } => (
            vec![
                entry(CodingKey::initial_population(), initial.count()),
                entry(CodingKey::measure_population(), measure.count()),
                entry(CodingKey::measure_observation(), observation.count()),
            ],
            Some(Quantity::of(observation.score() as f64)),
        ),
    }
}

fn entry(code: CodingKey, count: u64) -> MeasureReportPopulation {
    MeasureReportPopulation {
        code: Some(code.to_codeable_concept()),
        count: Some(count),
    }
}
