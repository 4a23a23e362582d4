//! Population counters and their merge algebra.
//!
//! A group declares which population tiers it has (initial population,
//! measure population, measure observation); that shape is determined once
//! from the group definition and never varies per record. [`Populations`] is
//! the sum type over the three allowed shapes, [`Individual`] is the
//! per-record increment carrier of the same shapes.
//!
//! `merge` is associative and commutative and has the all-zero value of each
//! shape as its identity. This is the property that licenses both sequential
//! folding and parallel partial reduction with a final merge: the numeric
//! outcome is independent of record order.

use std::collections::HashSet;
use std::mem;

/// Count of all records that entered a group or stratum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitialPopulation {
    count: u64,
}

impl InitialPopulation {
    pub const ZERO: InitialPopulation = InitialPopulation { count: 0 };
    pub const ONE: InitialPopulation = InitialPopulation { count: 1 };

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn merge(self, other: InitialPopulation) -> InitialPopulation {
        InitialPopulation {
            count: self.count + other.count,
        }
    }
}

/// Count of the records that met the measure-population filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeasurePopulation {
    count: u64,
}

impl MeasurePopulation {
    pub const ZERO: MeasurePopulation = MeasurePopulation { count: 0 };
    pub const ONE: MeasurePopulation = MeasurePopulation { count: 1 };

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn merge(self, other: MeasurePopulation) -> MeasurePopulation {
        MeasurePopulation {
            count: self.count + other.count,
        }
    }
}

/// Set of unique observation values.
///
/// The set is mutated in place on merge as a fold optimisation; a counter is
/// owned by exactly one group evaluation and never shared, so the mutation is
/// invisible outside the fold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateUniqueCount {
    values: HashSet<String>,
}

impl AggregateUniqueCount {
    pub fn empty() -> AggregateUniqueCount {
        AggregateUniqueCount::default()
    }

    pub fn of(value: String) -> AggregateUniqueCount {
        AggregateUniqueCount {
            values: HashSet::from([value]),
        }
    }

    /// Union of both value sets. Always extends the larger side so merging a
    /// one-element set into a big accumulator stays cheap in either argument
    /// order.
    pub fn merge(mut self, mut other: AggregateUniqueCount) -> AggregateUniqueCount {
        if other.values.len() > self.values.len() {
            mem::swap(&mut self.values, &mut other.values);
        }
        self.values.extend(other.values);
        self
    }

    /// The measure score: cardinality of the deduplicated set.
    pub fn score(&self) -> u64 {
        self.values.len() as u64
    }
}

/// Count plus unique-value aggregate of the records that contributed an
/// observation value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservationPopulation {
    count: u64,
    aggregate: AggregateUniqueCount,
}

impl ObservationPopulation {
    pub fn empty() -> ObservationPopulation {
        ObservationPopulation::default()
    }

    pub fn of(value: String) -> ObservationPopulation {
        ObservationPopulation {
            count: 1,
            aggregate: AggregateUniqueCount::of(value),
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn merge(self, other: ObservationPopulation) -> ObservationPopulation {
        ObservationPopulation {
            count: self.count + other.count,
            aggregate: self.aggregate.merge(other.aggregate),
        }
    }

    pub fn score(&self) -> u64 {
        self.aggregate.score()
    }
}

/// The populations of one group or stratum.
///
/// A group must have an initial population, but it might or might not have a
/// measure population and a measure observation population. For each allowed
/// combination there is one variant; the report builder matches exhaustively
/// over them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Populations {
    Initial {
        initial: InitialPopulation,
    },
    InitialAndMeasure {
        initial: InitialPopulation,
        measure: MeasurePopulation,
    },
    InitialAndMeasureAndObs {
        initial: InitialPopulation,
        measure: MeasurePopulation,
        observation: ObservationPopulation,
    },
}

impl Populations {
    /// Component-wise merge. Both sides always have the same shape because a
    /// group's shape is fixed for the whole evaluation.
    pub fn merge(self, other: Populations) -> Populations {
        match (self, other) {
            (Populations::Initial { initial: a }, Populations::Initial { initial: b }) => {
                Populations::Initial { initial: a.merge(b) }
            }
            (
                Populations::InitialAndMeasure {
                    initial: ia,
                    measure: ma,
                },
                Populations::InitialAndMeasure {
                    initial: ib,
                    measure: mb,
                },
            ) => Populations::InitialAndMeasure {
                initial: ia.merge(ib),
                measure: ma.merge(mb),
            },
            (
                Populations::InitialAndMeasureAndObs {
                    initial: ia,
                    measure: ma,
                    observation: oa,
                },
                Populations::InitialAndMeasureAndObs {
                    initial: ib,
                    measure: mb,
                    observation: ob,
                },
            ) => Populations::InitialAndMeasureAndObs {
                initial: ia.merge(ib),
                measure: ma.merge(mb),
                observation: oa.merge(ob),
            },
            _ => unreachable!("population shape is fixed per group"),
        }
    }

    /// In-place variant of [`Populations::merge`] for fold accumulators.
    pub fn merge_from(&mut self, other: Populations) {
        let placeholder = Populations::Initial {
            initial: InitialPopulation::ZERO,
        };
        let current = mem::replace(self, placeholder);
        *self = current.merge(other);
    }
}

/// Per-record increment carrier, mirroring the three population shapes.
///
/// Evaluating one record against a group's expressions yields an
/// `Individual`; updating an accumulator is merging the individual's unit
/// populations into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Individual {
    Initial,
    InitialAndMeasure {
        in_measure: bool,
    },
    InitialAndMeasureAndObs {
        in_measure: bool,
        observation: Option<String>,
    },
}

impl Individual {
    /// The unit populations of this individual: counts of one for the tiers
    /// the record belongs to, zero otherwise. Used both as the increment and
    /// as the first value of a freshly opened stratum.
    pub fn to_populations(&self) -> Populations {
        match self {
            Individual::Initial => Populations::Initial {
                initial: InitialPopulation::ONE,
            },
            Individual::InitialAndMeasure { in_measure } => Populations::InitialAndMeasure {
                initial: InitialPopulation::ONE,
                measure: if *in_measure {
                    MeasurePopulation::ONE
                } else {
                    MeasurePopulation::ZERO
                },
            },
            Individual::InitialAndMeasureAndObs {
                in_measure,
                observation,
            } => Populations::InitialAndMeasureAndObs {
                initial: InitialPopulation::ONE,
                measure: if *in_measure {
                    MeasurePopulation::ONE
                } else {
                    MeasurePopulation::ZERO
                },
                observation: observation
                    .clone()
                    .map(ObservationPopulation::of)
                    .unwrap_or_else(ObservationPopulation::empty),
            },
        }
    }
}
