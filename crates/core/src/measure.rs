//! Measure evaluation: fan-out over independent groups.
//!
//! Groups of a measure share no state, so they evaluate concurrently on a
//! bounded number of tasks. Results are reassembled into declaration order
//! regardless of completion order. The first fatal error aborts the sibling
//! evaluations and fails the whole measure; no partial report is produced.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{EvalError, EvalResult};
use crate::expression::PathEngine;
use crate::group::GroupEvaluator;
use crate::store::DataStore;

pub struct MeasureEvaluator {
    group_evaluator: GroupEvaluator,
    max_concurrency: usize,
}

impl MeasureEvaluator {
    pub fn new(store: Arc<DataStore>, engine: Arc<PathEngine>, max_concurrency: usize) -> MeasureEvaluator {
        MeasureEvaluator {
            group_evaluator: GroupEvaluator::new(store, engine),
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Evaluate every group of `measure` and collect the report.
    pub async fn evaluate_measure(&self, measure: &fhir::Measure) -> EvalResult<fhir::MeasureReport> {
        let total = measure.group.len();
        tracing::info!(groups = total, "begin evaluating measure");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks: JoinSet<(usize, EvalResult<fhir::MeasureReportGroup>)> = JoinSet::new();

        for (index, group) in measure.group.iter().cloned().enumerate() {
            let evaluator = self.group_evaluator.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                // bounds the number of groups evaluated at once
                let _permit = semaphore.acquire().await;
                (index, evaluator.evaluate_group(&group).await)
            });
        }

        let mut slots: Vec<Option<fhir::MeasureReportGroup>> = Vec::new();
        slots.resize_with(total, || None);
        let mut completed = 0usize;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(report_group))) => {
                    completed += 1;
                    tracing::info!("evaluated {completed} out of {total} groups");
                    slots[index] = Some(report_group);
                }
                Ok((_, Err(e))) => {
                    tasks.abort_all();
                    return Err(e);
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    tasks.abort_all();
                    return Err(EvalError::GroupTask(e.to_string()));
                }
            }
        }

        let groups = slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| EvalError::GroupTask("missing group result".into())))
            .collect::<EvalResult<Vec<_>>>()?;

        Ok(fhir::MeasureReport::summary(groups))
    }
}
