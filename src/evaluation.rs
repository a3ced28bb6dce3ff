//! Evaluation of candidate threshold policies on stored sample paths.
//!
//! Work is split into shards by `(rank, workers)`: each shard takes a contiguous block of
//! the policy list. Every sample path in the shard is restored from its checkpoint, each
//! policy is simulated to the horizon, and the replication is reset back to the checkpoint
//! before the next policy.

use std::ops::Range;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointStore;
use crate::city::City;
use crate::error::SimError;
use crate::log::{debug, info};
use crate::policy::{MonitoredStatistic, Tier, ThresholdPolicy};
use crate::random::SimRng;
use crate::replication::Replication;
use crate::vaccine::VaccinationProgram;

/// Items of `0..num` handled by shard `rank` out of `workers`. The first `num % workers`
/// shards take one extra item.
#[must_use]
pub fn shard_range(num: usize, rank: usize, workers: usize) -> Range<usize> {
    if workers == 0 || rank >= workers {
        return 0..0;
    }
    let base = num / workers;
    let leftover = num % workers;
    let start = rank * base + rank.min(leftover);
    let len = base + usize::from(rank < leftover);
    start..start + len
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Date of the checkpoint every path is restored from
    pub checkpoint_date: NaiveDate,
    /// Day the policies are simulated up to (exclusive)
    pub end_time: usize,
    pub rank: usize,
    pub workers: usize,
    pub statistic: MonitoredStatistic,
    /// Moving-average window of the monitored statistic, in days
    pub window: usize,
}

impl EvaluationConfig {
    #[must_use]
    pub fn new(checkpoint_date: NaiveDate, end_time: usize) -> Self {
        EvaluationConfig {
            checkpoint_date,
            end_time,
            rank: 0,
            workers: 1,
            statistic: MonitoredStatistic::default(),
            window: 7,
        }
    }
}

/// Outcome of one policy on one sample path.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PolicyEvaluation {
    pub path_id: String,
    pub policy: String,
    pub cost: Option<f64>,
    pub feasible: Option<bool>,
    #[serde(skip)]
    pub tier_history: Vec<Option<usize>>,
}

/// Evaluates this shard's share of `thresholds` on every path in `path_ids`.
///
/// The generator, if any, is carried from path to path.
///
/// # Errors
///
/// Returns a `SimError` for invalid thresholds, a missing or mismatched checkpoint, a
/// horizon not after the checkpoint, or a failed simulation.
pub fn evaluate_policies_on_sample_paths(
    city: &City,
    vaccines: &VaccinationProgram,
    tiers: &[Tier],
    thresholds: &[Vec<f64>],
    path_ids: &[String],
    config: &EvaluationConfig,
    store: &dyn CheckpointStore,
    rng: Option<SimRng>,
) -> Result<Vec<PolicyEvaluation>, SimError> {
    if config.end_time > city.calendar.len() {
        return Err(SimError::CalendarError(format!(
            "end time {} is past the {}-day calendar",
            config.end_time,
            city.calendar.len()
        )));
    }
    let shard = shard_range(thresholds.len(), config.rank, config.workers);
    info!(
        "rank {}: evaluating policies {:?} of {} on {} sample paths",
        config.rank,
        shard,
        thresholds.len(),
        path_ids.len()
    );

    let mut policies = Vec::with_capacity(shard.len());
    for tuple in &thresholds[shard] {
        policies.push(
            ThresholdPolicy::new(tiers.to_vec(), tuple.clone())?
                .with_statistic(config.statistic, config.window),
        );
    }

    let mut results = Vec::with_capacity(policies.len() * path_ids.len());
    let mut rng = rng;
    for path_id in path_ids {
        let snapshot = store.load(path_id, config.checkpoint_date)?;
        let mut rep = Replication::restore(city, vaccines, snapshot, rng)?;
        if config.end_time <= rep.next_t() {
            return Err(SimError::ConfigError(format!(
                "end time {} is not after checkpoint day {} of path {path_id}",
                config.end_time,
                rep.next_t()
            )));
        }
        for policy in &policies {
            rep.set_policy(Box::new(policy.clone()));
            rep.advance_to(config.end_time)?;
            let evaluation = PolicyEvaluation {
                path_id: path_id.clone(),
                policy: policy_identifier(&rep),
                cost: rep.compute_cost(),
                feasible: rep.compute_feasibility(),
                tier_history: rep
                    .policy()
                    .map(|p| p.tier_history().to_vec())
                    .unwrap_or_default(),
            };
            debug!(
                "path {path_id} policy {}: cost {:?} feasible {:?}",
                evaluation.policy, evaluation.cost, evaluation.feasible
            );
            results.push(evaluation);
            rep.reset();
        }
        rng = rep.into_rng();
    }
    info!("rank {}: finished {} evaluations", config.rank, results.len());
    Ok(results)
}

fn policy_identifier(rep: &Replication<'_>) -> String {
    rep.policy().map(|p| p.identifier()).unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::city::test::city;
    use crate::policy::test::tiers;

    #[test]
    fn shards_cover_everything_once() {
        for num in [0, 1, 7, 10, 23] {
            for workers in 1..6 {
                let mut covered = Vec::new();
                for rank in 0..workers {
                    covered.extend(shard_range(num, rank, workers));
                }
                assert_eq!(covered, (0..num).collect::<Vec<_>>());
            }
        }
        assert_eq!(shard_range(10, 0, 3), 0..4);
        assert_eq!(shard_range(10, 1, 3), 4..7);
        assert_eq!(shard_range(10, 2, 3), 7..10);
        assert_eq!(shard_range(10, 3, 3), 0..0);
    }

    fn stored_path(store: &mut MemoryCheckpointStore) -> NaiveDate {
        let city = city();
        let vaccines = VaccinationProgram::none();
        let mut rep = Replication::new(&city, &vaccines, None).unwrap();
        rep.advance_to(30).unwrap();
        let date = city.calendar.date(30).unwrap();
        store.save("0_1", date, &rep.snapshot()).unwrap();
        date
    }

    #[test]
    fn every_policy_runs_from_the_checkpoint() {
        let city = city();
        let vaccines = VaccinationProgram::none();
        let mut store = MemoryCheckpointStore::default();
        let date = stored_path(&mut store);
        let thresholds = vec![
            vec![-1.0, 0.0, 0.0, 0.0, 0.0],
            vec![-1.0, 1e9, 1e9, 1e9, 1e9],
        ];
        let config = EvaluationConfig::new(date, 60);
        let results = evaluate_policies_on_sample_paths(
            &city,
            &vaccines,
            &tiers(),
            &thresholds,
            &["0_1".to_string()],
            &config,
            &store,
            None,
        )
        .unwrap();
        assert_eq!(results.len(), 2);
        for result in &results {
            assert_eq!(result.path_id, "0_1");
            assert_eq!(result.tier_history.len(), 60);
            assert!(result.tier_history[..30].iter().all(Option::is_none));
            assert!(result.feasible.is_some());
        }
        // The strictest tier costs 5 per day, the loosest 1.
        crate::assert_almost_eq!(results[0].cost.unwrap(), 150.0, 1e-9);
        crate::assert_almost_eq!(results[1].cost.unwrap(), 30.0, 1e-9);
        assert_eq!(results[1].policy, "-1_1000000000_1000000000_1000000000_1000000000");
    }

    #[test]
    fn horizon_must_follow_the_checkpoint() {
        let city = city();
        let vaccines = VaccinationProgram::none();
        let mut store = MemoryCheckpointStore::default();
        let date = stored_path(&mut store);
        let config = EvaluationConfig::new(date, 30);
        let res = evaluate_policies_on_sample_paths(
            &city,
            &vaccines,
            &tiers(),
            &[vec![-1.0, 0.0, 0.0, 0.0, 0.0]],
            &["0_1".to_string()],
            &config,
            &store,
            None,
        );
        assert!(matches!(res, Err(SimError::ConfigError(_))));
    }

    #[test]
    fn unknown_path_is_reported() {
        let city = city();
        let vaccines = VaccinationProgram::none();
        let store = MemoryCheckpointStore::default();
        let config = EvaluationConfig::new(city.calendar.date(30).unwrap(), 60);
        let res = evaluate_policies_on_sample_paths(
            &city,
            &vaccines,
            &tiers(),
            &[vec![-1.0, 0.0, 0.0, 0.0, 0.0]],
            &["7_7".to_string()],
            &config,
            &store,
            None,
        );
        assert!(matches!(res, Err(SimError::MissingCheckpoint(_))));
    }
}
