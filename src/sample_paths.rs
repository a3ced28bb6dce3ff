//! Accept/reject generation of sample paths that agree with historical hospital data.
//!
//! A path is simulated in blocks ending at ascending checkpoint days. After each block the
//! fit statistic is checked; a path falling below the cutoff is dropped at once and a new
//! one is started with a fresh parameter draw from the same generator stream. A path that
//! passes every checkpoint is accepted and its snapshot at each checkpoint is saved.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointStore;
use crate::city::City;
use crate::error::SimError;
use crate::log::{debug, info, warn};
use crate::progress::AcceptedPathsProgress;
use crate::random::SimRng;
use crate::replication::Replication;
use crate::report::write_report;
use crate::vaccine::VaccinationProgram;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SamplePathConfig {
    /// Minimum fit statistic at every checkpoint
    pub fit_cutoff: f64,
    /// Number of paths to accept
    pub target_accepted: usize,
    /// Ascending days at which the fit is checked and snapshots are taken
    pub checkpoints: Vec<usize>,
    /// Shard identifier, used in path identifiers
    pub rank: usize,
    /// Attempts between two diagnostics exports
    pub diagnostics_every: usize,
    pub max_attempts: Option<usize>,
    pub show_progress: bool,
}

impl SamplePathConfig {
    #[must_use]
    pub fn new(fit_cutoff: f64, target_accepted: usize, checkpoints: Vec<usize>) -> Self {
        SamplePathConfig {
            fit_cutoff,
            target_accepted,
            checkpoints,
            rank: 0,
            diagnostics_every: 1000,
            max_attempts: None,
            show_progress: false,
        }
    }

    /// # Errors
    ///
    /// Returns `SimError::ConfigError` for empty or unordered checkpoints, checkpoints past
    /// the calendar or past the fixed-transmission period, or a zero diagnostics interval.
    pub fn validate(&self, city: &City) -> Result<(), SimError> {
        if self.checkpoints.is_empty() {
            return Err(SimError::ConfigError("no checkpoints given".to_string()));
        }
        if self.checkpoints.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SimError::ConfigError(format!(
                "checkpoints must be strictly increasing: {:?}",
                self.checkpoints
            )));
        }
        if self.checkpoints.iter().any(|t| *t >= city.calendar.len()) {
            return Err(SimError::ConfigError(format!(
                "checkpoints must fall inside the {}-day calendar",
                city.calendar.len()
            )));
        }
        // Paths run without a policy, so every simulated day must be fixed.
        let fixed = city.calendar.fixed_days();
        if let Some(last) = self.checkpoints.last().filter(|t| **t > fixed) {
            return Err(SimError::ConfigError(format!(
                "checkpoint {last} lies beyond the {fixed} days of fixed transmission"
            )));
        }
        if self.diagnostics_every == 0 {
            return Err(SimError::ConfigError(
                "diagnostics_every must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of an acceptance run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SamplePathSummary {
    /// Identifiers `{rank}_{n}` of the accepted paths
    pub accepted: Vec<String>,
    pub attempts: usize,
    /// Rejections at each checkpoint
    pub rejected_at_checkpoint: Vec<usize>,
    /// Fit statistic of every attempt where it was decided
    pub fit_values: Vec<f64>,
}

/// Receives the running bookkeeping of an acceptance run.
pub trait AcceptanceDiagnostics {
    /// # Errors
    ///
    /// Returns a `SimError` if the diagnostics cannot be exported.
    fn record(&mut self, rank: usize, summary: &SamplePathSummary) -> Result<(), SimError>;
}

/// Discards diagnostics.
pub struct NoDiagnostics;

impl AcceptanceDiagnostics for NoDiagnostics {
    fn record(&mut self, _rank: usize, _summary: &SamplePathSummary) -> Result<(), SimError> {
        Ok(())
    }
}

#[derive(Serialize)]
struct RejectionRow {
    checkpoint: usize,
    rejected: usize,
}

#[derive(Serialize)]
struct FitRow {
    attempt: usize,
    fit: f64,
}

/// Writes `{rank}_rejected_per_checkpoint.csv` and `{rank}_fit_values.csv`, overwriting
/// them at every export.
pub struct CsvDiagnostics {
    dir: PathBuf,
    checkpoints: Vec<usize>,
}

impl CsvDiagnostics {
    #[must_use]
    pub fn new(dir: &Path, checkpoints: &[usize]) -> Self {
        CsvDiagnostics {
            dir: dir.to_path_buf(),
            checkpoints: checkpoints.to_vec(),
        }
    }
}

impl AcceptanceDiagnostics for CsvDiagnostics {
    fn record(&mut self, rank: usize, summary: &SamplePathSummary) -> Result<(), SimError> {
        let rejections: Vec<RejectionRow> = self
            .checkpoints
            .iter()
            .zip(&summary.rejected_at_checkpoint)
            .map(|(&checkpoint, &rejected)| RejectionRow {
                checkpoint,
                rejected,
            })
            .collect();
        write_report(
            &self.dir.join(format!("{rank}_rejected_per_checkpoint.csv")),
            &rejections,
        )?;
        let fits: Vec<FitRow> = summary
            .fit_values
            .iter()
            .enumerate()
            .map(|(i, &fit)| FitRow {
                attempt: i + 1,
                fit,
            })
            .collect();
        write_report(&self.dir.join(format!("{rank}_fit_values.csv")), &fits)
    }
}

/// Generates `config.target_accepted` accepted paths, saving their checkpoints to `store`.
///
/// Stops early with a warning when `config.max_attempts` is reached.
///
/// # Errors
///
/// Returns a `SimError` for an invalid configuration or when simulation, persistence or
/// diagnostics fail.
pub fn get_sample_paths(
    city: &City,
    vaccines: &VaccinationProgram,
    config: &SamplePathConfig,
    rng: Option<SimRng>,
    store: &mut dyn CheckpointStore,
    diagnostics: &mut dyn AcceptanceDiagnostics,
) -> Result<SamplePathSummary, SimError> {
    config.validate(city)?;
    let rank = config.rank;
    let dates = config
        .checkpoints
        .iter()
        .map(|&t| city.calendar.date(t))
        .collect::<Result<Vec<_>, _>>()?;

    let mut summary = SamplePathSummary {
        rejected_at_checkpoint: vec![0; config.checkpoints.len()],
        ..SamplePathSummary::default()
    };
    let progress = AcceptedPathsProgress::new(config.target_accepted, config.show_progress);
    let mut rep = Replication::new(city, vaccines, rng)?;

    while summary.accepted.len() < config.target_accepted {
        if config
            .max_attempts
            .is_some_and(|max| summary.attempts >= max)
        {
            warn!(
                "rank {rank}: stopping after {} attempts with {} of {} paths accepted",
                summary.attempts,
                summary.accepted.len(),
                config.target_accepted
            );
            break;
        }
        summary.attempts += 1;

        let mut snapshots = Vec::with_capacity(config.checkpoints.len());
        let mut last_fit = f64::NAN;
        let mut rejected = false;
        for (i, &checkpoint) in config.checkpoints.iter().enumerate() {
            rep.advance_to(checkpoint)?;
            let fit = rep.compute_fit_statistic();
            last_fit = fit;
            if fit < config.fit_cutoff {
                debug!(
                    "rank {rank} attempt {}: rejected at day {checkpoint} with fit {fit:.4}",
                    summary.attempts
                );
                summary.rejected_at_checkpoint[i] += 1;
                rejected = true;
                break;
            }
            debug!(
                "rank {rank} attempt {}: passed day {checkpoint} with fit {fit:.4}",
                summary.attempts
            );
            snapshots.push(rep.snapshot());
        }
        summary.fit_values.push(last_fit);

        if !rejected {
            let path_id = format!("{rank}_{}", summary.accepted.len() + 1);
            for (date, snapshot) in dates.iter().zip(&snapshots) {
                store.save(&path_id, *date, snapshot)?;
            }
            info!(
                "rank {rank}: accepted sample path {path_id} (attempt {}, fit {last_fit:.4})",
                summary.attempts
            );
            summary.accepted.push(path_id);
            progress.update(summary.accepted.len());
        }

        rep = Replication::new(city, vaccines, rep.into_rng())?;

        if summary.attempts % config.diagnostics_every == 0 {
            diagnostics.record(rank, &summary)?;
        }
    }
    Ok(summary)
}
