//! Command line front end.
//!
//! `sample-paths` runs the acceptance procedure on one thread per rank and stores the
//! accepted checkpoints; `evaluate` shards a grid of threshold policies over the ranks and
//! evaluates each shard on the stored paths. Rank `r` draws from a generator seeded with
//! `random_seed + r`.

use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{anyhow, Context as _, Result};
use clap::{Args, Parser, Subcommand};

use crate::checkpoint::JsonCheckpointStore;
use crate::city::City;
use crate::config::load_json;
use crate::error::SimError;
use crate::evaluation::{evaluate_policies_on_sample_paths, EvaluationConfig, PolicyEvaluation};
use crate::log::{info, set_log_level, LevelFilter};
use crate::policy::{MonitoredStatistic, TierInfo};
use crate::random::rng_for_rank;
use crate::report::write_report;
use crate::sample_paths::{
    get_sample_paths, AcceptanceDiagnostics, CsvDiagnostics, SamplePathConfig, SamplePathSummary,
};
use crate::thresholds::{thresholds_generator, StageRange};
use crate::vaccine::{VaccinationProgram, VaccineConfig};

/// Arguments shared by every subcommand
#[derive(Args, Debug)]
pub struct BaseArgs {
    /// Random seed; rank `r` uses `random_seed + r`
    #[arg(short, long, default_value = "0")]
    pub random_seed: u64,

    /// City configuration file
    #[arg(short, long)]
    pub city: PathBuf,

    /// Optional vaccination program file
    #[arg(short, long)]
    pub vaccines: Option<PathBuf>,

    /// Directory for checkpoints and reports
    #[arg(short, long, default_value = "output")]
    pub output_dir: PathBuf,

    /// Number of ranks, each run on its own thread
    #[arg(short, long, default_value = "1")]
    pub workers: usize,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "off", value_parser = parse_log_level)]
    pub log_level: LevelFilter,
}

fn parse_log_level(level: &str) -> Result<LevelFilter, String> {
    level
        .parse()
        .map_err(|_| format!("unknown log level `{level}`"))
}

#[derive(Args, Debug)]
pub struct SamplePathArgs {
    /// Minimum fit statistic at every checkpoint
    #[arg(long, default_value = "0.75")]
    pub fit_cutoff: f64,

    /// Paths to accept per rank
    #[arg(long, default_value = "1")]
    pub target: usize,

    /// Comma-separated ascending checkpoint days
    #[arg(long, value_delimiter = ',', required = true)]
    pub checkpoints: Vec<usize>,

    /// Stop a rank after this many attempts
    #[arg(long)]
    pub max_attempts: Option<usize>,

    /// Attempts between diagnostics exports
    #[arg(long, default_value = "1000")]
    pub diagnostics_every: usize,

    /// Show a progress bar for rank 0
    #[arg(long)]
    pub progress: bool,
}

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Tier definitions
    #[arg(short, long)]
    pub tiers: PathBuf,

    /// JSON list of threshold tuples
    #[arg(long, conflicts_with = "stages", required_unless_present = "stages")]
    pub thresholds: Option<PathBuf>,

    /// JSON list of stage ranges generating the threshold grid
    #[arg(long)]
    pub stages: Option<PathBuf>,

    /// Day of the checkpoint to start from
    #[arg(long)]
    pub checkpoint_day: usize,

    /// Day to simulate up to (exclusive)
    #[arg(long)]
    pub end_time: usize,

    /// Comma-separated path identifiers; all stored paths by default
    #[arg(long, value_delimiter = ',')]
    pub paths: Vec<String>,

    /// Statistic monitored by the policies
    #[arg(long, value_enum, default_value_t = MonitoredStatistic::Admissions)]
    pub statistic: MonitoredStatistic,

    /// Moving-average window of the monitored statistic
    #[arg(long, default_value = "7")]
    pub window: usize,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate sample paths that fit the historical hospital census
    SamplePaths(SamplePathArgs),
    /// Evaluate threshold policies on stored sample paths
    Evaluate(EvaluateArgs),
}

#[derive(Parser, Debug)]
#[command(name = "tiered-seir")]
#[command(about = "Stochastic SEIR simulation with staged-alert policies")]
pub struct Cli {
    #[command(flatten)]
    pub base: BaseArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Parses the process arguments and runs the chosen subcommand.
///
/// # Errors
///
/// Returns an error if an input cannot be loaded or a rank fails.
pub fn main() -> Result<()> {
    run(Cli::parse())
}

/// # Errors
///
/// Returns an error if an input cannot be loaded or a rank fails.
pub fn run(cli: Cli) -> Result<()> {
    set_log_level(cli.base.log_level);
    if cli.base.workers == 0 {
        return Err(anyhow!("at least one worker is required"));
    }

    let city = City::load(&cli.base.city)
        .with_context(|| format!("loading city from {}", cli.base.city.display()))?;
    let vaccines = match &cli.base.vaccines {
        Some(path) => {
            let config: VaccineConfig = load_json(path)
                .with_context(|| format!("loading vaccines from {}", path.display()))?;
            VaccinationProgram::new(&config, city.shape())?
        }
        None => VaccinationProgram::none(),
    };
    info!(
        "loaded city {} ({} days, {} substeps per day)",
        city.name,
        city.calendar.len(),
        city.substeps
    );

    match &cli.command {
        Commands::SamplePaths(args) => run_sample_paths(&cli.base, args, &city, &vaccines),
        Commands::Evaluate(args) => run_evaluate(&cli.base, args, &city, &vaccines),
    }
}

fn checkpoint_dir(output_dir: &Path) -> PathBuf {
    output_dir.join("paths")
}

fn join_ranks<T>(handles: Vec<thread::ScopedJoinHandle<'_, Result<T, SimError>>>) -> Result<Vec<T>> {
    handles
        .into_iter()
        .enumerate()
        .map(|(rank, handle)| {
            handle
                .join()
                .map_err(|_| anyhow!("rank {rank} panicked"))?
                .with_context(|| format!("rank {rank} failed"))
        })
        .collect()
}

fn run_sample_paths(
    base: &BaseArgs,
    args: &SamplePathArgs,
    city: &City,
    vaccines: &VaccinationProgram,
) -> Result<()> {
    let paths_dir = checkpoint_dir(&base.output_dir);
    let diagnostics_dir = base.output_dir.join("diagnostics");

    let summaries: Vec<SamplePathSummary> = thread::scope(|s| {
        let handles = (0..base.workers)
            .map(|rank| {
                let paths_dir = &paths_dir;
                let diagnostics_dir = &diagnostics_dir;
                s.spawn(move || {
                    let config = SamplePathConfig {
                        rank,
                        diagnostics_every: args.diagnostics_every,
                        max_attempts: args.max_attempts,
                        show_progress: args.progress && rank == 0,
                        ..SamplePathConfig::new(args.fit_cutoff, args.target, args.checkpoints.clone())
                    };
                    let mut store = JsonCheckpointStore::new(paths_dir)?;
                    let mut diagnostics = CsvDiagnostics::new(diagnostics_dir, &config.checkpoints);
                    let summary = get_sample_paths(
                        city,
                        vaccines,
                        &config,
                        Some(rng_for_rank(base.random_seed, rank)),
                        &mut store,
                        &mut diagnostics,
                    )?;
                    diagnostics.record(rank, &summary)?;
                    Ok(summary)
                })
            })
            .collect();
        join_ranks(handles)
    })?;

    let accepted: usize = summaries.iter().map(|s| s.accepted.len()).sum();
    let attempts: usize = summaries.iter().map(|s| s.attempts).sum();
    info!(
        "accepted {accepted} sample paths in {attempts} attempts; checkpoints in {}",
        paths_dir.display()
    );
    Ok(())
}

fn load_thresholds(args: &EvaluateArgs) -> Result<Vec<Vec<f64>>> {
    if let Some(path) = &args.thresholds {
        return Ok(load_json(path)
            .with_context(|| format!("loading thresholds from {}", path.display()))?);
    }
    let path = args
        .stages
        .as_ref()
        .ok_or_else(|| anyhow!("either --thresholds or --stages is required"))?;
    let stages: Vec<StageRange> =
        load_json(path).with_context(|| format!("loading stages from {}", path.display()))?;
    Ok(thresholds_generator(&stages)?)
}

fn run_evaluate(
    base: &BaseArgs,
    args: &EvaluateArgs,
    city: &City,
    vaccines: &VaccinationProgram,
) -> Result<()> {
    let tiers = TierInfo::load(&args.tiers)
        .with_context(|| format!("loading tiers from {}", args.tiers.display()))?;
    let thresholds = load_thresholds(args)?;
    let checkpoint_date = city.calendar.date(args.checkpoint_day)?;
    let store = JsonCheckpointStore::new(&checkpoint_dir(&base.output_dir))?;
    let path_ids = if args.paths.is_empty() {
        store.path_ids(checkpoint_date)?
    } else {
        args.paths.clone()
    };
    if path_ids.is_empty() {
        return Err(anyhow!("no sample paths stored for {checkpoint_date}"));
    }
    info!(
        "evaluating {} policies on {} sample paths from {checkpoint_date}",
        thresholds.len(),
        path_ids.len()
    );

    thread::scope(|s| {
        let handles = (0..base.workers)
            .map(|rank| {
                let (tiers, thresholds, path_ids, store) = (&tiers, &thresholds, &path_ids, &store);
                s.spawn(move || {
                    let config = EvaluationConfig {
                        rank,
                        workers: base.workers,
                        statistic: args.statistic,
                        window: args.window,
                        ..EvaluationConfig::new(checkpoint_date, args.end_time)
                    };
                    let results: Vec<PolicyEvaluation> = evaluate_policies_on_sample_paths(
                        city,
                        vaccines,
                        &tiers.tiers,
                        thresholds,
                        path_ids,
                        &config,
                        store,
                        Some(rng_for_rank(base.random_seed, rank)),
                    )?;
                    write_report(
                        &base.output_dir.join(format!("{rank}_evaluations.csv")),
                        &results,
                    )
                })
            })
            .collect();
        join_ranks(handles)
    })?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_sample_path_arguments() {
        let cli = Cli::try_parse_from([
            "tiered-seir",
            "--city",
            "city.json",
            "--workers",
            "2",
            "sample-paths",
            "--fit-cutoff=-0.5",
            "--target",
            "4",
            "--checkpoints",
            "10,20,30",
        ])
        .unwrap();
        assert_eq!(cli.base.workers, 2);
        assert_eq!(cli.base.log_level, LevelFilter::Off);
        assert!(parse_log_level("debug").is_ok());
        assert!(parse_log_level("chatty").is_err());
        match cli.command {
            Commands::SamplePaths(args) => {
                assert_eq!(args.checkpoints, vec![10, 20, 30]);
                assert_eq!(args.target, 4);
                assert!((args.fit_cutoff + 0.5).abs() < 1e-12);
            }
            Commands::Evaluate(_) => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn evaluate_needs_thresholds_or_stages() {
        let res = Cli::try_parse_from([
            "tiered-seir",
            "--city",
            "city.json",
            "evaluate",
            "--tiers",
            "tiers.json",
            "--checkpoint-day",
            "30",
            "--end-time",
            "60",
        ]);
        assert!(res.is_err());
    }
}
