//! Intervention tiers and the policies that choose between them.
//!
//! A [`Policy`] observes recent simulated history and picks the tier in force for the
//! upcoming day, appending it to a day-indexed history. Days whose transmission reduction
//! is fixed by historical data bypass the decision and are recorded as `None`.

use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::config::load_json;
use crate::error::SimError;
use crate::log::debug;

fn one_day() -> usize {
    1
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub name: String,
    pub transmission_reduction: f64,
    #[serde(default)]
    pub cocooning: f64,
    #[serde(default)]
    pub school_closure: bool,
    pub daily_cost: f64,
    /// Days the tier stays in force before the policy may relax it
    #[serde(default = "one_day")]
    pub min_enforcing_time: usize,
}

/// Ordered tiers, from least to most restrictive.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TierInfo {
    pub tiers: Vec<Tier>,
}

impl TierInfo {
    /// # Errors
    ///
    /// Returns a `SimError` if the file cannot be read or the tiers are invalid.
    pub fn load(path: &Path) -> Result<TierInfo, SimError> {
        let info: TierInfo = load_json(path)?;
        info.validate()?;
        Ok(info)
    }

    /// # Errors
    ///
    /// Returns `SimError::ConfigError` for an empty tier list or out-of-range values.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.tiers.is_empty() {
            return Err(SimError::ConfigError("at least one tier is required".to_string()));
        }
        for tier in &self.tiers {
            if !(0.0..=1.0).contains(&tier.transmission_reduction)
                || !(0.0..=1.0).contains(&tier.cocooning)
            {
                return Err(SimError::ConfigError(format!(
                    "tier {}: reductions must lie in [0, 1]",
                    tier.name
                )));
            }
            if tier.min_enforcing_time == 0 {
                return Err(SimError::ConfigError(format!(
                    "tier {}: min_enforcing_time must be at least one day",
                    tier.name
                )));
            }
        }
        Ok(())
    }
}

/// Aggregated daily histories a policy may look at. Entry `i` covers day `i`.
#[derive(Clone, Copy, Debug)]
pub struct MonitoredHistory<'a> {
    pub admissions: &'a [Array2<f64>],
    pub hospital_census: &'a [Array2<f64>],
    pub icu_census: &'a [Array2<f64>],
    pub symptomatic: &'a [Array2<f64>],
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MonitoredStatistic {
    /// New hospital admissions
    #[default]
    Admissions,
    HospitalCensus,
    IcuCensus,
    /// New symptomatic cases
    SymptomaticCases,
}

impl MonitoredStatistic {
    /// Mean over the `window` days before `t` of the statistic summed over age and risk
    /// groups. Zero when nothing has been simulated yet.
    #[must_use]
    pub fn moving_average(self, history: &MonitoredHistory<'_>, t: usize, window: usize) -> f64 {
        let series = match self {
            MonitoredStatistic::Admissions => history.admissions,
            MonitoredStatistic::HospitalCensus => history.hospital_census,
            MonitoredStatistic::IcuCensus => history.icu_census,
            MonitoredStatistic::SymptomaticCases => history.symptomatic,
        };
        let end = t.min(series.len());
        let start = end.saturating_sub(window.max(1));
        let days = &series[start..end];
        if days.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = days.len() as f64;
        days.iter().map(Array2::sum).sum::<f64>() / n
    }
}

pub trait Policy {
    fn tiers(&self) -> &[Tier];

    /// Tier in force on each day so far; `None` for days replaying history.
    fn tier_history(&self) -> &[Option<usize>];

    /// Decides the tier for day `t` and records it.
    fn choose_tier(&mut self, t: usize, history: &MonitoredHistory<'_>) -> usize;

    /// Records that day `t` used a fixed historical transmission reduction.
    fn record_fixed_day(&mut self, t: usize);

    /// Clears the tier history.
    fn reset(&mut self);

    /// Stable name used in reports.
    fn identifier(&self) -> String;
}

/// Selects the tier whose threshold is the highest one not exceeding the monitored
/// statistic.
#[derive(Clone, Debug)]
pub struct ThresholdPolicy {
    tiers: Vec<Tier>,
    thresholds: Vec<f64>,
    statistic: MonitoredStatistic,
    window: usize,
    tier_history: Vec<Option<usize>>,
}

impl ThresholdPolicy {
    /// # Errors
    ///
    /// Returns `SimError::ConfigError` unless there is one threshold per tier, the first
    /// is `-1` and they are non-decreasing.
    pub fn new(tiers: Vec<Tier>, thresholds: Vec<f64>) -> Result<ThresholdPolicy, SimError> {
        if tiers.is_empty() || thresholds.len() != tiers.len() {
            return Err(SimError::ConfigError(format!(
                "{} thresholds given for {} tiers",
                thresholds.len(),
                tiers.len()
            )));
        }
        if thresholds[0] != -1.0 {
            return Err(SimError::ConfigError(
                "the first threshold must be -1".to_string(),
            ));
        }
        if thresholds.windows(2).any(|w| w[1] < w[0]) {
            return Err(SimError::ConfigError(format!(
                "thresholds must be non-decreasing: {thresholds:?}"
            )));
        }
        Ok(ThresholdPolicy {
            tiers,
            thresholds,
            statistic: MonitoredStatistic::default(),
            window: 7,
            tier_history: Vec::new(),
        })
    }

    #[must_use]
    pub fn with_statistic(mut self, statistic: MonitoredStatistic, window: usize) -> Self {
        self.statistic = statistic;
        self.window = window.max(1);
        self
    }

    #[must_use]
    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    /// Tier for a statistic value `x`, ignoring hysteresis. Equal thresholds resolve to the
    /// stricter tier.
    #[must_use]
    pub fn tier_for(&self, x: f64) -> usize {
        self.thresholds
            .iter()
            .rposition(|threshold| *threshold <= x)
            .unwrap_or(0)
    }

    /// The tier in force before day `t` and for how many consecutive days.
    fn current_tier(&self) -> Option<(usize, usize)> {
        let tier = self.tier_history.iter().rev().find_map(|entry| *entry)?;
        let days = self
            .tier_history
            .iter()
            .rev()
            .skip_while(|entry| entry.is_none())
            .take_while(|entry| **entry == Some(tier))
            .count();
        Some((tier, days))
    }
}

impl Policy for ThresholdPolicy {
    fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    fn tier_history(&self) -> &[Option<usize>] {
        &self.tier_history
    }

    fn choose_tier(&mut self, t: usize, history: &MonitoredHistory<'_>) -> usize {
        self.tier_history.resize(t, None);
        let x = self.statistic.moving_average(history, t, self.window);
        let target = self.tier_for(x);
        let tier = match self.current_tier() {
            Some((current, days))
                if target < current && days < self.tiers[current].min_enforcing_time =>
            {
                current
            }
            Some((current, _)) if current != target => {
                debug!(
                    "day {t}: tier {} -> {} (statistic {x:.2})",
                    self.tiers[current].name, self.tiers[target].name
                );
                target
            }
            _ => target,
        };
        self.tier_history.push(Some(tier));
        tier
    }

    fn record_fixed_day(&mut self, t: usize) {
        self.tier_history.resize(t, None);
        self.tier_history.push(None);
    }

    fn reset(&mut self) {
        self.tier_history.clear();
    }

    fn identifier(&self) -> String {
        self.thresholds
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("_")
    }
}
