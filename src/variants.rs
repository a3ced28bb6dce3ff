//! Variant progression.
//!
//! Each variant has an introduction date and a daily prevalence curve starting on that
//! date. Its parameter multipliers and vaccine-effectiveness overrides are blended in
//! proportion to prevalence. Immune evasion only applies once the first variant has been
//! introduced.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::stratum::{StratumKind, VaccineReductions};

fn one() -> f64 {
    1.0
}

/// Multipliers applied to the base epidemiological parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariantMultipliers {
    #[serde(default = "one")]
    pub beta: f64,
    #[serde(default = "one")]
    pub sigma_e: f64,
    #[serde(default = "one")]
    pub hospitalization: f64,
    #[serde(default = "one")]
    pub icu: f64,
    #[serde(default = "one")]
    pub death: f64,
}

impl Default for VariantMultipliers {
    fn default() -> Self {
        VariantMultipliers {
            beta: 1.0,
            sigma_e: 1.0,
            hospitalization: 1.0,
            icu: 1.0,
            death: 1.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VariantConfig {
    pub name: String,
    pub start_date: NaiveDate,
    /// Share of circulating infections, one value per day since `start_date`. The last
    /// value is held afterwards.
    pub prevalence: Vec<f64>,
    #[serde(default)]
    pub multipliers: VariantMultipliers,
    /// Vaccine reductions against this variant, per stratum.
    #[serde(default)]
    pub vaccine: HashMap<StratumKind, VaccineReductions>,
}

/// Date range over which the base immune evasion rate is scaled.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImmuneEvasionWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub multiplier: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VariantPool {
    #[serde(default)]
    pub variants: Vec<VariantConfig>,
    #[serde(default)]
    pub immune_evasion_windows: Vec<ImmuneEvasionWindow>,
}

/// Variant state for one day.
#[derive(Clone, Debug, PartialEq)]
pub struct VariantEffect {
    pub multipliers: VariantMultipliers,
    /// Total prevalence of all introduced variants
    pub prevalence: f64,
    /// `(variant prevalence, reductions)` for every variant that overrides a stratum
    pub vaccine: HashMap<StratumKind, Vec<(f64, VaccineReductions)>>,
}

impl VariantEffect {
    /// Blends a stratum's base reductions with the variant overrides by prevalence.
    #[must_use]
    pub fn reductions_for(&self, kind: StratumKind, base: &VaccineReductions) -> VaccineReductions {
        match self.vaccine.get(&kind) {
            None => base.clone(),
            Some(overrides) => base.blend(overrides),
        }
    }
}

impl VariantConfig {
    fn prevalence_on(&self, date: NaiveDate) -> f64 {
        let Ok(days) = usize::try_from((date - self.start_date).num_days()) else {
            return 0.0;
        };
        self.prevalence
            .get(days)
            .or_else(|| self.prevalence.last())
            .copied()
            .unwrap_or(0.0)
    }
}

impl VariantPool {
    /// # Errors
    ///
    /// Returns `SimError::ConfigError` for prevalences outside `[0, 1]`, combined
    /// prevalences above one, or inverted evasion windows.
    pub fn validate(&self) -> Result<(), SimError> {
        for variant in &self.variants {
            if variant.prevalence.iter().any(|p| !(0.0..=1.0).contains(p)) {
                return Err(SimError::ConfigError(format!(
                    "prevalence of variant {} must lie in [0, 1]",
                    variant.name
                )));
            }
        }
        let longest = self
            .variants
            .iter()
            .map(|v| v.prevalence.len())
            .max()
            .unwrap_or(0);
        if let Some(first) = self.variant_start() {
            for offset in 0..longest + self.variants.len() {
                let date = first + chrono::Duration::days(offset as i64);
                let total: f64 = self.variants.iter().map(|v| v.prevalence_on(date)).sum();
                if total > 1.0 + 1e-9 {
                    return Err(SimError::ConfigError(format!(
                        "combined variant prevalence exceeds one on {date}"
                    )));
                }
            }
        }
        if let Some(window) = self.immune_evasion_windows.iter().find(|w| w.end < w.start) {
            return Err(SimError::ConfigError(format!(
                "immune evasion window starting {} ends before it starts",
                window.start
            )));
        }
        Ok(())
    }

    /// Earliest introduction date, if any variant is configured.
    #[must_use]
    pub fn variant_start(&self) -> Option<NaiveDate> {
        self.variants.iter().map(|v| v.start_date).min()
    }

    /// Variant state on `date`, or `None` before the first introduction.
    #[must_use]
    pub fn effect(&self, date: NaiveDate) -> Option<VariantEffect> {
        if self.variant_start()? > date {
            return None;
        }
        let mut multipliers = VariantMultipliers::default();
        let mut prevalence = 0.0;
        let mut vaccine: HashMap<StratumKind, Vec<(f64, VaccineReductions)>> = HashMap::new();
        for variant in &self.variants {
            let p = variant.prevalence_on(date);
            if p == 0.0 {
                continue;
            }
            prevalence += p;
            let m = &variant.multipliers;
            multipliers.beta += p * (m.beta - 1.0);
            multipliers.sigma_e += p * (m.sigma_e - 1.0);
            multipliers.hospitalization += p * (m.hospitalization - 1.0);
            multipliers.icu += p * (m.icu - 1.0);
            multipliers.death += p * (m.death - 1.0);
            for (kind, reductions) in &variant.vaccine {
                vaccine
                    .entry(*kind)
                    .or_default()
                    .push((p, reductions.clone()));
            }
        }
        Some(VariantEffect {
            multipliers,
            prevalence,
            vaccine,
        })
    }

    /// Immune evasion rate on `date`: zero before the first variant, the base rate scaled
    /// by any window covering `date` afterwards.
    #[must_use]
    pub fn immune_evasion(&self, base: f64, date: NaiveDate) -> f64 {
        match self.variant_start() {
            Some(start) if start <= date => self
                .immune_evasion_windows
                .iter()
                .find(|w| w.start <= date && date <= w.end)
                .map_or(base, |w| base * w.multiplier),
            _ => 0.0,
        }
    }
}
