//! Epidemiological parameters.
//!
//! [`EpiConfig`] is the configured description, some of whose rates are probability
//! distributions. [`EpiParams`] is one draw from it, fixed for the lifetime of a
//! replication. [`EffectiveParams`] is what the transition engine consumes on a given day:
//! it is recomputed from the immutable draw, the variant state and the ICU adjustment
//! window rather than by mutating the draw.

use ndarray::Array2;
use rand::distr::Uniform;
use rand_distr::{Distribution, Triangular};
use serde::{Deserialize, Serialize};

use crate::config::{age_column, to_grid};
use crate::error::SimError;
use crate::random::SimRng;
use crate::variants::VariantMultipliers;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "distribution", rename_all = "snake_case")]
pub enum ParameterDistribution {
    Constant { value: f64 },
    Uniform { low: f64, high: f64 },
    Triangular { low: f64, mode: f64, high: f64 },
}

impl ParameterDistribution {
    #[must_use]
    pub fn mean(&self) -> f64 {
        match *self {
            ParameterDistribution::Constant { value } => value,
            ParameterDistribution::Uniform { low, high } => (low + high) / 2.0,
            ParameterDistribution::Triangular { low, mode, high } => (low + mode + high) / 3.0,
        }
    }

    /// # Errors
    ///
    /// Returns `SimError::DistributionError` when the bounds are inverted or not finite.
    pub fn validate(&self, name: &str) -> Result<(), SimError> {
        let ok = match *self {
            ParameterDistribution::Constant { value } => value.is_finite(),
            ParameterDistribution::Uniform { low, high } => {
                low.is_finite() && high.is_finite() && low < high
            }
            ParameterDistribution::Triangular { low, mode, high } => {
                low.is_finite() && high.is_finite() && low <= mode && mode <= high && low < high
            }
        };
        if ok {
            Ok(())
        } else {
            Err(SimError::DistributionError(format!("{name}: {self:?}")))
        }
    }

    /// Draws a value, or returns the expectation when no generator is supplied.
    ///
    /// # Errors
    ///
    /// Returns `SimError::DistributionError` when `rand_distr` rejects the parameters.
    pub fn sample(&self, rng: Option<&mut SimRng>) -> Result<f64, SimError> {
        let Some(rng) = rng else {
            return Ok(self.mean());
        };
        match *self {
            ParameterDistribution::Constant { value } => Ok(value),
            ParameterDistribution::Uniform { low, high } => Uniform::new(low, high)
                .map(|d| d.sample(rng))
                .map_err(|e| SimError::DistributionError(e.to_string())),
            ParameterDistribution::Triangular { low, mode, high } => {
                Triangular::new(low, high, mode)
                    .map(|d| d.sample(rng))
                    .map_err(|e| SimError::DistributionError(e.to_string()))
            }
        }
    }
}

/// Contact matrices between age groups (A x A).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContactMatrices {
    pub all: Vec<Vec<f64>>,
    pub school: Vec<Vec<f64>>,
    pub work: Vec<Vec<f64>>,
}

fn default_one() -> f64 {
    1.0
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpiConfig {
    /// Transmission rate
    pub beta: ParameterDistribution,
    /// Rate of leaving the exposed compartment
    pub sigma_e: ParameterDistribution,
    /// Rates of leaving the pre-symptomatic compartments
    pub rho_a: ParameterDistribution,
    pub rho_y: ParameterDistribution,
    /// Recovery rates
    pub gamma_ia: ParameterDistribution,
    pub gamma_iy: ParameterDistribution,
    pub gamma_ih: ParameterDistribution,
    pub gamma_icu: ParameterDistribution,
    /// Proportion of infections that become symptomatic
    pub tau: f64,
    /// Symptomatic-to-hospital rate, per age group
    pub eta: Vec<f64>,
    /// Hospital-to-ICU rate, per age group
    pub eta_icu: Vec<f64>,
    /// ICU death rate, per age group
    pub mu_icu: Vec<f64>,
    /// Symptomatic hospitalization ratio, A x L
    pub yhr: Vec<Vec<f64>>,
    /// Hospital-to-ICU ratio, per age group
    pub hicur: Vec<f64>,
    /// ICU fatality ratio, per age group
    pub icufr: Vec<f64>,
    /// Share of hospitalizations admitted to a general ward rather than straight to ICU
    pub p_ih: f64,
    /// Share of non-hospitalized symptomatic exits that are deaths at home
    #[serde(default)]
    pub alpha_iyd: f64,
    /// Relative infectiousness
    pub omega_ia: f64,
    #[serde(default = "default_one")]
    pub omega_iy: f64,
    /// Relative infectiousness of the pre-symptomatic, per age group
    pub omega_p: Vec<f64>,
    /// Base daily rate of immune escape once a variant circulates
    #[serde(default)]
    pub immune_evasion: f64,
}

impl EpiConfig {
    /// # Errors
    ///
    /// Returns a `SimError` for malformed distributions, shapes or probabilities.
    pub fn validate(&self, shape: (usize, usize)) -> Result<(), SimError> {
        for (name, dist) in self.distributions() {
            dist.validate(name)?;
        }
        for (name, p) in [("tau", self.tau), ("p_ih", self.p_ih), ("alpha_iyd", self.alpha_iyd)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(SimError::ConfigError(format!("{name} must lie in [0, 1]")));
            }
        }
        to_grid("yhr", &self.yhr, shape)?;
        for (name, values) in [
            ("eta", &self.eta),
            ("eta_icu", &self.eta_icu),
            ("mu_icu", &self.mu_icu),
            ("hicur", &self.hicur),
            ("icufr", &self.icufr),
            ("omega_p", &self.omega_p),
        ] {
            age_column(name, values, shape)?;
        }
        Ok(())
    }

    // Draw order is part of reproducibility: a seed always maps to the same parameters.
    fn distributions(&self) -> [(&'static str, &ParameterDistribution); 8] {
        [
            ("beta", &self.beta),
            ("sigma_e", &self.sigma_e),
            ("rho_a", &self.rho_a),
            ("rho_y", &self.rho_y),
            ("gamma_ia", &self.gamma_ia),
            ("gamma_iy", &self.gamma_iy),
            ("gamma_ih", &self.gamma_ih),
            ("gamma_icu", &self.gamma_icu),
        ]
    }
}

/// One draw of the epidemiological parameters. Immutable after sampling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpiParams {
    pub beta: f64,
    pub sigma_e: f64,
    pub rho_a: f64,
    pub rho_y: f64,
    pub gamma_ia: f64,
    pub gamma_iy: f64,
    pub gamma_ih: f64,
    pub gamma_icu: f64,
    pub tau: f64,
    pub eta: Array2<f64>,
    pub eta_icu: Array2<f64>,
    pub mu_icu: Array2<f64>,
    pub yhr: Array2<f64>,
    pub hicur: Array2<f64>,
    pub icufr: Array2<f64>,
    pub p_ih: f64,
    pub alpha_iyd: f64,
    pub omega_ia: f64,
    pub omega_iy: f64,
    pub omega_p: Array2<f64>,
    pub immune_evasion: f64,
}

impl EpiParams {
    /// Samples every random parameter from `config`, using expectations if `rng` is `None`.
    ///
    /// # Errors
    ///
    /// Returns a `SimError` if the configuration is malformed.
    pub fn sample(
        config: &EpiConfig,
        shape: (usize, usize),
        mut rng: Option<&mut SimRng>,
    ) -> Result<EpiParams, SimError> {
        let mut draws = [0.0; 8];
        for (slot, (_, dist)) in draws.iter_mut().zip(config.distributions()) {
            *slot = dist.sample(rng.as_deref_mut())?;
        }
        let [beta, sigma_e, rho_a, rho_y, gamma_ia, gamma_iy, gamma_ih, gamma_icu] = draws;
        Ok(EpiParams {
            beta,
            sigma_e,
            rho_a,
            rho_y,
            gamma_ia,
            gamma_iy,
            gamma_ih,
            gamma_icu,
            tau: config.tau,
            eta: age_column("eta", &config.eta, shape)?,
            eta_icu: age_column("eta_icu", &config.eta_icu, shape)?,
            mu_icu: age_column("mu_icu", &config.mu_icu, shape)?,
            yhr: to_grid("yhr", &config.yhr, shape)?,
            hicur: age_column("hicur", &config.hicur, shape)?,
            icufr: age_column("icufr", &config.icufr, shape)?,
            p_ih: config.p_ih,
            alpha_iyd: config.alpha_iyd,
            omega_ia: config.omega_ia,
            omega_iy: config.omega_iy,
            omega_p: age_column("omega_p", &config.omega_p, shape)?,
            immune_evasion: config.immune_evasion,
        })
    }

    /// Derives the parameters in effect for one day. `icu_ratio_scale` multiplies the
    /// hospital-to-ICU ratio inside the ICU adjustment window.
    #[must_use]
    pub fn effective(
        &self,
        variant: Option<&VariantMultipliers>,
        icu_ratio_scale: f64,
    ) -> EffectiveParams {
        let neutral = VariantMultipliers::default();
        let m = variant.unwrap_or(&neutral);

        let yhr = (&self.yhr * m.hospitalization).mapv(|x| x.min(1.0));
        let hicur = (&self.hicur * (m.icu * icu_ratio_scale)).mapv(|x| x.min(1.0));
        let icufr = (&self.icufr * m.death).mapv(|x| x.min(1.0));

        let gamma_iy = self.gamma_iy;
        let gamma_ih = self.gamma_ih;
        let gamma_icu = self.gamma_icu;
        // Competing-risk fractions reproducing the observed ratios.
        let pi = ndarray::Zip::from(&yhr)
            .and(&self.eta)
            .map_collect(|&r, &eta| competing_fraction(r, gamma_iy, eta));
        let nu = ndarray::Zip::from(&hicur)
            .and(&self.eta_icu)
            .map_collect(|&r, &eta_icu| competing_fraction(r, gamma_ih, eta_icu));
        let nu_icu = ndarray::Zip::from(&icufr)
            .and(&self.mu_icu)
            .map_collect(|&r, &mu| competing_fraction(r, gamma_icu, mu));

        EffectiveParams {
            beta: self.beta * m.beta,
            sigma_e: self.sigma_e * m.sigma_e,
            rho_a: self.rho_a,
            rho_y: self.rho_y,
            gamma_ia: self.gamma_ia,
            gamma_iy,
            gamma_ih,
            gamma_icu,
            tau: self.tau,
            eta: self.eta.clone(),
            eta_icu: self.eta_icu.clone(),
            mu_icu: self.mu_icu.clone(),
            pi,
            nu,
            nu_icu,
            p_ih: self.p_ih,
            alpha_iyd: self.alpha_iyd,
            omega_ia: self.omega_ia,
            omega_iy: self.omega_iy,
            omega_pa: &self.omega_p * self.omega_ia,
            omega_py: &self.omega_p * self.omega_iy,
        }
    }
}

/// `ratio * recovery / (exit + (recovery - exit) * ratio)`: the share of a compartment
/// that must take the `exit` route so that `ratio` of its members end up there when it
/// competes with recovery at rate `recovery`.
fn competing_fraction(ratio: f64, recovery: f64, exit: f64) -> f64 {
    let den = exit + (recovery - exit) * ratio;
    if den == 0.0 {
        0.0
    } else {
        (ratio * recovery / den).clamp(0.0, 1.0)
    }
}

/// Parameters in effect for a single simulated day.
#[derive(Clone, Debug, PartialEq)]
pub struct EffectiveParams {
    pub beta: f64,
    pub sigma_e: f64,
    pub rho_a: f64,
    pub rho_y: f64,
    pub gamma_ia: f64,
    pub gamma_iy: f64,
    pub gamma_ih: f64,
    pub gamma_icu: f64,
    pub tau: f64,
    pub eta: Array2<f64>,
    pub eta_icu: Array2<f64>,
    pub mu_icu: Array2<f64>,
    /// Share of symptomatic cases that are hospitalized
    pub pi: Array2<f64>,
    /// Share of ward patients that move to ICU
    pub nu: Array2<f64>,
    /// Share of ICU patients that die
    pub nu_icu: Array2<f64>,
    pub p_ih: f64,
    pub alpha_iyd: f64,
    pub omega_ia: f64,
    pub omega_iy: f64,
    pub omega_pa: Array2<f64>,
    pub omega_py: Array2<f64>,
}
