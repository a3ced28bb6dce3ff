//! Population strata by vaccination status.
//!
//! A [`Stratum`] owns the day-boundary compartment values, the flow counters of the last
//! simulated day, and the within-day buffers the transition engine writes sub-step by
//! sub-step: one `(substeps + 1, A, L)` trajectory per compartment and one
//! `(substeps, A, L)` series per counter.

use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use strum::{EnumCount, EnumIter, IntoEnumIterator};

use crate::compartments::{Compartment, Compartments, Counter, Counters};
use crate::define_indexed_table;

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, EnumCount, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StratumKind {
    Unvaccinated,
    FirstDose,
    SecondDose,
    Waned,
}

impl StratumKind {
    /// Whether susceptibles of this stratum can lose immunity without infection.
    #[must_use]
    pub fn escapes_immunity(self) -> bool {
        matches!(self, StratumKind::FirstDose | StratumKind::SecondDose)
    }
}

define_indexed_table!(Strata, StratumKind);

/// Relative reductions granted by vaccination.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VaccineReductions {
    /// Susceptibility
    #[serde(default, rename = "beta_reduct")]
    pub beta: f64,
    /// Probability of symptoms
    #[serde(default, rename = "tau_reduct")]
    pub tau: f64,
    /// Probability of hospitalization
    #[serde(default, rename = "pi_reduct")]
    pub pi: f64,
    /// Infectiousness of breakthrough cases
    #[serde(default, rename = "infectiousness_reduct")]
    pub infectiousness: f64,
}

impl VaccineReductions {
    /// `(1 - Σ w) * self + Σ w * other` over `(w, other)` pairs, field by field.
    #[must_use]
    pub fn blend(&self, others: &[(f64, VaccineReductions)]) -> VaccineReductions {
        let share: f64 = others.iter().map(|(w, _)| w).sum();
        let mix = |field: fn(&VaccineReductions) -> f64| {
            (1.0 - share) * field(self)
                + others.iter().map(|(w, other)| w * field(other)).sum::<f64>()
        };
        VaccineReductions {
            beta: mix(|r| r.beta),
            tau: mix(|r| r.tau),
            pi: mix(|r| r.pi),
            infectiousness: mix(|r| r.infectiousness),
        }
    }

    /// # Errors
    ///
    /// Returns a description of the first reduction outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("beta_reduct", self.beta),
            ("tau_reduct", self.tau),
            ("pi_reduct", self.pi),
            ("infectiousness_reduct", self.infectiousness),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must lie in [0, 1], got {value}"));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Stratum {
    pub kind: StratumKind,
    state: Compartments<Array2<f64>>,
    tracking: Counters<Array2<f64>>,
    trajectory: Compartments<Array3<f64>>,
    flows: Counters<Array3<f64>>,
}

impl Stratum {
    #[must_use]
    pub fn new(kind: StratumKind, state: Compartments<Array2<f64>>, substeps: usize) -> Stratum {
        let shape = state[Compartment::S].dim();
        let mut stratum = Stratum {
            kind,
            state,
            tracking: Counters::zeros(shape),
            trajectory: Compartments::from_fn(|_| Array3::zeros((substeps + 1, shape.0, shape.1))),
            flows: Counters::from_fn(|_| Array3::zeros((substeps, shape.0, shape.1))),
        };
        stratum.open_day();
        stratum
    }

    /// An empty stratum.
    #[must_use]
    pub fn empty(kind: StratumKind, shape: (usize, usize), substeps: usize) -> Stratum {
        Stratum::new(kind, Compartments::zeros(shape), substeps)
    }

    #[must_use]
    pub fn substeps(&self) -> usize {
        self.flows[Counter::ToIY].len_of(Axis(0))
    }

    #[must_use]
    pub fn state(&self) -> &Compartments<Array2<f64>> {
        &self.state
    }

    #[must_use]
    pub fn tracking(&self) -> &Counters<Array2<f64>> {
        &self.tracking
    }

    /// Replaces the day-boundary values, as when resuming from a checkpoint.
    pub fn restore(&mut self, state: Compartments<Array2<f64>>, tracking: Counters<Array2<f64>>) {
        self.state = state;
        self.tracking = tracking;
        self.open_day();
    }

    /// Value of `compartment` at the start of sub-step `k`.
    #[must_use]
    pub fn at(&self, compartment: Compartment, k: usize) -> ArrayView2<'_, f64> {
        self.trajectory[compartment].index_axis(Axis(0), k)
    }

    pub fn set(&mut self, compartment: Compartment, k: usize, value: &Array2<f64>) {
        self.trajectory[compartment]
            .index_axis_mut(Axis(0), k)
            .assign(value);
    }

    pub fn add(&mut self, compartment: Compartment, k: usize, value: &Array2<f64>) {
        let mut slot = self.trajectory[compartment].index_axis_mut(Axis(0), k);
        slot += value;
    }

    /// Records the flow `counter` during sub-step `k`.
    pub fn record(&mut self, counter: Counter, k: usize, value: &Array2<f64>) {
        self.flows[counter].index_axis_mut(Axis(0), k).assign(value);
    }

    /// Moves susceptibles in or out after the day has closed.
    pub fn shift_susceptible(&mut self, delta: &Array2<f64>) {
        self.state[Compartment::S] += delta;
    }

    /// Copies the last sub-step into the day-boundary state and sums the flows.
    pub fn close_day(&mut self) {
        let last = self.substeps();
        for compartment in Compartment::iter() {
            self.state[compartment] = self.trajectory[compartment]
                .index_axis(Axis(0), last)
                .to_owned();
        }
        for counter in Counter::iter() {
            self.tracking[counter] = self.flows[counter].sum_axis(Axis(0));
        }
    }

    /// Clears the within-day buffers and seeds sub-step zero from the current state.
    pub fn open_day(&mut self) {
        for compartment in Compartment::iter() {
            let buffer = &mut self.trajectory[compartment];
            buffer.fill(0.0);
            buffer
                .index_axis_mut(Axis(0), 0)
                .assign(&self.state[compartment]);
        }
        for series in self.flows.values_mut() {
            series.fill(0.0);
        }
    }

    #[must_use]
    pub fn total(&self) -> f64 {
        self.state.total()
    }
}
