//! One sample path of the simulation.
//!
//! A [`Replication`] owns a parameter draw, the strata, an optional policy, an optional
//! generator and the cursor `next_t`: days `0..next_t` have been simulated. The city and
//! vaccination program are shared read-only between replications.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::checkpoint::{ReplicationSnapshot, StratumSnapshot};
use crate::city::City;
use crate::compartments::{Compartment, Compartments, Counter};
use crate::engine::{step_day, DayInputs};
use crate::error::SimError;
use crate::log::debug;
use crate::numeric::{almost_eq, discrete_approx, POPULATION_TOLERANCE};
use crate::params::EpiParams;
use crate::policy::{MonitoredHistory, Policy};
use crate::random::SimRng;
use crate::stratum::{Strata, Stratum, StratumKind, VaccineReductions};
use crate::vaccine::VaccinationProgram;

/// Daily totals across strata. Entry `i` of each series covers day `i`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub icu: Vec<Array2<f64>>,
    pub ih: Vec<Array2<f64>>,
    pub d: Vec<Array2<f64>>,
    pub r: Vec<Array2<f64>>,
    /// Hospital admissions
    pub to_iht: Vec<Array2<f64>>,
    /// New symptomatic cases
    pub to_iy: Vec<Array2<f64>>,
    pub to_icud: Vec<Array2<f64>>,
    pub to_iyd: Vec<Array2<f64>>,
}

impl History {
    #[must_use]
    pub fn len(&self) -> usize {
        self.icu.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.icu.is_empty()
    }

    /// Whether every series covers `days` days of `shape` arrays.
    #[must_use]
    pub fn matches(&self, days: usize, shape: (usize, usize)) -> bool {
        [
            &self.icu,
            &self.ih,
            &self.d,
            &self.r,
            &self.to_iht,
            &self.to_iy,
            &self.to_icud,
            &self.to_iyd,
        ]
        .iter()
        .all(|series| series.len() == days && series.iter().all(|a| a.dim() == shape))
    }

    #[must_use]
    pub fn monitored(&self) -> MonitoredHistory<'_> {
        MonitoredHistory {
            admissions: &self.to_iht,
            hospital_census: &self.ih,
            icu_census: &self.icu,
            symptomatic: &self.to_iy,
        }
    }

    fn record(&mut self, strata: &Strata<Stratum>) {
        let shape = strata[StratumKind::Unvaccinated].state()[Compartment::S].dim();
        let state = |c: Compartment| {
            strata
                .values()
                .fold(Array2::zeros(shape), |acc, s| acc + &s.state()[c])
        };
        let flow = |c: Counter| {
            strata
                .values()
                .fold(Array2::zeros(shape), |acc, s| acc + &s.tracking()[c])
        };
        self.icu.push(state(Compartment::ICU));
        self.ih.push(state(Compartment::IH));
        self.d.push(state(Compartment::D));
        self.r.push(state(Compartment::R));
        self.to_iht.push(flow(Counter::ToIHT));
        self.to_iy.push(flow(Counter::ToIY));
        self.to_icud.push(flow(Counter::ToICUD));
        self.to_iyd.push(flow(Counter::ToIYD));
    }

    /// Simulated hospital census including ICU, summed over groups, per day.
    #[must_use]
    pub fn hospitalized(&self) -> Vec<f64> {
        self.ih
            .iter()
            .zip(&self.icu)
            .map(|(ih, icu)| ih.sum() + icu.sum())
            .collect()
    }
}

/// What `reset` returns to.
#[derive(Clone, Debug)]
struct InitialConditions {
    strata: Strata<StratumSnapshot>,
    history: History,
    next_t: usize,
}

pub struct Replication<'a> {
    city: &'a City,
    vaccines: &'a VaccinationProgram,
    params: EpiParams,
    strata: Strata<Stratum>,
    history: History,
    next_t: usize,
    policy: Option<Box<dyn Policy + 'a>>,
    rng: Option<SimRng>,
    initial: InitialConditions,
}

impl<'a> Replication<'a> {
    /// Starts a sample path at day zero with a fresh parameter draw. Without a generator
    /// the simulation runs on expected values.
    ///
    /// # Errors
    ///
    /// Returns a `SimError` if the parameters cannot be sampled.
    pub fn new(
        city: &'a City,
        vaccines: &'a VaccinationProgram,
        mut rng: Option<SimRng>,
    ) -> Result<Replication<'a>, SimError> {
        let params = EpiParams::sample(&city.epi, city.shape(), rng.as_mut())?;
        debug!(
            "sampled parameters for {}: beta={:.4} sigma_e={:.4} gamma_ih={:.4}",
            city.name, params.beta, params.sigma_e, params.gamma_ih
        );
        let strata = Strata::from_fn(|kind| {
            let mut state = Compartments::zeros(city.shape());
            if kind == StratumKind::Unvaccinated {
                state[Compartment::S] = &city.population - &city.initial_infected;
                state[Compartment::PY] = city.initial_infected.clone();
            }
            Stratum::new(kind, state, city.substeps)
        });
        Ok(Replication::assemble(
            city,
            vaccines,
            params,
            strata,
            History::default(),
            0,
            rng,
        ))
    }

    /// Resumes a sample path from a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `SimError::ConfigError` if the snapshot does not match the city.
    pub fn restore(
        city: &'a City,
        vaccines: &'a VaccinationProgram,
        snapshot: ReplicationSnapshot,
        rng: Option<SimRng>,
    ) -> Result<Replication<'a>, SimError> {
        let shape = city.shape();
        if !snapshot.history.matches(snapshot.next_t, shape)
            || snapshot.next_t > city.calendar.len()
            || snapshot.params.yhr.dim() != shape
        {
            return Err(SimError::ConfigError(format!(
                "checkpoint at day {} does not match city {}",
                snapshot.next_t, city.name
            )));
        }
        let strata_match = snapshot.strata.is_complete()
            && snapshot.strata.values().all(|saved| {
                saved.state.is_complete()
                    && saved.tracking.is_complete()
                    && saved.state.values().all(|a| a.dim() == shape)
                    && saved.tracking.values().all(|a| a.dim() == shape)
            });
        if !strata_match {
            return Err(SimError::ConfigError(format!(
                "checkpoint strata do not match the {}x{} groups of city {}",
                shape.0, shape.1, city.name
            )));
        }
        let strata = Strata::from_fn(|kind| {
            let saved = &snapshot.strata[kind];
            let mut stratum = Stratum::empty(kind, city.shape(), city.substeps);
            stratum.restore(saved.state.clone(), saved.tracking.clone());
            stratum
        });
        let total: f64 = strata.values().map(Stratum::total).sum();
        if !almost_eq(total, city.population.sum(), POPULATION_TOLERANCE) {
            return Err(SimError::ConfigError(format!(
                "checkpoint population {total} differs from city population {}",
                city.population.sum()
            )));
        }
        Ok(Replication::assemble(
            city,
            vaccines,
            snapshot.params,
            strata,
            snapshot.history,
            snapshot.next_t,
            rng,
        ))
    }

    fn assemble(
        city: &'a City,
        vaccines: &'a VaccinationProgram,
        params: EpiParams,
        strata: Strata<Stratum>,
        history: History,
        next_t: usize,
        rng: Option<SimRng>,
    ) -> Replication<'a> {
        let initial = InitialConditions {
            strata: Strata::from_fn(|kind| StratumSnapshot::of(&strata[kind])),
            history: history.clone(),
            next_t,
        };
        Replication {
            city,
            vaccines,
            params,
            strata,
            history,
            next_t,
            policy: None,
            rng,
            initial,
        }
    }

    #[must_use]
    pub fn next_t(&self) -> usize {
        self.next_t
    }

    #[must_use]
    pub fn params(&self) -> &EpiParams {
        &self.params
    }

    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }

    #[must_use]
    pub fn strata(&self) -> &Strata<Stratum> {
        &self.strata
    }

    #[must_use]
    pub fn policy(&self) -> Option<&(dyn Policy + 'a)> {
        self.policy.as_deref()
    }

    pub fn set_policy(&mut self, policy: Box<dyn Policy + 'a>) {
        self.policy = Some(policy);
    }

    pub fn take_policy(&mut self) -> Option<Box<dyn Policy + 'a>> {
        self.policy.take()
    }

    /// Hands the generator to the caller, leaving this replication deterministic.
    pub fn take_rng(&mut self) -> Option<SimRng> {
        self.rng.take()
    }

    pub fn set_rng(&mut self, rng: Option<SimRng>) {
        self.rng = rng;
    }

    #[must_use]
    pub fn into_rng(self) -> Option<SimRng> {
        self.rng
    }

    /// Simulates days `next_t..time_end`.
    ///
    /// # Errors
    ///
    /// Returns `SimError::CalendarError` past the end of the calendar and
    /// `SimError::MissingPolicy` on a day that needs a policy decision when none is attached.
    ///
    /// # Panics
    ///
    /// Panics if a day does not conserve the population.
    pub fn advance_to(&mut self, time_end: usize) -> Result<(), SimError> {
        for t in self.next_t..time_end {
            self.simulate_day(t)?;
        }
        Ok(())
    }

    fn simulate_day(&mut self, t: usize) -> Result<(), SimError> {
        let city = self.city;
        let day = city.calendar.day(t)?;

        let (schools_closed, cocooning, reduction) = match day.fixed_transmission_reduction {
            Some(reduction) => {
                if let Some(policy) = self.policy.as_mut() {
                    policy.record_fixed_day(t);
                }
                (day.schools_closed, day.fixed_cocooning, reduction)
            }
            None => {
                let policy = self.policy.as_mut().ok_or(SimError::MissingPolicy { t })?;
                let index = policy.choose_tier(t, &self.history.monitored());
                let tier = &policy.tiers()[index];
                (tier.school_closure, tier.cocooning, tier.transmission_reduction)
            }
        };
        let phi = city
            .contacts
            .effective_phi(schools_closed, cocooning, reduction, day.day_type);

        let variant = city.variants.effect(day.date);
        let immune_evasion = city
            .variants
            .immune_evasion(self.params.immune_evasion, day.date);
        let params = self.params.effective(
            variant.as_ref().map(|v| &v.multipliers),
            city.icu_ratio_scale(t),
        );
        let reductions = Strata::from_fn(|kind| {
            let base = &self.vaccines.reductions()[kind];
            match (&variant, kind) {
                (_, StratumKind::Unvaccinated) => VaccineReductions::default(),
                (Some(effect), _) => effect.reductions_for(kind, base),
                (None, _) => base.clone(),
            }
        });
        let age_totals = city.age_totals();
        let rate_immune = discrete_approx(immune_evasion, city.substeps);
        let population_total = city.population.sum();

        let inputs = DayInputs {
            params: &params,
            phi: &phi,
            reductions: &reductions,
            age_totals: &age_totals,
            rate_immune,
            population_total,
        };
        step_day(&mut self.strata, &inputs, self.rng.as_mut());
        self.vaccines
            .redistribute(&mut self.strata, &city.population, day.date, rate_immune);
        for stratum in self.strata.values_mut() {
            stratum.open_day();
        }

        self.history.record(&self.strata);
        self.next_t = t + 1;

        let total: f64 = self.strata.values().map(Stratum::total).sum();
        assert!(
            almost_eq(total, population_total, POPULATION_TOLERANCE),
            "population unbalanced: {total} vs {population_total} on {} (day {t})",
            day.date
        );
        Ok(())
    }

    /// R-squared style agreement between simulated hospital census (ward plus ICU) and the
    /// observed census over the simulated part of the historical period. Not bounded
    /// below by -1.
    #[must_use]
    pub fn compute_fit_statistic(&self) -> f64 {
        let observed = &self.city.history.hospital_census;
        let simulated = self.history.hospitalized();
        let end = self
            .city
            .t_historical_data_end()
            .min(self.next_t)
            .min(simulated.len());
        let observed = &observed[..end];
        let simulated = &simulated[..end];

        let residual: f64 = simulated
            .iter()
            .zip(observed)
            .map(|(s, o)| (s - o).powi(2))
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let mean = observed.iter().sum::<f64>() / end.max(1) as f64;
        let variance: f64 = observed.iter().map(|o| (o - mean).powi(2)).sum();
        if variance == 0.0 {
            return if residual == 0.0 { 1.0 } else { f64::NEG_INFINITY };
        }
        1.0 - residual / variance
    }

    /// Total daily cost of the tiers enforced so far, `None` without a policy.
    #[must_use]
    pub fn compute_cost(&self) -> Option<f64> {
        let policy = self.policy.as_ref()?;
        let tiers = policy.tiers();
        Some(
            policy
                .tier_history()
                .iter()
                .flatten()
                .map(|&tier| tiers[tier].daily_cost)
                .sum(),
        )
    }

    /// Whether ICU census stayed within capacity after the historical period. `None`
    /// without a policy or while still inside the historical period.
    #[must_use]
    pub fn compute_feasibility(&self) -> Option<bool> {
        self.policy.as_ref()?;
        let cutoff = self.city.t_historical_data_end();
        if self.next_t < cutoff {
            return None;
        }
        let capacity = self.city.icu_capacity;
        Some(
            self.history
                .icu
                .iter()
                .skip(cutoff)
                .all(|icu| icu.sum() <= capacity),
        )
    }

    /// Returns to the state captured at construction or restore and clears the policy's
    /// tier history. The parameter draw is kept.
    pub fn reset(&mut self) {
        for kind in StratumKind::iter() {
            let saved = &self.initial.strata[kind];
            self.strata[kind].restore(saved.state.clone(), saved.tracking.clone());
        }
        self.history = self.initial.history.clone();
        self.next_t = self.initial.next_t;
        if let Some(policy) = self.policy.as_mut() {
            policy.reset();
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> ReplicationSnapshot {
        ReplicationSnapshot {
            next_t: self.next_t,
            params: self.params.clone(),
            strata: Strata::from_fn(|kind| StratumSnapshot::of(&self.strata[kind])),
            history: self.history.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::assert_almost_eq;
    use crate::city::test::{city, city_config};
    use crate::policy::test::tiers;
    use crate::policy::ThresholdPolicy;
    use crate::random::rng_for_rank;

    fn policy() -> Box<dyn Policy> {
        Box::new(ThresholdPolicy::new(tiers(), vec![-1.0, 0.5, 1.0, 2.0, 4.0]).unwrap())
    }

    #[test]
    fn starts_from_initial_infections() {
        let city = city();
        let vaccines = VaccinationProgram::none();
        let rep = Replication::new(&city, &vaccines, None).unwrap();
        let unvax = &rep.strata()[StratumKind::Unvaccinated];
        assert_eq!(unvax.state()[Compartment::PY], city.initial_infected);
        assert_eq!(rep.next_t(), 0);
        assert!(rep.history().is_empty());
    }

    #[test]
    fn advance_records_one_history_entry_per_day() {
        let city = city();
        let vaccines = VaccinationProgram::none();
        let mut rep = Replication::new(&city, &vaccines, Some(rng_for_rank(5, 0))).unwrap();
        rep.advance_to(10).unwrap();
        assert_eq!(rep.next_t(), 10);
        assert_eq!(rep.history().len(), 10);
        rep.advance_to(5).unwrap();
        assert_eq!(rep.next_t(), 10);
        rep.advance_to(12).unwrap();
        assert_eq!(rep.history().to_iht.len(), 12);
    }

    #[test]
    fn policy_is_required_after_fixed_period() {
        let city = city();
        let vaccines = VaccinationProgram::none();
        let mut rep = Replication::new(&city, &vaccines, None).unwrap();
        let err = rep.advance_to(31).unwrap_err();
        assert!(matches!(err, SimError::MissingPolicy { t: 30 }));
        assert_eq!(rep.next_t(), 30);
    }

    #[test]
    fn calendar_end_is_an_error() {
        let city = city();
        let vaccines = VaccinationProgram::none();
        let mut rep = Replication::new(&city, &vaccines, None).unwrap();
        rep.set_policy(policy());
        assert!(matches!(
            rep.advance_to(121),
            Err(SimError::CalendarError(_))
        ));
    }

    #[test]
    fn cost_and_feasibility_need_a_policy() {
        let city = city();
        let vaccines = VaccinationProgram::none();
        let mut rep = Replication::new(&city, &vaccines, None).unwrap();
        rep.advance_to(30).unwrap();
        assert_eq!(rep.compute_cost(), None);
        assert_eq!(rep.compute_feasibility(), None);

        rep.set_policy(policy());
        assert_eq!(rep.compute_cost(), Some(0.0));
        rep.advance_to(40).unwrap();
        let history = rep.policy().unwrap().tier_history();
        assert_eq!(history.len(), 40);
        assert!(history[..30].iter().all(Option::is_none));
        let tiers = tiers();
        let expected: f64 = history
            .iter()
            .flatten()
            .map(|&tier| tiers[tier].daily_cost)
            .sum();
        assert_eq!(rep.compute_cost(), Some(expected));
        assert!(expected >= 10.0);
        assert!(rep.compute_feasibility().is_some());
    }

    fn sum_of_squares(observed: &[f64]) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let mean = observed.iter().sum::<f64>() / observed.len() as f64;
        observed.iter().map(|o| (o - mean).powi(2)).sum()
    }

    #[test]
    fn fit_statistic_compares_census_over_simulated_days() {
        let mut config = city_config();
        let simulated = {
            let city = City::from_config(config.clone()).unwrap();
            let vaccines = VaccinationProgram::none();
            let mut rep = Replication::new(&city, &vaccines, None).unwrap();
            rep.advance_to(20).unwrap();
            rep.history().hospitalized()
        };
        let mut census = simulated;
        census[3] += 2.0;
        census[7] -= 1.0;
        config.history.hospital_census = census.clone();
        let city = City::from_config(config).unwrap();
        let vaccines = VaccinationProgram::none();

        let mut rep = Replication::new(&city, &vaccines, None).unwrap();
        rep.advance_to(5).unwrap();
        // Only days 0..5 are compared, which holds the day 3 offset.
        let expected = 1.0 - 4.0 / sum_of_squares(&census[..5]);
        assert_almost_eq!(rep.compute_fit_statistic(), expected, 1e-9);

        rep.advance_to(20).unwrap();
        let expected = 1.0 - 5.0 / sum_of_squares(&census);
        assert_almost_eq!(rep.compute_fit_statistic(), expected, 1e-9);
        assert!(expected < 1.0);

        // Days past the census are not compared.
        rep.advance_to(25).unwrap();
        assert_almost_eq!(rep.compute_fit_statistic(), expected, 1e-9);
    }

    #[test]
    fn flat_census_fit_is_all_or_nothing() {
        let mut config = city_config();
        config.history.hospital_census = vec![0.0; 10];
        let city = City::from_config(config).unwrap();
        let vaccines = VaccinationProgram::none();
        let rep = Replication::new(&city, &vaccines, None).unwrap();
        // Nothing simulated yet: no residual against a constant series.
        assert_eq!(rep.compute_fit_statistic(), 1.0);

        let mut rep = Replication::new(&city, &vaccines, None).unwrap();
        rep.advance_to(10).unwrap();
        assert!(rep.history().hospitalized().iter().any(|h| *h > 0.0));
        assert_eq!(rep.compute_fit_statistic(), f64::NEG_INFINITY);
    }

    #[test]
    fn restore_rejects_mismatched_checkpoints() {
        let city = city();
        let vaccines = VaccinationProgram::none();
        let mut rep = Replication::new(&city, &vaccines, None).unwrap();
        rep.advance_to(10).unwrap();
        let snapshot = rep.snapshot();
        assert!(Replication::restore(&city, &vaccines, snapshot.clone(), None).is_ok());

        let mut wrong_shape = snapshot.clone();
        wrong_shape.strata[StratumKind::FirstDose].state[Compartment::S] = Array2::zeros((3, 2));
        assert!(matches!(
            Replication::restore(&city, &vaccines, wrong_shape, None),
            Err(SimError::ConfigError(_))
        ));

        let mut wrong_history = snapshot.clone();
        wrong_history.history.to_iy[4] = Array2::zeros((1, 1));
        assert!(matches!(
            Replication::restore(&city, &vaccines, wrong_history, None),
            Err(SimError::ConfigError(_))
        ));

        let mut value = serde_json::to_value(&snapshot).unwrap();
        value["strata"]["values"].as_array_mut().unwrap().pop();
        let missing_stratum: ReplicationSnapshot = serde_json::from_value(value).unwrap();
        assert!(!missing_stratum.strata.is_complete());
        assert!(matches!(
            Replication::restore(&city, &vaccines, missing_stratum, None),
            Err(SimError::ConfigError(_))
        ));

        let mut value = serde_json::to_value(&snapshot).unwrap();
        value["strata"]["values"][0]["tracking"]["values"]
            .as_array_mut()
            .unwrap()
            .pop();
        let missing_counter: ReplicationSnapshot = serde_json::from_value(value).unwrap();
        assert!(matches!(
            Replication::restore(&city, &vaccines, missing_counter, None),
            Err(SimError::ConfigError(_))
        ));
    }

    #[test]
    fn reset_restores_initial_conditions() {
        let city = city();
        let vaccines = VaccinationProgram::none();
        let mut rep = Replication::new(&city, &vaccines, Some(rng_for_rank(1, 0))).unwrap();
        let initial = rep.snapshot();
        rep.set_policy(policy());
        rep.advance_to(45).unwrap();
        assert_ne!(rep.snapshot().strata, initial.strata);
        rep.reset();
        let after = rep.snapshot();
        for kind in StratumKind::iter() {
            assert_eq!(after.strata[kind].state, initial.strata[kind].state);
            assert_eq!(after.strata[kind].tracking, initial.strata[kind].tracking);
        }
        assert_eq!(after.next_t, 0);
        assert!(after.history.is_empty());
        assert!(rep.policy().unwrap().tier_history().is_empty());
        // Resetting twice changes nothing.
        rep.reset();
        assert_eq!(rep.snapshot().strata, initial.strata);
    }

    #[test]
    fn deterministic_runs_are_identical() {
        let city = city();
        let vaccines = VaccinationProgram::none();
        let mut a = Replication::new(&city, &vaccines, None).unwrap();
        let mut b = Replication::new(&city, &vaccines, None).unwrap();
        a.advance_to(25).unwrap();
        b.advance_to(25).unwrap();
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn rng_moves_between_replications() {
        let city = city();
        let vaccines = VaccinationProgram::none();
        let mut first = Replication::new(&city, &vaccines, Some(rng_for_rank(2, 0))).unwrap();
        first.advance_to(5).unwrap();
        let rng = first.into_rng();
        assert!(rng.is_some());
        let second = Replication::new(&city, &vaccines, rng).unwrap();
        let fresh = Replication::new(&city, &vaccines, Some(rng_for_rank(2, 0))).unwrap();
        // The handed-over stream has advanced, so the parameter draws differ.
        assert_ne!(second.params(), fresh.params());
    }
}
