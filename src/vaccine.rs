//! Vaccination program and the inter-stratum flow adjustment.
//!
//! Doses move susceptibles along a fixed graph of strata:
//!
//! ```text
//! Unvaccinated --first_dose--> FirstDose --second_dose--> SecondDose --waning--> Waned
//!                                                              ^                   |
//!                                                              +------booster------+
//! ```
//!
//! The graph is resolved once into a [`FlowTable`]. Each day after the disease dynamics,
//! [`VaccinationProgram::redistribute`] moves the scheduled share of each source
//! stratum's susceptibles to its target.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator};

use crate::compartments::Compartment;
use crate::config::to_grid;
use crate::error::SimError;
use crate::log::warn;
use crate::numeric::{almost_eq, safe_ratio, POPULATION_TOLERANCE};
use crate::stratum::{Strata, Stratum, StratumKind, VaccineReductions};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseKind {
    FirstDose,
    SecondDose,
    Waning,
    Booster,
}

impl DoseKind {
    /// Source and target strata of this flow.
    #[must_use]
    pub fn edge(self) -> (StratumKind, StratumKind) {
        match self {
            DoseKind::FirstDose => (StratumKind::Unvaccinated, StratumKind::FirstDose),
            DoseKind::SecondDose => (StratumKind::FirstDose, StratumKind::SecondDose),
            DoseKind::Waning => (StratumKind::SecondDose, StratumKind::Waned),
            DoseKind::Booster => (StratumKind::Waned, StratumKind::SecondDose),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AllocationEvent {
    pub date: NaiveDate,
    /// Doses per age and risk group, A x L
    pub assignment: Vec<Vec<f64>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VaccineConfig {
    /// Reductions for each vaccinated stratum. Missing strata get no protection.
    #[serde(default)]
    pub reductions: HashMap<StratumKind, VaccineReductions>,
    /// First day on which doses move people. Defaults to the earliest event.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub allocations: HashMap<DoseKind, Vec<AllocationEvent>>,
    /// When set, waning events are derived from second doses and boosters shifted by
    /// this many days, replacing any configured waning events.
    #[serde(default)]
    pub waning_delay_days: Option<i64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DoseEvent {
    pub date: NaiveDate,
    pub assignment: Array2<f64>,
}

/// Outgoing and incoming flows of every stratum, as `(other stratum, dose kind)`.
#[derive(Clone, Debug)]
pub struct FlowTable {
    pub outgoing: Strata<Vec<(StratumKind, DoseKind)>>,
    pub incoming: Strata<Vec<(StratumKind, DoseKind)>>,
}

impl FlowTable {
    #[must_use]
    pub fn new(kinds: impl Iterator<Item = DoseKind> + Clone) -> FlowTable {
        let outgoing = Strata::from_fn(|stratum| {
            kinds
                .clone()
                .filter(|dose| dose.edge().0 == stratum)
                .map(|dose| (dose.edge().1, dose))
                .collect()
        });
        let incoming = Strata::from_fn(|stratum| {
            kinds
                .clone()
                .filter(|dose| dose.edge().1 == stratum)
                .map(|dose| (dose.edge().0, dose))
                .collect()
        });
        FlowTable { outgoing, incoming }
    }
}

#[derive(Clone, Debug)]
pub struct VaccinationProgram {
    start_date: Option<NaiveDate>,
    events: HashMap<DoseKind, Vec<DoseEvent>>,
    reductions: Strata<VaccineReductions>,
    flows: FlowTable,
}

impl VaccinationProgram {
    /// A program with no doses and no protection.
    #[must_use]
    pub fn none() -> VaccinationProgram {
        VaccinationProgram {
            start_date: None,
            events: HashMap::new(),
            reductions: Strata::from_fn(|_| VaccineReductions::default()),
            flows: FlowTable::new(std::iter::empty()),
        }
    }

    /// # Errors
    ///
    /// Returns `SimError::ConfigError` for malformed assignments or reductions.
    pub fn new(config: &VaccineConfig, shape: (usize, usize)) -> Result<VaccinationProgram, SimError> {
        if config.reductions.contains_key(&StratumKind::Unvaccinated) {
            return Err(SimError::ConfigError(
                "the unvaccinated stratum cannot carry vaccine reductions".to_string(),
            ));
        }
        for reductions in config.reductions.values() {
            reductions.validate().map_err(SimError::ConfigError)?;
        }

        let mut events: HashMap<DoseKind, Vec<DoseEvent>> = HashMap::new();
        for (dose, schedule) in &config.allocations {
            let mut parsed = schedule
                .iter()
                .map(|event| {
                    let assignment = to_grid("assignment", &event.assignment, shape)?;
                    if assignment.iter().any(|x| *x < 0.0) {
                        return Err(SimError::ConfigError(format!(
                            "negative {dose:?} assignment on {}",
                            event.date
                        )));
                    }
                    Ok(DoseEvent {
                        date: event.date,
                        assignment,
                    })
                })
                .collect::<Result<Vec<_>, SimError>>()?;
            parsed.sort_by_key(|event| event.date);
            events.insert(*dose, parsed);
        }
        if let Some(delay) = config.waning_delay_days {
            let waning = derive_waning(&events, delay);
            events.insert(DoseKind::Waning, waning);
        }
        events.retain(|_, schedule| !schedule.is_empty());

        let start_date = config
            .start_date
            .or_else(|| events.values().flatten().map(|e| e.date).min());
        let flows = FlowTable::new(DoseKind::iter().filter(|dose| events.contains_key(dose)));
        let reductions = Strata::from_fn(|kind| {
            config.reductions.get(&kind).cloned().unwrap_or_default()
        });
        Ok(VaccinationProgram {
            start_date,
            events,
            reductions,
            flows,
        })
    }

    #[must_use]
    pub fn start_date(&self) -> Option<NaiveDate> {
        self.start_date
    }

    #[must_use]
    pub fn reductions(&self) -> &Strata<VaccineReductions> {
        &self.reductions
    }

    #[must_use]
    pub fn flows(&self) -> &FlowTable {
        &self.flows
    }

    /// The event of `dose` scheduled exactly on `date`.
    #[must_use]
    pub fn event_for(&self, dose: DoseKind, date: NaiveDate) -> Option<&DoseEvent> {
        let schedule = self.events.get(&dose)?;
        schedule
            .binary_search_by_key(&date, |event| event.date)
            .ok()
            .map(|i| &schedule[i])
    }

    fn doses_before(&self, dose: DoseKind, date: NaiveDate, shape: (usize, usize)) -> Array2<f64> {
        let mut total = Array2::zeros(shape);
        for event in self
            .events
            .get(&dose)
            .into_iter()
            .flatten()
            .take_while(|event| event.date < date)
        {
            total += &event.assignment;
        }
        total
    }

    /// People of each age and risk group belonging to `stratum` on `date` according to
    /// the dose schedule, counting doses given strictly before `date`.
    #[must_use]
    pub fn num_eligible(
        &self,
        population: &Array2<f64>,
        stratum: StratumKind,
        date: NaiveDate,
    ) -> Array2<f64> {
        let shape = population.dim();
        let mut eligible = if stratum == StratumKind::Unvaccinated {
            population.clone()
        } else {
            Array2::zeros(shape)
        };
        for (_, dose) in &self.flows.incoming[stratum] {
            eligible += &self.doses_before(*dose, date, shape);
        }
        for (_, dose) in &self.flows.outgoing[stratum] {
            eligible -= &self.doses_before(*dose, date, shape);
        }
        if eligible.iter().any(|x| *x < 0.0) {
            warn!("negative eligible population in {stratum:?} on {date}, clamping to zero");
            eligible.mapv_inplace(|x| x.max(0.0));
        }
        eligible
    }

    /// Moves susceptibles between strata for the doses scheduled on `date`.
    ///
    /// `rate_immune` is the per-sub-step immune evasion probability. When positive, second
    /// doses only reach the partially vaccinated who have not lost their protection.
    ///
    /// # Panics
    ///
    /// Panics if total susceptible mass is not conserved.
    pub fn redistribute(
        &self,
        strata: &mut Strata<Stratum>,
        population: &Array2<f64>,
        date: NaiveDate,
        rate_immune: f64,
    ) {
        if self.start_date.is_none_or(|start| date < start) {
            return;
        }
        let before: f64 = strata
            .values()
            .map(|s| s.state()[Compartment::S].sum())
            .sum();
        let susceptible = Strata::from_fn(|kind| strata[kind].state()[Compartment::S].clone());

        for source in StratumKind::iter() {
            for (target, dose) in &self.flows.outgoing[source] {
                let Some(event) = self.event_for(*dose, date) else {
                    continue;
                };
                let assignment = if source == StratumKind::FirstDose && rate_immune > 0.0 {
                    &event.assignment * rate_immune
                } else {
                    event.assignment.clone()
                };
                let eligible = self.num_eligible(population, source, date);
                let share = safe_ratio(&assignment, &eligible).mapv(|x| x.min(1.0));
                let moved = share * &susceptible[source];
                strata[source].shift_susceptible(&(-&moved));
                strata[*target].shift_susceptible(&moved);
            }
        }

        let after: f64 = strata
            .values()
            .map(|s| s.state()[Compartment::S].sum())
            .sum();
        assert!(
            almost_eq(before, after, POPULATION_TOLERANCE),
            "population unbalanced in vaccine flow: susceptibles {before} before, {after} after on {date}"
        );
    }
}

/// Waning events: every second dose and booster wanes `delay` days later. Events landing
/// on the same date are merged.
fn derive_waning(events: &HashMap<DoseKind, Vec<DoseEvent>>, delay: i64) -> Vec<DoseEvent> {
    let mut waning: Vec<DoseEvent> = Vec::new();
    for dose in [DoseKind::SecondDose, DoseKind::Booster] {
        for event in events.get(&dose).into_iter().flatten() {
            let date = event.date + Duration::days(delay);
            match waning.iter_mut().find(|w| w.date == date) {
                Some(existing) => existing.assignment += &event.assignment,
                None => waning.push(DoseEvent {
                    date,
                    assignment: event.assignment.clone(),
                }),
            }
        }
    }
    waning.sort_by_key(|event| event.date);
    waning
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::assert_almost_eq;
    use crate::compartments::Compartments;
    use ndarray::array;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 1, d).unwrap()
    }

    fn config() -> VaccineConfig {
        VaccineConfig {
            reductions: HashMap::from([(
                StratumKind::SecondDose,
                VaccineReductions {
                    beta: 0.9,
                    ..VaccineReductions::default()
                },
            )]),
            start_date: None,
            allocations: HashMap::from([
                (
                    DoseKind::FirstDose,
                    vec![
                        AllocationEvent {
                            date: date(5),
                            assignment: vec![vec![10.0], vec![20.0]],
                        },
                        AllocationEvent {
                            date: date(2),
                            assignment: vec![vec![10.0], vec![0.0]],
                        },
                    ],
                ),
                (
                    DoseKind::SecondDose,
                    vec![AllocationEvent {
                        date: date(5),
                        assignment: vec![vec![5.0], vec![0.0]],
                    }],
                ),
            ]),
            waning_delay_days: Some(10),
        }
    }

    fn strata(population: &Array2<f64>) -> Strata<Stratum> {
        Strata::from_fn(|kind| {
            let mut state = Compartments::zeros(population.dim());
            if kind == StratumKind::Unvaccinated {
                state[Compartment::S] = population - 10.0;
                state[Compartment::R] = Array2::from_elem(population.dim(), 10.0);
            }
            Stratum::new(kind, state, 2)
        })
    }

    #[test]
    fn flow_table_follows_dose_graph() {
        let table = FlowTable::new(DoseKind::iter());
        assert_eq!(
            table.outgoing[StratumKind::Waned],
            vec![(StratumKind::SecondDose, DoseKind::Booster)]
        );
        let mut incoming = table.incoming[StratumKind::SecondDose].clone();
        incoming.sort_by_key(|(from, _)| *from as usize);
        assert_eq!(
            incoming,
            vec![
                (StratumKind::FirstDose, DoseKind::SecondDose),
                (StratumKind::Waned, DoseKind::Booster)
            ]
        );
        assert!(table.incoming[StratumKind::Unvaccinated].is_empty());
    }

    #[test]
    fn program_sorts_events_and_derives_waning() {
        let program = VaccinationProgram::new(&config(), (2, 1)).unwrap();
        assert_eq!(program.start_date(), Some(date(2)));
        assert!(program.event_for(DoseKind::FirstDose, date(2)).is_some());
        assert!(program.event_for(DoseKind::FirstDose, date(3)).is_none());
        let waning = program.event_for(DoseKind::Waning, date(15)).unwrap();
        assert_eq!(waning.assignment, array![[5.0], [0.0]]);
        assert_eq!(program.reductions()[StratumKind::SecondDose].beta, 0.9);
        assert_eq!(program.reductions()[StratumKind::FirstDose].beta, 0.0);
        assert_eq!(program.flows().outgoing[StratumKind::Waned].len(), 0);
    }

    #[test]
    fn eligible_counts_prior_doses() {
        let program = VaccinationProgram::new(&config(), (2, 1)).unwrap();
        let population = array![[100.0], [100.0]];
        assert_eq!(
            program.num_eligible(&population, StratumKind::Unvaccinated, date(2)),
            population
        );
        assert_eq!(
            program.num_eligible(&population, StratumKind::Unvaccinated, date(5)),
            array![[90.0], [100.0]]
        );
        assert_eq!(
            program.num_eligible(&population, StratumKind::FirstDose, date(5)),
            array![[10.0], [0.0]]
        );
        assert_eq!(
            program.num_eligible(&population, StratumKind::SecondDose, date(5)).sum(),
            0.0
        );
    }

    #[test]
    fn redistribute_conserves_susceptibles() {
        let program = VaccinationProgram::new(&config(), (2, 1)).unwrap();
        let population = array![[100.0], [100.0]];
        let mut strata = strata(&population);
        program.redistribute(&mut strata, &population, date(2), 0.0);
        // 10 of 100 eligible in the first age group get a dose: 10% of 90 susceptibles.
        assert_almost_eq!(
            strata[StratumKind::FirstDose].state()[Compartment::S][[0, 0]],
            9.0,
            1e-12
        );
        assert_almost_eq!(
            strata[StratumKind::Unvaccinated].state()[Compartment::S][[0, 0]],
            81.0,
            1e-12
        );
        let total: f64 = strata
            .values()
            .map(|s| s.state()[Compartment::S].sum())
            .sum();
        assert_almost_eq!(total, 180.0, 1e-9);
    }

    #[test]
    fn zero_eligible_moves_nobody() {
        let program = VaccinationProgram::new(&config(), (2, 1)).unwrap();
        let population = array![[100.0], [100.0]];
        let mut strata = strata(&population);
        // Second doses on day 5 come from an empty first-dose stratum in the second age group.
        program.redistribute(&mut strata, &population, date(5), 0.0);
        let second = &strata[StratumKind::SecondDose].state()[Compartment::S];
        assert!(second.iter().all(|x| x.is_finite()));
        assert_eq!(second[[1, 0]], 0.0);
    }

    #[test]
    fn nothing_moves_before_start() {
        let mut config = config();
        config.start_date = Some(date(20));
        let program = VaccinationProgram::new(&config, (2, 1)).unwrap();
        let population = array![[100.0], [100.0]];
        let mut strata = strata(&population);
        program.redistribute(&mut strata, &population, date(5), 0.0);
        assert_eq!(
            strata[StratumKind::Unvaccinated].state()[Compartment::S],
            array![[90.0], [90.0]]
        );
    }

    #[test]
    fn unvaccinated_reductions_are_rejected() {
        let mut config = config();
        config
            .reductions
            .insert(StratumKind::Unvaccinated, VaccineReductions::default());
        assert!(matches!(
            VaccinationProgram::new(&config, (2, 1)),
            Err(SimError::ConfigError(_))
        ));
    }
}
