use std::path::{Path, PathBuf};

use ndarray::Array2;
use tiered_seir::city::{City, CityConfig};
use tiered_seir::compartments::Compartment;
use tiered_seir::config::load_json;
use tiered_seir::policy::{Policy, ThresholdPolicy, TierInfo};
use tiered_seir::random::rng_for_rank;
use tiered_seir::replication::Replication;
use tiered_seir::stratum::{Stratum, StratumKind};
use tiered_seir::vaccine::{VaccinationProgram, VaccineConfig};
use tiered_seir::SimError;

fn data(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

fn city() -> City {
    City::load(&data("city.json")).unwrap()
}

fn vaccines(city: &City) -> VaccinationProgram {
    let config: VaccineConfig = load_json(&data("vaccines.json")).unwrap();
    VaccinationProgram::new(&config, city.shape()).unwrap()
}

fn policy() -> Box<dyn Policy> {
    let tiers = TierInfo::load(&data("tiers.json")).unwrap();
    Box::new(ThresholdPolicy::new(tiers.tiers, vec![-1.0, 1.0, 2.0, 4.0, 8.0]).unwrap())
}

fn total(rep: &Replication<'_>) -> f64 {
    rep.strata().values().map(Stratum::total).sum()
}

#[test]
fn population_is_conserved_with_vaccines_and_variants() {
    let city = city();
    let vaccines = vaccines(&city);
    for seed in 0..3 {
        let mut rep = Replication::new(&city, &vaccines, Some(rng_for_rank(seed, 0))).unwrap();
        rep.set_policy(policy());
        rep.advance_to(city.calendar.len()).unwrap();
        assert_eq!(rep.next_t(), 90);
        assert_eq!(rep.history().len(), 90);
        tiered_seir::assert_almost_eq!(total(&rep), city.population.sum(), 1e-2);
        assert!(rep.strata()[StratumKind::SecondDose].total() > 0.0);
    }
}

#[test]
fn expected_value_runs_are_identical() {
    let city = city();
    let vaccines = vaccines(&city);
    let run = || {
        let mut rep = Replication::new(&city, &vaccines, None).unwrap();
        rep.set_policy(policy());
        rep.advance_to(70).unwrap();
        (
            rep.history().clone(),
            rep.policy().unwrap().tier_history().to_vec(),
        )
    };
    let (a, tiers_a) = run();
    let (b, tiers_b) = run();
    assert_eq!(a, b);
    assert_eq!(tiers_a, tiers_b);
    assert_eq!(tiers_a.len(), 70);
    assert!(tiers_a[..40].iter().all(Option::is_none));
    assert!(tiers_a[40..].iter().all(Option::is_some));
}

#[test]
fn seeded_runs_are_reproducible() {
    let city = city();
    let vaccines = vaccines(&city);
    let run = |seed| {
        let mut rep = Replication::new(&city, &vaccines, Some(rng_for_rank(seed, 2))).unwrap();
        rep.advance_to(40).unwrap();
        rep.history().hospitalized()
    };
    assert_eq!(run(11), run(11));
}

#[test]
fn policy_days_need_a_policy() {
    let city = city();
    let vaccines = VaccinationProgram::none();
    let mut rep = Replication::new(&city, &vaccines, None).unwrap();
    let res = rep.advance_to(45);
    assert!(matches!(res, Err(SimError::MissingPolicy { t: 40 })));
    assert_eq!(rep.next_t(), 40);
}

#[test]
fn reset_returns_to_initial_conditions() {
    let city = city();
    let vaccines = vaccines(&city);
    let mut rep = Replication::new(&city, &vaccines, Some(rng_for_rank(4, 0))).unwrap();
    let initial = rep.snapshot();
    rep.set_policy(policy());
    rep.advance_to(55).unwrap();
    rep.reset();
    assert_eq!(rep.next_t(), 0);
    assert!(rep.history().is_empty());
    assert!(rep.policy().unwrap().tier_history().is_empty());
    let after = rep.snapshot();
    assert_eq!(after.strata, initial.strata);
    assert_eq!(after.params, initial.params);
    assert_eq!(
        rep.strata()[StratumKind::Unvaccinated].state()[Compartment::PY],
        city.initial_infected
    );
}

fn icu_day(total: f64) -> Array2<f64> {
    Array2::from_elem((2, 2), total / 4.0)
}

#[test]
fn feasibility_follows_icu_census_after_cutoff() {
    let city = city();
    let vaccines = VaccinationProgram::none();
    let cutoff = city.t_historical_data_end();
    assert_eq!(cutoff, 30);

    let mut rep = Replication::new(&city, &vaccines, None).unwrap();
    rep.advance_to(40).unwrap();
    let mut snapshot = rep.snapshot();
    for day in &mut snapshot.history.icu {
        *day = icu_day(0.0);
    }
    // Overcrowding before the cutoff is ignored.
    snapshot.history.icu[10] = icu_day(city.icu_capacity * 2.0);

    let mut within = Replication::restore(&city, &vaccines, snapshot.clone(), None).unwrap();
    assert_eq!(within.compute_feasibility(), None);
    within.set_policy(policy());
    assert_eq!(within.compute_feasibility(), Some(true));

    snapshot.history.icu[35] = icu_day(city.icu_capacity + 1.0);
    let mut over = Replication::restore(&city, &vaccines, snapshot, None).unwrap();
    over.set_policy(policy());
    assert_eq!(over.compute_feasibility(), Some(false));

    let mut early = Replication::new(&city, &vaccines, None).unwrap();
    early.advance_to(20).unwrap();
    early.set_policy(policy());
    assert_eq!(early.compute_feasibility(), None);
}

#[test]
fn cost_adds_daily_tier_costs() {
    let city = city();
    let vaccines = VaccinationProgram::none();
    let tiers = TierInfo::load(&data("tiers.json")).unwrap();
    let strictest = ThresholdPolicy::new(tiers.tiers, vec![-1.0; 5]).unwrap();
    let mut rep = Replication::new(&city, &vaccines, None).unwrap();
    assert_eq!(rep.compute_cost(), None);
    rep.set_policy(Box::new(strictest));
    rep.advance_to(60).unwrap();
    // Twenty policy days at the red tier, fixed days are free.
    assert_approx_eq::assert_approx_eq!(rep.compute_cost().unwrap(), 100.0, 1e-9);
}

#[test]
fn city_file_round_trips_through_config() {
    let config: CityConfig = load_json(&data("city.json")).unwrap();
    assert_eq!(config.step_size, 5);
    let city = City::from_config(config).unwrap();
    assert_eq!(city.shape(), (2, 2));
    assert_eq!(city.calendar.len(), 90);
    assert!(city.calendar.day(39).unwrap().fixed_transmission_reduction.is_some());
    assert!(city.calendar.day(40).unwrap().fixed_transmission_reduction.is_none());
}
