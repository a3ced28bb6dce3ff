//! Disease transition engine.
//!
//! [`step_day`] advances every stratum jointly through one calendar day split into
//! `substeps` equal sub-steps. Each transition is a binomial draw on what is left in the
//! source compartment after the previous competing exit, or its expectation when no
//! generator is attached. Within a sub-step all strata read the values at the start of the
//! sub-step, so the order in which strata are visited does not matter.

use ndarray::{s, Array1, Array2, Array4, Zip};
use strum::IntoEnumIterator;

use crate::compartments::{Compartment, Counter};
use crate::numeric::{almost_eq, discrete_approx, POPULATION_TOLERANCE};
use crate::params::EffectiveParams;
use crate::random::{SimRng, TransitionSampler};
use crate::stratum::{Strata, Stratum, StratumKind, VaccineReductions};

/// Everything the engine needs for one day besides the strata themselves.
pub struct DayInputs<'a> {
    pub params: &'a EffectiveParams,
    /// Contact operator `(A, L, A, L)` after interventions
    pub phi: &'a Array4<f64>,
    /// Vaccine reductions of each stratum on this day
    pub reductions: &'a Strata<VaccineReductions>,
    /// Population of each age group
    pub age_totals: &'a Array1<f64>,
    /// Per-sub-step probability of losing immunity without infection
    pub rate_immune: f64,
    /// Expected total over all compartments and strata
    pub population_total: f64,
}

/// Per-sub-step exit probabilities shared by all strata.
struct SharedRates {
    exposed: f64,
    pa_to_ia: f64,
    py_to_iy: f64,
    ia_recovery: f64,
    ih_recovery: Array2<f64>,
    ih_to_icu: Array2<f64>,
    icu_recovery: Array2<f64>,
    icu_death: Array2<f64>,
    immune: f64,
}

impl SharedRates {
    fn new(p: &EffectiveParams, substeps: usize, rate_immune: f64) -> SharedRates {
        let disc = |rates: Array2<f64>| rates.mapv(|r| discrete_approx(r, substeps));
        SharedRates {
            exposed: discrete_approx(p.sigma_e, substeps),
            pa_to_ia: discrete_approx(p.rho_a, substeps),
            py_to_iy: discrete_approx(p.rho_y, substeps),
            ia_recovery: discrete_approx(p.gamma_ia, substeps),
            ih_recovery: disc((1.0 - &p.nu) * p.gamma_ih),
            ih_to_icu: disc(&p.nu * &p.eta_icu),
            icu_recovery: disc((1.0 - &p.nu_icu) * p.gamma_icu),
            icu_death: disc(&p.nu_icu * &p.mu_icu),
            immune: rate_immune,
        }
    }
}

/// Linear force of infection for one sub-step, before susceptibility reductions.
fn force_of_infection(
    strata: &Strata<Stratum>,
    k: usize,
    day: &DayInputs<'_>,
    substeps: usize,
) -> Array2<f64> {
    let p = day.params;
    let shape = p.pi.dim();
    let mut infectious = Array2::<f64>::zeros(shape);
    for (kind, stratum) in strata.iter() {
        let weight = 1.0 - day.reductions[kind].infectiousness;
        let pressure = &p.omega_py * &stratum.at(Compartment::PY, k)
            + &p.omega_pa * &stratum.at(Compartment::PA, k)
            + &stratum.at(Compartment::IA, k) * p.omega_ia
            + &stratum.at(Compartment::IY, k) * p.omega_iy;
        infectious.scaled_add(weight, &pressure);
    }
    for (mut row, &n) in infectious.rows_mut().into_iter().zip(day.age_totals) {
        if n > 0.0 {
            row /= n;
        } else {
            row.fill(0.0);
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let scale = p.beta / substeps as f64;
    Array2::from_shape_fn(shape, |(a, l)| {
        let contacts = day.phi.slice(s![a, l, .., ..]);
        let exposure: f64 = Zip::from(&contacts)
            .and(&infectious)
            .fold(0.0, |acc, &c, &i| acc + c * i);
        (scale * exposure).clamp(0.0, 1.0)
    })
}

/// Advances one stratum by sub-step `k`. Returns the susceptibles that lost immunity and
/// must be added to the waned stratum.
fn advance_stratum(
    stratum: &mut Stratum,
    k: usize,
    foi: &Array2<f64>,
    rates: &SharedRates,
    day: &DayInputs<'_>,
    sampler: &mut TransitionSampler<'_>,
) -> Array2<f64> {
    use Compartment::{D, E, IA, ICU, IH, IY, PA, PY, R, S};
    let p = day.params;
    let substeps = stratum.substeps();
    let reductions = &day.reductions[stratum.kind];
    let current = |c: Compartment| stratum.at(c, k).to_owned();
    let (s, e, pa, py, ia, iy, ih, icu, r, d) = (
        current(S),
        current(E),
        current(PA),
        current(PY),
        current(IA),
        current(IY),
        current(IH),
        current(ICU),
        current(R),
        current(D),
    );

    // Susceptible exits: infection, plus immune escape for the vaccinated.
    let infection = foi * (1.0 - reductions.beta);
    let (ds, dse, mut escaped) = if stratum.kind.escapes_immunity() {
        let total = &infection + rates.immune;
        let ds = sampler.quantity(&s, &total.mapv(|x| x.min(1.0)));
        let dse = Zip::from(&ds)
            .and(&infection)
            .and(&total)
            .map_collect(|&ds, &inf, &tot| if ds == 0.0 { 0.0 } else { ds * inf / tot });
        let dsr = &ds - &dse;
        (ds, dse, dsr)
    } else {
        let ds = sampler.quantity(&s, &infection);
        let dse = ds.clone();
        (ds, dse, Array2::zeros(s.dim()))
    };
    let e_out = sampler.quantity_uniform(&e, rates.exposed);
    let escaped_r = sampler.quantity_uniform(&r, rates.immune);
    escaped += &escaped_r;

    let e_py = sampler.quantity_uniform(&e_out, p.tau * (1.0 - reductions.tau));
    let py_iy = sampler.quantity_uniform(&py, rates.py_to_iy);
    let e_pa = &e_out - &e_py;
    let pa_ia = sampler.quantity_uniform(&pa, rates.pa_to_ia);
    let ia_r = sampler.quantity_uniform(&ia, rates.ia_recovery);

    let pi = &p.pi * (1.0 - reductions.pi);
    let disc = |rates: Array2<f64>| rates.mapv(|x| discrete_approx(x, substeps));
    let iy_r = sampler.quantity(&iy, &disc((1.0 - &pi) * (p.gamma_iy * (1.0 - p.alpha_iyd))));
    let iy_d = sampler.quantity(&(&iy - &iy_r), &disc((1.0 - &pi) * (p.gamma_iy * p.alpha_iyd)));
    let iy_ih = sampler.quantity(
        &(&iy - &iy_r - &iy_d),
        &disc(&pi * &p.eta * p.p_ih),
    );
    let iy_icu = sampler.quantity(
        &(&iy - &iy_r - &iy_d - &iy_ih),
        &disc(&pi * &p.eta * (1.0 - p.p_ih)),
    );

    let ih_r = sampler.quantity(&ih, &rates.ih_recovery);
    let ih_icu = sampler.quantity(&(&ih - &ih_r), &rates.ih_to_icu);
    let icu_r = sampler.quantity(&icu, &rates.icu_recovery);
    let icu_d = sampler.quantity(&(&icu - &icu_r), &rates.icu_death);

    let next = k + 1;
    stratum.set(S, next, &(&s - &ds));
    stratum.set(E, next, &(&e + &dse - &e_out));
    stratum.set(PY, next, &(&py + &e_py - &py_iy));
    stratum.set(PA, next, &(&pa + &e_pa - &pa_ia));
    stratum.set(IA, next, &(&ia + &pa_ia - &ia_r));
    stratum.set(IY, next, &(&iy + &py_iy - &iy_r - &iy_d - &iy_ih - &iy_icu));
    stratum.set(IH, next, &(&ih + &iy_ih - &ih_r - &ih_icu));
    stratum.set(ICU, next, &(&icu + &ih_icu + &iy_icu - &icu_r - &icu_d));
    stratum.set(R, next, &(&r + &ih_r + &iy_r + &ia_r + &icu_r - &escaped_r));
    stratum.set(D, next, &(&d + &icu_d + &iy_d));

    stratum.record(Counter::IYIH, k, &iy_ih);
    stratum.record(Counter::IYICU, k, &iy_icu);
    stratum.record(Counter::IHICU, k, &ih_icu);
    stratum.record(Counter::ToICU, k, &(&iy_icu + &ih_icu));
    stratum.record(Counter::ToIHT, k, &(&iy_icu + &iy_ih));
    stratum.record(Counter::ToICUD, k, &icu_d);
    stratum.record(Counter::ToIYD, k, &iy_d);
    stratum.record(Counter::ToIA, k, &pa_ia);
    stratum.record(Counter::ToIY, k, &py_iy);

    escaped
}

/// Simulates one day for all strata and closes it: each stratum's state becomes its value
/// after the last sub-step and its counters hold the day's flows.
///
/// # Panics
///
/// Panics if the population total drifts from `day.population_total`.
pub fn step_day(strata: &mut Strata<Stratum>, day: &DayInputs<'_>, rng: Option<&mut SimRng>) {
    let substeps = strata[StratumKind::Unvaccinated].substeps();
    let rates = SharedRates::new(day.params, substeps, day.rate_immune);
    let mut sampler = TransitionSampler::new(rng);

    for k in 0..substeps {
        let foi = force_of_infection(strata, k, day, substeps);
        let mut waned_inflow = Array2::<f64>::zeros(foi.dim());
        for kind in StratumKind::iter() {
            waned_inflow +=
                &advance_stratum(&mut strata[kind], k, &foi, &rates, day, &mut sampler);
        }
        strata[StratumKind::Waned].add(Compartment::S, k + 1, &waned_inflow);
    }

    for stratum in strata.values_mut() {
        stratum.close_day();
    }
    let total: f64 = strata.values().map(Stratum::total).sum();
    assert!(
        almost_eq(total, day.population_total, POPULATION_TOLERANCE),
        "population unbalanced after disease dynamics: {total} vs {}",
        day.population_total
    );
}
