//! Random number generation.
//!
//! A replication owns at most one generator. There is no global registry: the generator
//! is an owned value that moves into a replication when it is constructed and moves out
//! again with [`crate::replication::Replication::into_rng`], so a chain of accept/reject
//! attempts consumes a single logical stream.

use ndarray::{Array2, Zip};
use rand::SeedableRng;
use rand_distr::{Binomial, Distribution};

/// The generator type used throughout the simulator.
pub type SimRng = rand::rngs::StdRng;

/// Seed assigned to a worker shard. Ranks map to distinct, reproducible streams.
#[must_use]
pub fn seed_for_rank(base_seed: u64, rank: usize) -> u64 {
    base_seed.wrapping_add(rank as u64)
}

#[must_use]
pub fn rng_for_rank(base_seed: u64, rank: usize) -> SimRng {
    SimRng::seed_from_u64(seed_for_rank(base_seed, rank))
}

/// Draws `Binomial(round(n), p)`, capped at `n`. Negative or zero counts and degenerate
/// probabilities produce zero.
pub fn sample_binomial<R: rand::Rng + ?Sized>(rng: &mut R, n: f64, p: f64) -> f64 {
    let trials = n.round();
    if trials < 1.0 || p.is_nan() || p <= 0.0 {
        return 0.0;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let trials = trials as u64;
    match Binomial::new(trials, p.min(1.0)) {
        #[allow(clippy::cast_precision_loss)]
        Ok(dist) => (dist.sample(rng) as f64).min(n),
        Err(_) => 0.0,
    }
}

/// Computes a transition quantity from a source compartment: a binomial draw when a
/// generator is attached, the expectation `n * p` otherwise.
pub struct TransitionSampler<'r> {
    rng: Option<&'r mut SimRng>,
}

impl<'r> TransitionSampler<'r> {
    pub fn new(rng: Option<&'r mut SimRng>) -> Self {
        Self { rng }
    }

    #[must_use]
    pub fn is_stochastic(&self) -> bool {
        self.rng.is_some()
    }

    pub fn quantity(&mut self, n: &Array2<f64>, p: &Array2<f64>) -> Array2<f64> {
        match self.rng.as_deref_mut() {
            None => n * p,
            Some(rng) => Zip::from(n)
                .and(p)
                .map_collect(|&n, &p| sample_binomial(rng, n, p)),
        }
    }

    /// Same as [`TransitionSampler::quantity`] with one probability for every cell.
    pub fn quantity_uniform(&mut self, n: &Array2<f64>, p: f64) -> Array2<f64> {
        match self.rng.as_deref_mut() {
            None => n * p,
            Some(rng) => n.mapv(|n| sample_binomial(rng, n, p)),
        }
    }
}
