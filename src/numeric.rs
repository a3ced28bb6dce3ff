//! Floating point helpers built on the `approx` crate.

use approx::AbsDiffEq;
use ndarray::Array2;

/// Absolute tolerance for the population conservation checks. Stochastic rounding
/// of binomial draws keeps totals well inside this bound.
pub const POPULATION_TOLERANCE: f64 = 1e-2;

/// Compares if two floats are close via `approx::abs_diff_eq` using a maximum absolute difference
/// (epsilon) of `acc`.
#[must_use]
pub fn almost_eq(a: f64, b: f64, acc: f64) -> bool {
    if a.is_infinite() && b.is_infinite() {
        return a == b;
    }
    a.abs_diff_eq(&b, acc)
}

/// Elementwise `num / den`, yielding zero wherever the denominator is zero.
#[must_use]
pub fn safe_ratio(num: &Array2<f64>, den: &Array2<f64>) -> Array2<f64> {
    ndarray::Zip::from(num)
        .and(den)
        .map_collect(|&n, &d| if d == 0.0 { 0.0 } else { n / d })
}

/// `1 - exp(-rate / substeps)`: the probability of leaving a compartment within one sub-step
/// when the exit is a Poisson process with the given daily rate.
#[must_use]
pub fn discrete_approx(rate: f64, substeps: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let step = substeps as f64;
    1.0 - (-rate / step).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_almost_eq;
    use ndarray::array;

    #[test]
    fn almost_eq_within_tolerance() {
        assert!(almost_eq(1.0, 1.0 + 0.5e-2, POPULATION_TOLERANCE));
        assert!(!almost_eq(1.0, 1.02, POPULATION_TOLERANCE));
    }

    #[test]
    fn almost_eq_infinities() {
        assert!(almost_eq(f64::INFINITY, f64::INFINITY, 1e-9));
        assert!(!almost_eq(f64::INFINITY, f64::NEG_INFINITY, 1e-9));
    }

    #[test]
    fn safe_ratio_guards_zero_denominators() {
        let num = array![[1.0, 2.0], [3.0, 0.0]];
        let den = array![[2.0, 0.0], [3.0, 0.0]];
        let ratio = safe_ratio(&num, &den);
        assert_eq!(ratio, array![[0.5, 0.0], [1.0, 0.0]]);
        assert!(ratio.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn discrete_approx_is_a_probability() {
        assert_almost_eq!(discrete_approx(0.0, 10), 0.0, 1e-12);
        let p = discrete_approx(2.0, 10);
        assert_almost_eq!(p, 1.0 - (-0.2f64).exp(), 1e-12);
        assert!(discrete_approx(1e6, 10) <= 1.0);
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn assert_almost_eq_macro_panics() {
        assert_almost_eq!(1.0, 1.001, 1e-4);
    }
}
