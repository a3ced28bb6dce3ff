//! Candidate threshold tuples for a grid search over threshold policies.

use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// Candidate values `start, start + step, ...` strictly below `end`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageRange {
    pub start: f64,
    pub end: f64,
    pub step: f64,
}

impl StageRange {
    /// # Errors
    ///
    /// Returns `SimError::ConfigError` unless `step` is positive and all bounds are finite.
    pub fn values(&self) -> Result<Vec<f64>, SimError> {
        if !(self.step > 0.0 && self.step.is_finite())
            || !self.start.is_finite()
            || !self.end.is_finite()
        {
            return Err(SimError::ConfigError(format!("invalid stage range {self:?}")));
        }
        let mut values = Vec::new();
        let mut i = 0.0;
        loop {
            let value = self.start + i * self.step;
            if value >= self.end {
                break;
            }
            values.push(value);
            i += 1.0;
        }
        Ok(values)
    }
}

/// Every tuple `(-1, t2, ..., tn)` from the Cartesian product of the stage ranges that is
/// non-decreasing, in lexicographic order of the stages.
///
/// # Errors
///
/// Returns `SimError::ConfigError` if a range is malformed.
pub fn thresholds_generator(stages: &[StageRange]) -> Result<Vec<Vec<f64>>, SimError> {
    let options = stages
        .iter()
        .map(StageRange::values)
        .collect::<Result<Vec<_>, _>>()?;

    let mut combos: Vec<Vec<f64>> = vec![vec![-1.0]];
    for stage in &options {
        combos = combos
            .iter()
            .flat_map(|prefix| {
                stage.iter().filter_map(move |&value| {
                    // A tuple is kept only if every step is non-decreasing.
                    let last = *prefix.last()?;
                    (value >= last).then(|| {
                        let mut next = prefix.clone();
                        next.push(value);
                        next
                    })
                })
            })
            .collect();
    }
    Ok(combos)
}
