//! Compartment and flow-counter identifiers.
//!
//! Every stratum holds one `A x L` array per [`Compartment`] and one per [`Counter`]. The
//! tables are indexed by enum rather than looked up by name.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use strum::{EnumCount, EnumIter};

use crate::define_indexed_table;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, EnumCount, Serialize, Deserialize)]
pub enum Compartment {
    S,
    E,
    PA,
    PY,
    IA,
    IY,
    IH,
    ICU,
    R,
    D,
}

/// Flows accumulated over the sub-steps of a day.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, EnumCount, Serialize, Deserialize)]
pub enum Counter {
    /// Symptomatic to general ward
    IYIH,
    /// Symptomatic straight to ICU
    IYICU,
    /// General ward to ICU
    IHICU,
    /// All ICU admissions
    ToICU,
    /// All hospital admissions
    ToIHT,
    /// Deaths in ICU
    ToICUD,
    /// Deaths among the non-hospitalized symptomatic
    ToIYD,
    /// New asymptomatic infectious
    ToIA,
    /// New symptomatic infectious
    ToIY,
}

define_indexed_table!(Compartments, Compartment);
define_indexed_table!(Counters, Counter);

impl Compartments<Array2<f64>> {
    #[must_use]
    pub fn zeros(shape: (usize, usize)) -> Self {
        Self::from_fn(|_| Array2::zeros(shape))
    }

    /// Sum over every compartment and cell.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.values().map(Array2::sum).sum()
    }
}

impl Counters<Array2<f64>> {
    #[must_use]
    pub fn zeros(shape: (usize, usize)) -> Self {
        Self::from_fn(|_| Array2::zeros(shape))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn tables_have_one_entry_per_key() {
        let table = Compartments::zeros((2, 3));
        assert_eq!(table.values().count(), Compartment::COUNT);
        let counters = Counters::zeros((2, 3));
        assert_eq!(counters.values().count(), Counter::COUNT);
        assert!(table
            .iter()
            .zip(Compartment::iter())
            .all(|((key, _), expected)| key == expected));
    }

    #[test]
    fn indexing_by_key() {
        let mut table = Compartments::zeros((2, 2));
        table[Compartment::IH][[1, 0]] = 4.0;
        table[Compartment::S].fill(1.0);
        assert_eq!(table[Compartment::IH][[1, 0]], 4.0);
        assert_eq!(table[Compartment::ICU].sum(), 0.0);
        assert_eq!(table.total(), 8.0);
    }
}
