//! The simulated city: demographics, ICU capacity, historical census data, the contact
//! structure and the initial epidemic seed.

use std::path::Path;

use ndarray::{s, Array1, Array2, Array4, Axis};
use serde::{Deserialize, Serialize};

use crate::calendar::{Calendar, CalendarConfig, DayType};
use crate::config::{load_json, to_grid};
use crate::error::SimError;
use crate::params::{ContactMatrices, EpiConfig};
use crate::variants::VariantPool;

fn default_step_size() -> usize {
    10
}

/// Observed daily series, aligned with the calendar from day zero.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistoricalData {
    /// Hospital census including ICU
    pub hospital_census: Vec<f64>,
    #[serde(default)]
    pub icu_census: Vec<f64>,
    #[serde(default)]
    pub admissions: Vec<f64>,
    #[serde(default)]
    pub deaths: Vec<f64>,
}

/// Window in which the hospital-to-ICU ratio is scaled by `rate`. The window covers the
/// days strictly after `start` up to and including `end`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IcuAdjustment {
    pub start: chrono::NaiveDate,
    pub end: chrono::NaiveDate,
    pub rate: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CityConfig {
    pub name: String,
    /// Population by age (rows) and risk group (columns)
    pub population: Vec<Vec<f64>>,
    pub icu_capacity: f64,
    /// Sub-steps per simulated day
    #[serde(default = "default_step_size")]
    pub step_size: usize,
    /// Initially infected, placed in the symptomatic pre-infectious compartment
    pub initial_infected: Vec<Vec<f64>>,
    pub contacts: ContactMatrices,
    pub calendar: CalendarConfig,
    pub epi: EpiConfig,
    pub history: HistoricalData,
    #[serde(default)]
    pub variants: VariantPool,
    #[serde(default)]
    pub icu_adjustment: Option<IcuAdjustment>,
}

/// Contact rates between `(age, risk)` cells, split by setting.
#[derive(Clone, Debug)]
pub struct ContactModel {
    all: Array4<f64>,
    school: Array4<f64>,
    work: Array4<f64>,
}

impl ContactModel {
    /// Spreads each `A x A` matrix over risk groups in proportion to the population share
    /// of each risk group within the contacted age group.
    ///
    /// # Errors
    ///
    /// Returns `SimError::ConfigError` if a matrix is not `A x A`.
    pub fn new(contacts: &ContactMatrices, population: &Array2<f64>) -> Result<ContactModel, SimError> {
        let (ages, risks) = population.dim();
        let mut share = population / population.sum() + 1e-5;
        for mut row in share.rows_mut() {
            let total = row.sum();
            row /= total;
        }
        let split = |name: &str, rows: &[Vec<f64>]| -> Result<Array4<f64>, SimError> {
            let matrix = to_grid(name, rows, (ages, ages))?;
            Ok(Array4::from_shape_fn((ages, risks, ages, risks), |(a, _, b, m)| {
                matrix[[a, b]] * share[[b, m]]
            }))
        };
        Ok(ContactModel {
            all: split("contacts.all", &contacts.all)?,
            school: split("contacts.school", &contacts.school)?,
            work: split("contacts.work", &contacts.work)?,
        })
    }

    /// The contact operator in effect for one day.
    ///
    /// Closed settings are removed according to the day type and school closures, the
    /// remainder is scaled by `1 - transmission_reduction`, and contacts of the high-risk
    /// group and of the oldest age group are further scaled by `1 - cocooning`.
    #[must_use]
    pub fn effective_phi(
        &self,
        schools_closed: bool,
        cocooning: f64,
        transmission_reduction: f64,
        day_type: DayType,
    ) -> Array4<f64> {
        let mut phi = match day_type {
            DayType::Weekday if schools_closed => &self.all - &self.school,
            DayType::Weekday => self.all.clone(),
            DayType::Weekend | DayType::Holiday => &self.all - &self.school - &self.work,
            DayType::LongHoliday => &self.all - &self.school,
        };
        phi.mapv_inplace(|x| x.max(0.0) * (1.0 - transmission_reduction));

        if cocooning > 0.0 {
            let (ages, risks, _, _) = phi.dim();
            let keep = 1.0 - cocooning;
            for a in 0..ages {
                for l in 0..risks {
                    if l == risks - 1 || a == ages - 1 {
                        phi.slice_mut(s![a, l, .., ..]).mapv_inplace(|x| x * keep);
                    }
                }
            }
        }
        phi
    }
}

#[derive(Clone, Debug)]
pub struct City {
    pub name: String,
    pub population: Array2<f64>,
    pub icu_capacity: f64,
    pub substeps: usize,
    pub initial_infected: Array2<f64>,
    pub calendar: Calendar,
    pub contacts: ContactModel,
    pub epi: EpiConfig,
    pub history: HistoricalData,
    pub variants: VariantPool,
    pub icu_adjustment: Option<IcuAdjustment>,
}

impl City {
    /// # Errors
    ///
    /// Returns a `SimError` if any part of the configuration is inconsistent.
    pub fn from_config(config: CityConfig) -> Result<City, SimError> {
        let ages = config.population.len();
        let risks = config.population.first().map_or(0, Vec::len);
        if ages == 0 || risks == 0 {
            return Err(SimError::ConfigError(
                "population needs at least one age and one risk group".to_string(),
            ));
        }
        let shape = (ages, risks);
        let population = to_grid("population", &config.population, shape)?;
        let initial_infected = to_grid("initial_infected", &config.initial_infected, shape)?;
        if population.iter().any(|n| *n < 0.0)
            || ndarray::Zip::from(&initial_infected)
                .and(&population)
                .fold(false, |bad, &i, &n| bad || i < 0.0 || i > n)
        {
            return Err(SimError::ConfigError(
                "initial infections must lie between zero and the population".to_string(),
            ));
        }
        if config.step_size == 0 {
            return Err(SimError::ConfigError("step_size must be positive".to_string()));
        }
        config.epi.validate(shape)?;
        config.variants.validate()?;

        let calendar = Calendar::new(&config.calendar)?;
        if config.history.hospital_census.len() > calendar.len() {
            return Err(SimError::ConfigError(format!(
                "{} days of hospital census exceed the {}-day calendar",
                config.history.hospital_census.len(),
                calendar.len()
            )));
        }
        let contacts = ContactModel::new(&config.contacts, &population)?;

        Ok(City {
            name: config.name,
            population,
            icu_capacity: config.icu_capacity,
            substeps: config.step_size,
            initial_infected,
            calendar,
            contacts,
            epi: config.epi,
            history: config.history,
            variants: config.variants,
            icu_adjustment: config.icu_adjustment,
        })
    }

    /// # Errors
    ///
    /// Returns a `SimError` if the file cannot be read or is inconsistent.
    pub fn load(path: &Path) -> Result<City, SimError> {
        City::from_config(load_json(path)?)
    }

    /// `(A, L)`
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        self.population.dim()
    }

    /// Total population of each age group.
    #[must_use]
    pub fn age_totals(&self) -> Array1<f64> {
        self.population.sum_axis(Axis(1))
    }

    /// Number of days covered by historical hospital data.
    #[must_use]
    pub fn t_historical_data_end(&self) -> usize {
        self.history.hospital_census.len()
    }

    /// Multiplier for the hospital-to-ICU ratio on day `t`.
    #[must_use]
    pub fn icu_ratio_scale(&self, t: usize) -> f64 {
        let Some(adjustment) = &self.icu_adjustment else {
            return 1.0;
        };
        let (Some(start), Some(end)) = (
            self.calendar.index_of(adjustment.start),
            self.calendar.index_of(adjustment.end),
        ) else {
            return 1.0;
        };
        if start < t && t <= end {
            adjustment.rate
        } else {
            1.0
        }
    }
}
