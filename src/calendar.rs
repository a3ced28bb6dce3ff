//! Mapping from simulation day to calendar date.
//!
//! Every day carries a [`DayType`] (which contact settings are open) and, for days
//! covered by historical data, an optional fixed transmission reduction. Days with a
//! fixed reduction replay history and bypass the intervention policy.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::SimError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DayType {
    Weekday,
    Weekend,
    Holiday,
    LongHoliday,
}

/// A transmission reduction observed over an inclusive date range.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FixedTransmission {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub transmission_reduction: f64,
    #[serde(default)]
    pub cocooning: f64,
    #[serde(default)]
    pub school_closure: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalendarConfig {
    pub start_date: NaiveDate,
    pub num_days: usize,
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
    #[serde(default)]
    pub long_holidays: Vec<NaiveDate>,
    #[serde(default)]
    pub fixed_transmission: Vec<FixedTransmission>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub day_type: DayType,
    pub fixed_transmission_reduction: Option<f64>,
    pub fixed_cocooning: f64,
    pub schools_closed: bool,
}

#[derive(Clone, Debug)]
pub struct Calendar {
    days: Vec<CalendarDay>,
}

impl Calendar {
    /// # Errors
    ///
    /// Returns `SimError::CalendarError` if a fixed transmission range is inverted or a
    /// reduction lies outside `[0, 1]`.
    pub fn new(config: &CalendarConfig) -> Result<Calendar, SimError> {
        for fixed in &config.fixed_transmission {
            if fixed.end < fixed.start {
                return Err(SimError::CalendarError(format!(
                    "fixed transmission range {}..{} ends before it starts",
                    fixed.start, fixed.end
                )));
            }
            if !(0.0..=1.0).contains(&fixed.transmission_reduction)
                || !(0.0..=1.0).contains(&fixed.cocooning)
            {
                return Err(SimError::CalendarError(format!(
                    "fixed transmission values starting {} must lie in [0, 1]",
                    fixed.start
                )));
            }
        }

        let days = (0..config.num_days)
            .map(|t| {
                let date = config.start_date + Duration::days(t as i64);
                let day_type = if config.long_holidays.contains(&date) {
                    DayType::LongHoliday
                } else if config.holidays.contains(&date) {
                    DayType::Holiday
                } else if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                    DayType::Weekend
                } else {
                    DayType::Weekday
                };
                // Later ranges override earlier ones.
                let fixed = config
                    .fixed_transmission
                    .iter()
                    .rev()
                    .find(|f| f.start <= date && date <= f.end);
                CalendarDay {
                    date,
                    day_type,
                    fixed_transmission_reduction: fixed.map(|f| f.transmission_reduction),
                    fixed_cocooning: fixed.map_or(0.0, |f| f.cocooning),
                    schools_closed: fixed.is_some_and(|f| f.school_closure),
                }
            })
            .collect();
        Ok(Calendar { days })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.days.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// # Errors
    ///
    /// Returns `SimError::CalendarError` when `t` is past the end of the calendar.
    pub fn day(&self, t: usize) -> Result<&CalendarDay, SimError> {
        self.days.get(t).ok_or_else(|| {
            SimError::CalendarError(format!(
                "day {t} is beyond the calendar ({} days)",
                self.days.len()
            ))
        })
    }

    /// # Errors
    ///
    /// Returns `SimError::CalendarError` when `t` is past the end of the calendar.
    pub fn date(&self, t: usize) -> Result<NaiveDate, SimError> {
        self.day(t).map(|day| day.date)
    }

    /// Number of leading days whose transmission reduction is fixed.
    #[must_use]
    pub fn fixed_days(&self) -> usize {
        self.days
            .iter()
            .take_while(|day| day.fixed_transmission_reduction.is_some())
            .count()
    }

    /// Day index of `date`, if it falls inside the calendar.
    #[must_use]
    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        let start = self.days.first()?.date;
        let offset = usize::try_from((date - start).num_days()).ok()?;
        (offset < self.days.len()).then_some(offset)
    }
}
