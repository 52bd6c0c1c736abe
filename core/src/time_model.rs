use chrono::{Days, NaiveDate, NaiveDateTime, Timelike};
use tracing::warn;

use crate::error::Result;
use crate::models::{Day, Meal};
use crate::storage::{self, Storage};

/// Hours `[0, NIGHT_HOUR_THRESHOLD)` still belong to the previous logical day.
pub const NIGHT_HOUR_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeModel {
    threshold: u32,
}

impl Default for TimeModel {
    fn default() -> Self {
        Self::new(NIGHT_HOUR_THRESHOLD)
    }
}

/// Parse "HH:MM". Hours are not capped at 23 because night meals may be stored
/// as 24:xx-26:xx; minutes are clamped to 0-59. A negative hour is rejected.
#[must_use]
pub fn parse_time(time: &str) -> Option<(u32, u32)> {
    let (h, m) = time.split_once(':')?;
    let hh: u32 = h.trim().parse().ok()?;
    let mm: i64 = m.trim().parse().ok()?;
    let mm = u32::try_from(mm.clamp(0, 59)).ok()?;
    Some((hh, mm))
}

/// Display form of a stored time: 24:20 becomes 00:20. Unparseable input is returned as is.
#[must_use]
pub fn format_meal_time(time: &str) -> String {
    match parse_time(time) {
        Some((hh, mm)) => format!("{:02}:{mm:02}", if hh >= 24 { hh - 24 } else { hh }),
        None => time.to_string(),
    }
}

#[must_use]
pub fn next_day(date: NaiveDate) -> NaiveDate {
    date.checked_add_days(Days::new(1)).unwrap_or(date)
}

#[must_use]
pub fn previous_day(date: NaiveDate) -> NaiveDate {
    date.checked_sub_days(Days::new(1)).unwrap_or(date)
}

impl TimeModel {
    /// Threshold is capped at 12 so the "night" never swallows half a day.
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.min(12),
        }
    }

    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// End of the logical day in minutes, e.g. 27:00 for a threshold of 3.
    #[must_use]
    pub fn day_end_minutes(&self) -> u32 {
        (24 + self.threshold) * 60
    }

    /// True for 00:00 up to the threshold. Times already written as 24:xx are not night hours.
    #[must_use]
    pub fn is_night_time(&self, time: Option<&str>) -> bool {
        time.and_then(parse_time)
            .is_some_and(|(hh, _)| hh < self.threshold)
    }

    /// Minutes since the start of the calendar day, shifting night hours past midnight
    /// so 01:30 becomes 25:30.
    #[must_use]
    pub fn time_to_minutes(&self, time: Option<&str>) -> Option<u32> {
        let (hh, mm) = parse_time(time?)?;
        let hh = if hh < self.threshold { hh + 24 } else { hh };
        Some(hh * 60 + mm)
    }

    /// Logical day a meal logged at `time` under `calendar_date` belongs to.
    #[must_use]
    pub fn effective_date(&self, time: Option<&str>, calendar_date: NaiveDate) -> NaiveDate {
        if self.is_night_time(time) {
            previous_day(calendar_date)
        } else {
            calendar_date
        }
    }

    /// Calendar date a meal of logical day `logical` at `time` is stored under.
    #[must_use]
    pub fn storage_date_for(&self, logical: NaiveDate, time: Option<&str>) -> NaiveDate {
        if self.is_night_time(time) {
            next_day(logical)
        } else {
            logical
        }
    }

    #[must_use]
    pub fn effective_today(&self, now: NaiveDateTime) -> NaiveDate {
        if now.hour() < self.threshold {
            previous_day(now.date())
        } else {
            now.date()
        }
    }

    /// Hours for a picker wheel: threshold..23 then 0..threshold.
    #[must_use]
    pub fn hours_order(&self) -> Vec<u32> {
        (self.threshold..24).chain(0..self.threshold).collect()
    }

    #[must_use]
    pub fn wheel_index_to_hour(&self, idx: usize) -> u32 {
        self.hours_order()
            .get(idx)
            .copied()
            .unwrap_or_else(|| u32::try_from(idx).unwrap_or(0))
    }

    #[must_use]
    pub fn hour_to_wheel_index(&self, hour: u32) -> usize {
        let normalized = if hour >= 24 { hour - 24 } else { hour };
        self.hours_order()
            .iter()
            .position(|h| *h == normalized)
            .unwrap_or(0)
    }

    /// Meals of a logical day: `day` minus its night hours, plus the night hours of `next`.
    /// Night meals always sort after the rest.
    #[must_use]
    pub fn assemble_meals(&self, day: &Day, next: &Day) -> Vec<Meal> {
        let mut meals: Vec<Meal> = day
            .meals
            .iter()
            .filter(|m| !self.is_night_time(m.time.as_deref()))
            .chain(
                next.meals
                    .iter()
                    .filter(|m| self.is_night_time(m.time.as_deref())),
            )
            .cloned()
            .collect();
        meals.sort_by_key(|m| {
            let time = m.time.as_deref();
            (self.is_night_time(time), self.time_to_minutes(time))
        });
        meals
    }

    /// Load the meals of logical day `date` from its own record and the next one.
    /// A corrupt day record is skipped, not fatal.
    pub fn load_meals_for_date(&self, storage: &dyn Storage, date: NaiveDate) -> Result<Vec<Meal>> {
        let day = load_day_lenient(storage, date)?;
        let next = load_day_lenient(storage, next_day(date))?;
        Ok(self.assemble_meals(&day, &next))
    }
}

fn load_day_lenient(storage: &dyn Storage, date: NaiveDate) -> Result<Day> {
    match storage::load_day(storage, date) {
        Ok(day) => Ok(day),
        Err(e @ crate::error::LarderError::MalformedStorageRecord { .. }) => {
            warn!(%date, error = %e, "skipping malformed day record");
            Ok(Day::empty(date))
        }
        Err(e) => Err(e),
    }
}
