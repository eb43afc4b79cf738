//! Absolute and relative date values

use std::fmt;

use chrono::{DateTime, Months, SecondsFormat, TimeDelta, Utc};

use crate::error::{QoreError, Result};

/// A date is either a point in time or a duration broken into calendar fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DateValue {
    /// Point in time
    Absolute(DateTime<Utc>),
    /// Calendar duration
    Relative(RelativeDate),
}

/// Duration expressed in calendar fields; months and years are not fixed-length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RelativeDate {
    /// Years
    pub years: i32,
    /// Months
    pub months: i32,
    /// Days
    pub days: i32,
    /// Hours
    pub hours: i64,
    /// Minutes
    pub minutes: i64,
    /// Seconds
    pub seconds: i64,
    /// Microseconds
    pub microseconds: i64,
}

impl RelativeDate {
    /// Relative date of whole seconds
    pub fn seconds(seconds: i64) -> Self {
        Self {
            seconds,
            ..Default::default()
        }
    }

    /// Relative date of whole days
    pub fn days(days: i32) -> Self {
        Self {
            days,
            ..Default::default()
        }
    }

    /// Relative date of whole months
    pub fn months(months: i32) -> Self {
        Self {
            months,
            ..Default::default()
        }
    }

    /// Approximate length in microseconds (30-day months, 365-day years).
    ///
    /// Saturates at the `i64` bounds.
    pub fn approx_micros(&self) -> i64 {
        let days = (i64::from(self.years) * 365 + i64::from(self.months) * 30).saturating_add(i64::from(self.days));
        let hours = days.saturating_mul(24).saturating_add(self.hours);
        let minutes = hours.saturating_mul(60).saturating_add(self.minutes);
        let secs = minutes.saturating_mul(60).saturating_add(self.seconds);
        secs.saturating_mul(1_000_000).saturating_add(self.microseconds)
    }

    fn checked_add(&self, other: &RelativeDate) -> Option<RelativeDate> {
        Some(RelativeDate {
            years: self.years.checked_add(other.years)?,
            months: self.months.checked_add(other.months)?,
            days: self.days.checked_add(other.days)?,
            hours: self.hours.checked_add(other.hours)?,
            minutes: self.minutes.checked_add(other.minutes)?,
            seconds: self.seconds.checked_add(other.seconds)?,
            microseconds: self.microseconds.checked_add(other.microseconds)?,
        })
    }

    fn checked_neg(&self) -> Option<RelativeDate> {
        Some(RelativeDate {
            years: self.years.checked_neg()?,
            months: self.months.checked_neg()?,
            days: self.days.checked_neg()?,
            hours: self.hours.checked_neg()?,
            minutes: self.minutes.checked_neg()?,
            seconds: self.seconds.checked_neg()?,
            microseconds: self.microseconds.checked_neg()?,
        })
    }

    fn apply_to(&self, dt: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let months = i64::from(self.years) * 12 + i64::from(self.months);
        let shift = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
        let dt = if months >= 0 {
            dt.checked_add_months(shift)?
        } else {
            dt.checked_sub_months(shift)?
        };
        let delta = TimeDelta::try_days(i64::from(self.days))?
            .checked_add(&TimeDelta::try_hours(self.hours)?)?
            .checked_add(&TimeDelta::try_minutes(self.minutes)?)?
            .checked_add(&TimeDelta::try_seconds(self.seconds)?)?
            .checked_add(&TimeDelta::microseconds(self.microseconds))?;
        dt.checked_add_signed(delta)
    }
}

impl DateValue {
    /// Current time
    pub fn now() -> Self {
        DateValue::Absolute(Utc::now())
    }

    /// Absolute date from seconds since the epoch; out-of-range input gives the epoch
    pub fn from_epoch_seconds(secs: i64) -> Self {
        DateValue::Absolute(DateTime::from_timestamp(secs, 0).unwrap_or_default())
    }

    /// Absolute date from microseconds since the epoch
    pub fn from_epoch_micros(micros: i64) -> Self {
        DateValue::Absolute(DateTime::from_timestamp_micros(micros).unwrap_or_default())
    }

    /// True for calendar durations
    pub fn is_relative(&self) -> bool {
        matches!(self, DateValue::Relative(_))
    }

    /// Seconds since the epoch, or approximate length for relative dates
    pub fn epoch_seconds(&self) -> i64 {
        self.epoch_micros().div_euclid(1_000_000)
    }

    /// Microseconds since the epoch, or approximate length for relative dates
    pub fn epoch_micros(&self) -> i64 {
        match self {
            DateValue::Absolute(dt) => dt.timestamp_micros(),
            DateValue::Relative(r) => r.approx_micros(),
        }
    }

    /// Date arithmetic: absolute + relative shifts the point, relative + relative sums fields
    pub fn add(&self, other: &DateValue) -> Result<DateValue> {
        let overflow = || QoreError::ValueError("date arithmetic overflow".to_string());
        match (self, other) {
            (DateValue::Absolute(dt), DateValue::Relative(r))
            | (DateValue::Relative(r), DateValue::Absolute(dt)) => {
                r.apply_to(*dt).map(DateValue::Absolute).ok_or_else(overflow)
            }
            (DateValue::Relative(a), DateValue::Relative(b)) => {
                a.checked_add(b).map(DateValue::Relative).ok_or_else(overflow)
            }
            (DateValue::Absolute(_), DateValue::Absolute(_)) => Err(QoreError::ValueError(
                "cannot add two absolute dates".to_string(),
            )),
        }
    }

    /// Date arithmetic: subtracting two absolute dates yields a relative date
    pub fn subtract(&self, other: &DateValue) -> Result<DateValue> {
        match (self, other) {
            (DateValue::Absolute(a), DateValue::Absolute(b)) => {
                let micros = a
                    .signed_duration_since(*b)
                    .num_microseconds()
                    .ok_or_else(|| QoreError::ValueError("date arithmetic overflow".to_string()))?;
                Ok(DateValue::Relative(RelativeDate {
                    seconds: micros / 1_000_000,
                    microseconds: micros % 1_000_000,
                    ..Default::default()
                }))
            }
            (_, DateValue::Relative(r)) => {
                let negated = r
                    .checked_neg()
                    .ok_or_else(|| QoreError::ValueError("date arithmetic overflow".to_string()))?;
                self.add(&DateValue::Relative(negated))
            }
            (DateValue::Relative(_), DateValue::Absolute(_)) => Err(QoreError::ValueError(
                "cannot subtract an absolute date from a relative date".to_string(),
            )),
        }
    }
}

impl fmt::Display for DateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateValue::Absolute(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::Micros, true)),
            DateValue::Relative(r) => {
                write!(f, "P{}Y{}M{}DT{}H{}M{}", r.years, r.months, r.days, r.hours, r.minutes, r.seconds)?;
                if r.microseconds != 0 {
                    write!(f, ".{:06}", r.microseconds.unsigned_abs())?;
                }
                write!(f, "S")
            }
        }
    }
}
