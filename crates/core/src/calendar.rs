//! Period Calendar: bucket boundaries in a network's market time.
//!
//! Networks settle in a fixed local offset (no daylight saving), so every
//! boundary is computed on the local wall clock and converted back to UTC.
//! All functions are pure; "now" is always supplied by the caller.

use chrono::{Datelike, Days, FixedOffset, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

use crate::config::NetworkConfig;
use crate::error::CoreError;
use crate::period::Period;
use crate::types::Timestamp;

/// Largest offset any real network uses, with margin.
const MAX_OFFSET_MINUTES: i32 = 14 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodCalendar {
    offset: FixedOffset,
    interval_secs: i64,
}

impl PeriodCalendar {
    /// Build a calendar for a network in `utc_offset_minutes` local time with
    /// a base interval of `interval_minutes`.
    ///
    /// The interval must divide an hour so buckets line up with the clock.
    pub fn new(utc_offset_minutes: i32, interval_minutes: u32) -> Result<Self, CoreError> {
        if interval_minutes == 0 || interval_minutes > 60 || 60 % interval_minutes != 0 {
            return Err(CoreError::Validation(format!(
                "interval_minutes must divide 60, got {interval_minutes}"
            )));
        }
        if utc_offset_minutes.abs() > MAX_OFFSET_MINUTES {
            return Err(CoreError::Validation(format!(
                "utc_offset_minutes must be within ±{MAX_OFFSET_MINUTES}, got {utc_offset_minutes}"
            )));
        }
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60).ok_or_else(|| {
            CoreError::Validation(format!("Invalid UTC offset: {utc_offset_minutes} minutes"))
        })?;
        Ok(Self {
            offset,
            interval_secs: i64::from(interval_minutes) * 60,
        })
    }

    pub fn for_network(network: &NetworkConfig) -> Result<Self, CoreError> {
        Self::new(network.utc_offset_minutes, network.interval_minutes)
    }

    pub fn interval(&self) -> TimeDelta {
        TimeDelta::seconds(self.interval_secs)
    }

    /// Truncate `t` to the start of the bucket containing it.
    pub fn bucket_start(&self, t: Timestamp, period: Period) -> Timestamp {
        if period == Period::Interval {
            let local_secs = t.timestamp() + i64::from(self.offset.local_minus_utc());
            let rem = local_secs.rem_euclid(self.interval_secs);
            return t
                - TimeDelta::seconds(rem)
                - TimeDelta::nanoseconds(i64::from(t.timestamp_subsec_nanos()));
        }

        let date = self.local(t).date();
        let start = match period {
            Period::Interval | Period::Day => date,
            Period::Week => date - Days::new(u64::from(date.weekday().num_days_from_monday())),
            Period::Month => month_start(date, 0),
            Period::Quarter => month_start(date, date.month0() % 3),
            Period::Season => month_start(date, (date.month0() + 1) % 3),
            Period::Year => month_start(date, date.month0()),
            Period::FinancialYear => month_start(date, (date.month0() + 6) % 12),
        };
        self.utc(start.and_time(NaiveTime::MIN))
    }

    /// True iff `t` is exactly the instant that ends a bucket of `period`
    /// (and therefore starts the next one).
    pub fn closes_period(&self, t: Timestamp, period: Period) -> bool {
        self.bucket_start(t, period) == t
    }

    /// Bounds `(start, end)` of the most recently completed bucket relative
    /// to `t`. `end` is exclusive and equals the start of the bucket that
    /// contains `t`.
    pub fn period_range(&self, t: Timestamp, period: Period) -> (Timestamp, Timestamp) {
        let end = self.bucket_start(t, period);
        (self.previous_bucket(end, period), end)
    }

    /// Start of the bucket following the one starting at `start`.
    pub fn next_bucket(&self, start: Timestamp, period: Period) -> Timestamp {
        self.step(start, period, true)
    }

    /// Start of the bucket preceding the one starting at `start`.
    pub fn previous_bucket(&self, start: Timestamp, period: Period) -> Timestamp {
        self.step(start, period, false)
    }

    fn step(&self, start: Timestamp, period: Period, forward: bool) -> Timestamp {
        let fixed = match period {
            Period::Interval => Some(TimeDelta::seconds(self.interval_secs)),
            Period::Day => Some(TimeDelta::days(1)),
            Period::Week => Some(TimeDelta::days(7)),
            _ => None,
        };
        if let Some(delta) = fixed {
            return if forward { start + delta } else { start - delta };
        }

        let months = Months::new(period.months().unwrap_or(1));
        let local = self.local(start);
        let shifted = if forward {
            local + months
        } else {
            local - months
        };
        self.utc(shifted)
    }

    fn local(&self, t: Timestamp) -> NaiveDateTime {
        t.with_timezone(&self.offset).naive_local()
    }

    fn utc(&self, local: NaiveDateTime) -> Timestamp {
        (local - TimeDelta::seconds(i64::from(self.offset.local_minus_utc()))).and_utc()
    }
}

/// First day of the month `months_back` months before `date`'s month.
fn month_start(date: NaiveDate, months_back: u32) -> NaiveDate {
    let first = date - Days::new(u64::from(date.day0()));
    first - Months::new(months_back)
}
