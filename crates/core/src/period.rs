//! Bucket granularities and their completeness thresholds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Base interval (minutes) the reference thresholds are expressed in.
const REFERENCE_INTERVAL_MINUTES: u32 = 5;

/// A bucket granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Interval,
    Day,
    Week,
    Month,
    Quarter,
    Season,
    Year,
    FinancialYear,
}

impl Period {
    pub const ALL: [Period; 8] = [
        Period::Interval,
        Period::Day,
        Period::Week,
        Period::Month,
        Period::Quarter,
        Period::Season,
        Period::Year,
        Period::FinancialYear,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Interval => "interval",
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Quarter => "quarter",
            Period::Season => "season",
            Period::Year => "year",
            Period::FinancialYear => "financial_year",
        }
    }

    /// Human label used in record descriptions.
    pub fn label(self) -> &'static str {
        match self {
            Period::Interval => "Interval",
            Period::Day => "Daily",
            Period::Week => "Weekly",
            Period::Month => "Monthly",
            Period::Quarter => "Quarterly",
            Period::Season => "Seasonal",
            Period::Year => "Yearly",
            Period::FinancialYear => "Financial year",
        }
    }

    /// Number of calendar months per bucket, or `None` for fixed-width periods.
    pub fn months(self) -> Option<u32> {
        match self {
            Period::Interval | Period::Day | Period::Week => None,
            Period::Month => Some(1),
            Period::Quarter | Period::Season => Some(3),
            Period::Year | Period::FinancialYear => Some(12),
        }
    }

    /// Minimum sample count at a 5-minute base interval.
    fn reference_threshold(self) -> u32 {
        match self {
            Period::Interval => 1,
            Period::Day => 288,
            Period::Week => 2_016,
            Period::Month => 8_000,
            Period::Quarter | Period::Season => 24_000,
            Period::Year | Period::FinancialYear => 98_000,
        }
    }

    /// Default completeness threshold for a network with the given base
    /// interval, scaled from the 5-minute reference and rounded up.
    ///
    /// `interval` is always 1: a single reading is a complete interval.
    pub fn default_threshold(self, interval_minutes: u32) -> u32 {
        if self == Period::Interval {
            return 1;
        }
        let minutes = interval_minutes.max(1);
        let scaled = self.reference_threshold() * REFERENCE_INTERVAL_MINUTES;
        scaled.div_ceil(minutes).max(1)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Period::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| CoreError::Parse(format!("Unknown period '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_thresholds_at_five_minutes() {
        assert_eq!(Period::Interval.default_threshold(5), 1);
        assert_eq!(Period::Day.default_threshold(5), 288);
        assert_eq!(Period::Month.default_threshold(5), 8_000);
        assert_eq!(Period::Quarter.default_threshold(5), 24_000);
        assert_eq!(Period::Year.default_threshold(5), 98_000);
        assert_eq!(Period::FinancialYear.default_threshold(5), 98_000);
    }

    #[test]
    fn thresholds_scale_with_base_interval() {
        assert_eq!(Period::Day.default_threshold(30), 48);
        assert_eq!(Period::Week.default_threshold(30), 336);
        // 8000 * 5 / 30 = 1333.3 -> rounded up
        assert_eq!(Period::Month.default_threshold(30), 1_334);
        assert_eq!(Period::Interval.default_threshold(30), 1);
    }

    #[test]
    fn period_names_round_trip() {
        for period in Period::ALL {
            assert_eq!(period.as_str().parse::<Period>().unwrap(), period);
        }
        assert!("fortnight".parse::<Period>().is_err());
    }
}
