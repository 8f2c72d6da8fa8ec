//! Tracked grid metrics and their per-metric configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A pre-aggregated grid metric that milestones are tracked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Power,
    Energy,
    Emissions,
    Price,
    Demand,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Power,
        Metric::Energy,
        Metric::Emissions,
        Metric::Price,
        Metric::Demand,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Power => "power",
            Metric::Energy => "energy",
            Metric::Emissions => "emissions",
            Metric::Price => "price",
            Metric::Demand => "demand",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Metric::Power | Metric::Demand => "MW",
            Metric::Energy => "MWh",
            Metric::Emissions => "tCO2e",
            Metric::Price => "$/MWh",
        }
    }

    /// Market metrics are reported per market region, never per fuel tech.
    pub fn is_market(self) -> bool {
        matches!(self, Metric::Price | Metric::Demand)
    }

    /// Whether a zero or negative value may set a HIGH record.
    ///
    /// Prices can go negative, so a negative price can still be the highest
    /// seen so far on a fresh track. Physical quantities cannot.
    pub fn allows_non_positive(self) -> bool {
        matches!(self, Metric::Price)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| CoreError::Parse(format!("Unknown metric '{s}'")))
    }
}
