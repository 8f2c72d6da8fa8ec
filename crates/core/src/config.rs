//! Network catalog configuration.
//!
//! Loaded once at process start (built-in defaults or a JSON file) and
//! handed to [`PartitionCatalog::new`](crate::catalog::PartitionCatalog::new),
//! which validates it. Immutable afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::partition::FueltechGroup;
use crate::period::Period;

/// One electricity network and the shape of its data feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network code, e.g. `NEM`.
    pub code: String,
    /// Base interval of the source data in minutes.
    pub interval_minutes: u32,
    /// Fixed market-time offset from UTC in minutes.
    pub utc_offset_minutes: i32,
    /// Market regions tracked within the network.
    #[serde(default)]
    pub regions: Vec<String>,
    /// Explicit completeness thresholds overriding the scaled defaults.
    #[serde(default)]
    pub thresholds: BTreeMap<Period, u32>,
}

impl NetworkConfig {
    /// Minimum sample count a bucket of `period` needs to set a LOW record.
    pub fn threshold(&self, period: Period) -> u32 {
        if period == Period::Interval {
            return 1;
        }
        self.thresholds
            .get(&period)
            .copied()
            .unwrap_or_else(|| period.default_threshold(self.interval_minutes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub networks: Vec<NetworkConfig>,
    #[serde(default = "default_fueltech_groups")]
    pub fueltech_groups: Vec<FueltechGroup>,
}

fn default_fueltech_groups() -> Vec<FueltechGroup> {
    FueltechGroup::ALL.to_vec()
}

impl CatalogConfig {
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        serde_json::from_str(json)
            .map_err(|e| CoreError::Validation(format!("Invalid catalog config: {e}")))
    }
}

impl Default for CatalogConfig {
    /// NEM (UTC+10) and WEM (UTC+8), both on 5-minute intervals.
    fn default() -> Self {
        Self {
            networks: vec![
                NetworkConfig {
                    code: "NEM".into(),
                    interval_minutes: 5,
                    utc_offset_minutes: 600,
                    regions: ["NSW1", "QLD1", "SA1", "TAS1", "VIC1"]
                        .into_iter()
                        .map(String::from)
                        .collect(),
                    thresholds: BTreeMap::new(),
                },
                NetworkConfig {
                    code: "WEM".into(),
                    interval_minutes: 5,
                    utc_offset_minutes: 480,
                    regions: vec!["WEM".into()],
                    thresholds: BTreeMap::new(),
                },
            ],
            fueltech_groups: default_fueltech_groups(),
        }
    }
}
