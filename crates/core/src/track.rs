//! A track: one independent (metric, period, partition) extrema sequence.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::metric::Metric;
use crate::partition::Partition;
use crate::period::Period;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Track {
    pub metric: Metric,
    pub period: Period,
    pub partition: Partition,
}

impl Track {
    pub fn new(metric: Metric, period: Period, partition: Partition) -> Self {
        Self {
            metric,
            period,
            partition,
        }
    }

    /// Stable string key, used for leases, cursors and log fields.
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.metric, self.period, self.partition.descriptor())
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Per-track tracker parameters resolved from metric and network config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackRules {
    pub completeness_threshold: u32,
    pub allow_non_positive: bool,
}
