//! Samples in, milestone records and extreme state out.

use std::fmt;
use std::str::FromStr;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CoreError;
use crate::metric::Metric;
use crate::partition::Partition;
use crate::period::Period;
use crate::track::Track;
use crate::types::{InstanceId, Timestamp};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One pre-aggregated bucket for a track, produced by the sample source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub bucket_time: Timestamp,
    pub value: f64,
    /// Number of base intervals folded into this bucket.
    pub sample_count: u32,
}

impl MetricSample {
    pub fn new(bucket_time: Timestamp, value: f64, sample_count: u32) -> Self {
        Self {
            bucket_time,
            value,
            sample_count,
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregate kind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    High,
    Low,
}

impl AggregateKind {
    pub const ALL: [AggregateKind; 2] = [AggregateKind::High, AggregateKind::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            AggregateKind::High => "high",
            AggregateKind::Low => "low",
        }
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(AggregateKind::High),
            "low" => Ok(AggregateKind::Low),
            other => Err(CoreError::Parse(format!("Unknown aggregate kind '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// The running extreme for one (track, kind) and the record that set it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtremeState {
    pub value: f64,
    pub instance_id: InstanceId,
    pub bucket_time: Timestamp,
}

impl From<&MilestoneRecord> for ExtremeState {
    fn from(record: &MilestoneRecord) -> Self {
        Self {
            value: record.value,
            instance_id: record.instance_id,
            bucket_time: record.bucket_time,
        }
    }
}

/// Everything the tracker carries between runs for one track.
///
/// `last_bucket` is the last bucket the tracker consumed, whether or not it
/// produced a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackState {
    pub high: Option<ExtremeState>,
    pub low: Option<ExtremeState>,
    pub last_bucket: Option<Timestamp>,
}

impl TrackState {
    pub fn get(&self, kind: AggregateKind) -> Option<&ExtremeState> {
        match kind {
            AggregateKind::High => self.high.as_ref(),
            AggregateKind::Low => self.low.as_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A new all-time high or low for a track. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneRecord {
    pub instance_id: InstanceId,
    pub previous_instance_id: Option<InstanceId>,
    pub bucket_time: Timestamp,
    pub metric: Metric,
    pub period: Period,
    pub partition: Partition,
    pub aggregate_kind: AggregateKind,
    pub value: f64,
    pub percent_change: f64,
}

impl MilestoneRecord {
    /// Build the record that supersedes `previous` (if any) on `track`.
    pub fn new(
        track: &Track,
        kind: AggregateKind,
        bucket_time: Timestamp,
        value: f64,
        previous: Option<&ExtremeState>,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            instance_id: instance_id_for(track, kind, bucket_time)?,
            previous_instance_id: previous.map(|p| p.instance_id),
            bucket_time,
            metric: track.metric,
            period: track.period,
            partition: track.partition.clone(),
            aggregate_kind: kind,
            value,
            percent_change: previous.map_or(0.0, |p| percent_change(p.value, value)),
        })
    }

    pub fn track(&self) -> Track {
        Track::new(self.metric, self.period, self.partition.clone())
    }

    /// Natural key: `(bucket_time, metric, period, partition, kind)`.
    pub fn natural_key(&self) -> String {
        natural_key(&self.track(), self.aggregate_kind, self.bucket_time)
    }

    pub fn unit(&self) -> &'static str {
        self.metric.unit()
    }

    /// e.g. `Daily energy high for NEM NSW1 coal`.
    pub fn description(&self) -> String {
        format!(
            "{} {} {} for {}",
            self.period.label(),
            self.metric,
            self.aggregate_kind,
            self.partition.label()
        )
    }
}

fn natural_key(track: &Track, kind: AggregateKind, bucket_time: Timestamp) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        bucket_time.to_rfc3339_opts(SecondsFormat::Secs, true),
        track.metric,
        track.period,
        track.partition.descriptor(),
        kind
    )
}

/// Deterministic, time-sortable id for a record.
///
/// A UUIDv7 whose timestamp is the bucket time and whose remaining bits come
/// from a SHA-256 of the natural key, so the same record always gets the same
/// id no matter which runner produced it. Buckets before the Unix epoch
/// have no UUIDv7 timestamp and are rejected.
pub fn instance_id_for(
    track: &Track,
    kind: AggregateKind,
    bucket_time: Timestamp,
) -> Result<InstanceId, CoreError> {
    let millis = epoch_millis(bucket_time)?;
    let digest = Sha256::digest(natural_key(track, kind, bucket_time).as_bytes());
    let mut bits = [0u8; 10];
    bits.copy_from_slice(&digest[..10]);
    Ok(uuid::Builder::from_unix_timestamp_millis(millis, &bits).into_uuid())
}

/// Milliseconds since the Unix epoch, for buckets that have one.
pub fn epoch_millis(bucket_time: Timestamp) -> Result<u64, CoreError> {
    u64::try_from(bucket_time.timestamp_millis()).map_err(|_| {
        CoreError::Validation(format!("Bucket {bucket_time} is before the Unix epoch"))
    })
}

/// Percent change from `previous` to `value`, relative to `|previous|` so the
/// sign always follows the direction of travel. Rounded to 4 decimal places.
pub fn percent_change(previous: f64, value: f64) -> f64 {
    if previous == 0.0 {
        return 0.0;
    }
    let pct = (value - previous) / previous.abs() * 100.0;
    (pct * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn track() -> Track {
        Track::new(
            Metric::Energy,
            Period::Day,
            Partition::Network {
                network: "NEM".into(),
            },
        )
    }

    #[test]
    fn instance_ids_are_deterministic_per_natural_key() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = instance_id_for(&track(), AggregateKind::High, t).unwrap();
        let b = instance_id_for(&track(), AggregateKind::High, t).unwrap();
        let low = instance_id_for(&track(), AggregateKind::Low, t).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, low);
        assert_eq!(a.get_version_num(), 7);
    }

    #[test]
    fn instance_ids_sort_by_bucket_time() {
        let earlier = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let a = instance_id_for(&track(), AggregateKind::Low, earlier).unwrap();
        let b = instance_id_for(&track(), AggregateKind::High, later).unwrap();
        assert!(a < b);
    }

    #[test]
    fn pre_epoch_buckets_are_rejected() {
        let t = Utc.with_ymd_and_hms(1969, 12, 31, 0, 0, 0).unwrap();
        let result = instance_id_for(&track(), AggregateKind::High, t);
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn percent_change_follows_direction() {
        assert_eq!(percent_change(100.0, 120.0), 20.0);
        assert_eq!(percent_change(100.0, 80.0), -20.0);
        // negative prices: -50 -> -20 is an increase
        assert_eq!(percent_change(-50.0, -20.0), 60.0);
        assert_eq!(percent_change(0.0, 10.0), 0.0);
        assert_eq!(percent_change(3.0, 4.0), 33.3333);
    }

    #[test]
    fn first_record_has_no_predecessor() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = MilestoneRecord::new(&track(), AggregateKind::High, t, 100.0, None).unwrap();
        assert_eq!(record.previous_instance_id, None);
        assert_eq!(record.percent_change, 0.0);
        assert_eq!(record.description(), "Daily energy high for NEM");
        assert_eq!(record.unit(), "MWh");
    }
}
