//! Source sample rows from `metric_buckets`.

use milestone_core::record::MetricSample;
use milestone_core::types::Timestamp;
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, FromRow)]
pub struct MetricBucket {
    pub bucket_time: Timestamp,
    pub value: f64,
    pub sample_count: i32,
}

impl From<MetricBucket> for MetricSample {
    fn from(row: MetricBucket) -> Self {
        MetricSample {
            bucket_time: row.bucket_time,
            value: row.value,
            sample_count: u32::try_from(row.sample_count).unwrap_or(0),
        }
    }
}
