//! Repository for the `metric_buckets` source table.
//!
//! The milestone worker only reads buckets. `upsert_batch` exists for the
//! aggregation layer and for seeding test data.

use milestone_core::record::MetricSample;
use milestone_core::track::Track;
use milestone_core::types::Timestamp;
use sqlx::PgPool;

use crate::models::metric_bucket::MetricBucket;

/// Provides query operations for pre-bucketed source samples.
pub struct MetricBucketRepo;

impl MetricBucketRepo {
    /// Samples for a track with `start <= bucket_time < end`, oldest first.
    pub async fn fetch(
        pool: &PgPool,
        track: &Track,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<MetricSample>, sqlx::Error> {
        let rows = sqlx::query_as::<_, MetricBucket>(
            "SELECT bucket_time, value, sample_count FROM metric_buckets \
             WHERE metric = $1 AND period = $2 AND partition_descriptor = $3 \
               AND bucket_time >= $4 AND bucket_time < $5 \
             ORDER BY bucket_time ASC",
        )
        .bind(track.metric.as_str())
        .bind(track.period.as_str())
        .bind(track.partition.descriptor())
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(MetricSample::from).collect())
    }

    /// Insert or replace samples for a track.
    pub async fn upsert_batch(
        pool: &PgPool,
        track: &Track,
        samples: &[MetricSample],
    ) -> Result<(), sqlx::Error> {
        let descriptor = track.partition.descriptor();
        let mut tx = pool.begin().await?;
        for sample in samples {
            sqlx::query(
                "INSERT INTO metric_buckets \
                     (metric, period, partition_descriptor, bucket_time, value, sample_count) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (metric, period, partition_descriptor, bucket_time) DO UPDATE \
                 SET value = EXCLUDED.value, sample_count = EXCLUDED.sample_count",
            )
            .bind(track.metric.as_str())
            .bind(track.period.as_str())
            .bind(&descriptor)
            .bind(sample.bucket_time)
            .bind(sample.value)
            .bind(i32::try_from(sample.sample_count).unwrap_or(i32::MAX))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
