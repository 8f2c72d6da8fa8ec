//! Repository for the `milestones` table (insert-only).

use milestone_core::record::{AggregateKind, ExtremeState, MilestoneRecord};
use milestone_core::track::Track;
use milestone_core::types::{InstanceId, Timestamp};
use sqlx::PgPool;

use crate::models::milestone::{Milestone, MilestoneState};

/// Column list for `milestones` SELECT queries (includes `id` and `created_at`).
const COLUMNS: &str = "\
    id, instance_id, previous_instance_id, bucket_time, \
    metric, period, partition_descriptor, network, region, fueltech_group, renewable, \
    aggregate_kind, value, percent_change, unit, description, created_at";

/// Column list for `milestones` INSERT statements (excludes auto-generated `id` and `created_at`).
const INSERT_COLUMNS: &str = "\
    instance_id, previous_instance_id, bucket_time, \
    metric, period, partition_descriptor, network, region, fueltech_group, renewable, \
    aggregate_kind, value, percent_change, unit, description";

const INSERT_COLUMN_COUNT: usize = 15;

/// Rows per INSERT statement, keeping well under the 65535 bind limit.
const CHUNK_ROWS: usize = 1000;

/// Provides query operations for milestone records.
pub struct MilestoneRepo;

impl MilestoneRepo {
    /// Insert records, skipping any that already exist.
    ///
    /// A record conflicts on either its natural key or its instance id, so
    /// re-submitting a batch (at-least-once delivery) is a no-op. All chunks
    /// are written in one transaction. Returns the number of new rows.
    pub async fn upsert_batch(pool: &PgPool, records: &[MilestoneRecord]) -> Result<u64, sqlx::Error> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = pool.begin().await?;
        let mut inserted = 0u64;

        for chunk in records.chunks(CHUNK_ROWS) {
            // Build a multi-row VALUES clause.
            let mut query = format!("INSERT INTO milestones ({INSERT_COLUMNS}) VALUES ");
            let mut param_idx = 1usize;
            for (i, _) in chunk.iter().enumerate() {
                if i > 0 {
                    query.push_str(", ");
                }
                query.push('(');
                for j in 0..INSERT_COLUMN_COUNT {
                    if j > 0 {
                        query.push_str(", ");
                    }
                    query.push('$');
                    query.push_str(&param_idx.to_string());
                    param_idx += 1;
                }
                query.push(')');
            }
            query.push_str(" ON CONFLICT DO NOTHING");

            let mut q = sqlx::query(&query);
            for r in chunk {
                q = q
                    .bind(r.instance_id)
                    .bind(r.previous_instance_id)
                    .bind(r.bucket_time)
                    .bind(r.metric.as_str())
                    .bind(r.period.as_str())
                    .bind(r.partition.descriptor())
                    .bind(r.partition.network().to_string())
                    .bind(r.partition.region().map(str::to_string))
                    .bind(r.partition.fueltech_group().map(|g| g.as_str()))
                    .bind(r.partition.renewable())
                    .bind(r.aggregate_kind.as_str())
                    .bind(r.value)
                    .bind(r.percent_change)
                    .bind(r.unit())
                    .bind(r.description());
            }

            inserted += q.execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// The standing extreme for a (track, kind): the highest HIGH or lowest
    /// LOW on record, earliest first on ties. A live run resumes from it.
    pub async fn current_state(
        pool: &PgPool,
        track: &Track,
        kind: AggregateKind,
    ) -> Result<Option<ExtremeState>, sqlx::Error> {
        Self::extreme(pool, track, kind, None).await
    }

    /// The standing extreme among records in buckets before `before`. A
    /// backfill starting at `before` continues the chain from it.
    pub async fn state_before(
        pool: &PgPool,
        track: &Track,
        kind: AggregateKind,
        before: Timestamp,
    ) -> Result<Option<ExtremeState>, sqlx::Error> {
        Self::extreme(pool, track, kind, Some(before)).await
    }

    async fn extreme(
        pool: &PgPool,
        track: &Track,
        kind: AggregateKind,
        before: Option<Timestamp>,
    ) -> Result<Option<ExtremeState>, sqlx::Error> {
        let direction = match kind {
            AggregateKind::High => "DESC",
            AggregateKind::Low => "ASC",
        };
        let query = format!(
            "SELECT value, instance_id, bucket_time FROM milestones \
             WHERE metric = $1 AND period = $2 AND partition_descriptor = $3 \
               AND aggregate_kind = $4 \
               AND ($5::TIMESTAMPTZ IS NULL OR bucket_time < $5) \
             ORDER BY value {direction}, bucket_time ASC \
             LIMIT 1"
        );
        let row = sqlx::query_as::<_, MilestoneState>(&query)
            .bind(track.metric.as_str())
            .bind(track.period.as_str())
            .bind(track.partition.descriptor())
            .bind(kind.as_str())
            .bind(before)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(ExtremeState::from))
    }

    /// All records of a track in bucket order, optionally for one kind.
    pub async fn list_for_track(
        pool: &PgPool,
        track: &Track,
        kind: Option<AggregateKind>,
    ) -> Result<Vec<Milestone>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM milestones \
             WHERE metric = $1 AND period = $2 AND partition_descriptor = $3 \
               AND ($4::TEXT IS NULL OR aggregate_kind = $4) \
             ORDER BY bucket_time ASC, aggregate_kind ASC"
        );
        sqlx::query_as::<_, Milestone>(&query)
            .bind(track.metric.as_str())
            .bind(track.period.as_str())
            .bind(track.partition.descriptor())
            .bind(kind.map(|k| k.as_str()))
            .fetch_all(pool)
            .await
    }

    pub async fn find_by_instance_id(
        pool: &PgPool,
        instance_id: InstanceId,
    ) -> Result<Option<Milestone>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM milestones WHERE instance_id = $1");
        sqlx::query_as::<_, Milestone>(&query)
            .bind(instance_id)
            .fetch_optional(pool)
            .await
    }
}
