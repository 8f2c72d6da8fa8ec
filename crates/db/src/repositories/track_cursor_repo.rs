//! Repository for the `track_cursors` table.

use milestone_core::track::Track;
use milestone_core::types::Timestamp;
use sqlx::PgPool;

use crate::models::track_cursor::TrackCursor;

const COLUMNS: &str = "track_key, metric, period, partition_descriptor, last_bucket, updated_at";

/// Provides query operations for per-track cursors.
pub struct TrackCursorRepo;

impl TrackCursorRepo {
    pub async fn find(pool: &PgPool, track: &Track) -> Result<Option<TrackCursor>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM track_cursors WHERE track_key = $1");
        sqlx::query_as::<_, TrackCursor>(&query)
            .bind(track.key())
            .fetch_optional(pool)
            .await
    }

    /// Last processed bucket for a track, if it has ever been processed.
    pub async fn last_bucket(pool: &PgPool, track: &Track) -> Result<Option<Timestamp>, sqlx::Error> {
        Ok(Self::find(pool, track).await?.map(|c| c.last_bucket))
    }

    /// Move the cursor forward to `last_bucket`.
    ///
    /// The update only applies when it moves the cursor forward, so a late
    /// or repeated write can never rewind a track. Returns whether the cursor
    /// moved.
    pub async fn advance(
        pool: &PgPool,
        track: &Track,
        last_bucket: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO track_cursors (track_key, metric, period, partition_descriptor, last_bucket) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (track_key) DO UPDATE \
             SET last_bucket = EXCLUDED.last_bucket, updated_at = now() \
             WHERE track_cursors.last_bucket < EXCLUDED.last_bucket",
        )
        .bind(track.key())
        .bind(track.metric.as_str())
        .bind(track.period.as_str())
        .bind(track.partition.descriptor())
        .bind(last_bucket)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
