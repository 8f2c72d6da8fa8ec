//! Repository for the `track_leases` table.
//!
//! A lease is held by one runner at a time. Expired leases can be taken
//! over, so a crashed runner never blocks a track for longer than its TTL.

use sqlx::PgPool;

use crate::models::track_lease::TrackLease;

const COLUMNS: &str = "track_key, holder, acquired_at, expires_at";

/// Provides query operations for per-track leases.
pub struct TrackLeaseRepo;

impl TrackLeaseRepo {
    /// Try to take (or renew) the lease on `track_key` for `ttl_secs`.
    ///
    /// Succeeds when the track is unleased, the existing lease has expired,
    /// or `holder` already owns it.
    pub async fn try_acquire(
        pool: &PgPool,
        track_key: &str,
        holder: &str,
        ttl_secs: i64,
    ) -> Result<bool, sqlx::Error> {
        let acquired = sqlx::query_scalar::<_, String>(
            "INSERT INTO track_leases (track_key, holder, expires_at) \
             VALUES ($1, $2, now() + make_interval(secs => $3)) \
             ON CONFLICT (track_key) DO UPDATE \
             SET holder = EXCLUDED.holder, \
                 acquired_at = now(), \
                 expires_at = EXCLUDED.expires_at \
             WHERE track_leases.expires_at < now() \
                OR track_leases.holder = EXCLUDED.holder \
             RETURNING track_key",
        )
        .bind(track_key)
        .bind(holder)
        .bind(ttl_secs as f64)
        .fetch_optional(pool)
        .await?;
        Ok(acquired.is_some())
    }

    /// Release a lease. Only the holder can release it.
    pub async fn release(pool: &PgPool, track_key: &str, holder: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM track_leases WHERE track_key = $1 AND holder = $2")
            .bind(track_key)
            .bind(holder)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find(pool: &PgPool, track_key: &str) -> Result<Option<TrackLease>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM track_leases WHERE track_key = $1");
        sqlx::query_as::<_, TrackLease>(&query)
            .bind(track_key)
            .fetch_optional(pool)
            .await
    }
}
