//! Postgres-backed adapters over the `milestone-db` repositories.

use std::time::Duration;

use async_trait::async_trait;
use milestone_core::record::{AggregateKind, ExtremeState, MetricSample, MilestoneRecord};
use milestone_core::track::Track;
use milestone_core::types::Timestamp;
use milestone_db::repositories::{MetricBucketRepo, MilestoneRepo, TrackCursorRepo, TrackLeaseRepo};
use milestone_db::DbPool;

use crate::error::WorkerError;
use crate::store::{MilestoneStore, SampleSource, TrackLease};

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SampleSource for PgStore {
    async fn fetch_samples(
        &self,
        track: &Track,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<MetricSample>, WorkerError> {
        Ok(MetricBucketRepo::fetch(&self.pool, track, start, end).await?)
    }
}

#[async_trait]
impl MilestoneStore for PgStore {
    async fn upsert_records(&self, records: &[MilestoneRecord]) -> Result<u64, WorkerError> {
        Ok(MilestoneRepo::upsert_batch(&self.pool, records).await?)
    }

    async fn current_state(
        &self,
        track: &Track,
        kind: AggregateKind,
    ) -> Result<Option<ExtremeState>, WorkerError> {
        Ok(MilestoneRepo::current_state(&self.pool, track, kind).await?)
    }

    async fn state_before(
        &self,
        track: &Track,
        kind: AggregateKind,
        before: Timestamp,
    ) -> Result<Option<ExtremeState>, WorkerError> {
        Ok(MilestoneRepo::state_before(&self.pool, track, kind, before).await?)
    }

    async fn cursor(&self, track: &Track) -> Result<Option<Timestamp>, WorkerError> {
        Ok(TrackCursorRepo::last_bucket(&self.pool, track).await?)
    }

    async fn advance_cursor(&self, track: &Track, bucket: Timestamp) -> Result<(), WorkerError> {
        let moved = TrackCursorRepo::advance(&self.pool, track, bucket).await?;
        if !moved {
            tracing::debug!(track = %track, bucket = %bucket, "Cursor already at or past bucket");
        }
        Ok(())
    }
}

#[async_trait]
impl TrackLease for PgStore {
    async fn try_acquire(
        &self,
        track_key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, WorkerError> {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        Ok(TrackLeaseRepo::try_acquire(&self.pool, track_key, holder, ttl_secs).await?)
    }

    async fn release(&self, track_key: &str, holder: &str) -> Result<(), WorkerError> {
        TrackLeaseRepo::release(&self.pool, track_key, holder).await?;
        Ok(())
    }
}
