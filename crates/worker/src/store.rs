//! Seams between the runners and the outside world.
//!
//! Three collaborators, each behind an async trait so the runners can be
//! driven against Postgres in production and in memory in tests:
//! - [`SampleSource`]: pre-bucketed samples per track
//! - [`MilestoneStore`]: idempotent record persistence, extreme state and
//!   the per-track cursor
//! - [`TrackLease`]: cross-process mutual exclusion per track

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use milestone_core::record::{
    AggregateKind, ExtremeState, MetricSample, MilestoneRecord, TrackState,
};
use milestone_core::track::Track;
use milestone_core::types::Timestamp;

use crate::error::WorkerError;

#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Samples for `track` with `start <= bucket_time < end`, in ascending
    /// bucket order, already bucketed at the track's period.
    async fn fetch_samples(
        &self,
        track: &Track,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<MetricSample>, WorkerError>;
}

#[async_trait]
pub trait MilestoneStore: Send + Sync {
    /// Persist records. Records already present (same natural key) are
    /// skipped. Returns the number newly written.
    async fn upsert_records(&self, records: &[MilestoneRecord]) -> Result<u64, WorkerError>;

    /// The standing extreme: the highest HIGH or lowest LOW on record.
    async fn current_state(
        &self,
        track: &Track,
        kind: AggregateKind,
    ) -> Result<Option<ExtremeState>, WorkerError>;

    /// The standing extreme among records in buckets before `before`.
    async fn state_before(
        &self,
        track: &Track,
        kind: AggregateKind,
        before: Timestamp,
    ) -> Result<Option<ExtremeState>, WorkerError>;

    /// Last bucket fully processed for `track`.
    async fn cursor(&self, track: &Track) -> Result<Option<Timestamp>, WorkerError>;

    /// Move the cursor to `bucket`. Never moves it backwards.
    async fn advance_cursor(&self, track: &Track, bucket: Timestamp) -> Result<(), WorkerError>;
}

#[async_trait]
pub trait TrackLease: Send + Sync {
    /// Take or renew the lease on `track_key`. Returns `false` if another
    /// holder has an unexpired lease.
    async fn try_acquire(
        &self,
        track_key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, WorkerError>;

    async fn release(&self, track_key: &str, holder: &str) -> Result<(), WorkerError>;
}

/// The collaborators a runner works against.
#[derive(Clone)]
pub struct Stores {
    pub source: Arc<dyn SampleSource>,
    pub milestones: Arc<dyn MilestoneStore>,
    pub leases: Arc<dyn TrackLease>,
}

impl Stores {
    /// Use one adapter for all three roles.
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: SampleSource + MilestoneStore + TrackLease + 'static,
    {
        Self {
            source: store.clone(),
            milestones: store.clone(),
            leases: store,
        }
    }
}

/// Everything a tracker needs to resume `track`: the current HIGH and LOW
/// plus the cursor as the last consumed bucket.
pub async fn load_state(
    store: &dyn MilestoneStore,
    track: &Track,
) -> Result<TrackState, WorkerError> {
    Ok(TrackState {
        high: store.current_state(track, AggregateKind::High).await?,
        low: store.current_state(track, AggregateKind::Low).await?,
        last_bucket: store.cursor(track).await?,
    })
}

/// State for replaying `track` from `start`: the extremes recorded before
/// it, with nothing consumed yet.
pub async fn seed_state(
    store: &dyn MilestoneStore,
    track: &Track,
    start: Timestamp,
) -> Result<TrackState, WorkerError> {
    Ok(TrackState {
        high: store.state_before(track, AggregateKind::High, start).await?,
        low: store.state_before(track, AggregateKind::Low, start).await?,
        last_bucket: None,
    })
}

/// Renew a lease already held. Fails with [`WorkerError::LeaseHeld`] when
/// it lapsed and another holder took it, so nothing is written under a
/// lost lease.
pub async fn renew_lease(
    leases: &dyn TrackLease,
    track_key: &str,
    holder: &str,
    ttl: Duration,
) -> Result<(), WorkerError> {
    if leases.try_acquire(track_key, holder, ttl).await? {
        Ok(())
    } else {
        Err(WorkerError::LeaseHeld(track_key.to_string()))
    }
}
