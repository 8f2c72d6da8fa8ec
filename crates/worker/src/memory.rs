//! In-process adapters for local runs and tests.
//!
//! Mirrors the Postgres semantics the runners rely on: upserts are no-ops on
//! an existing natural key, cursors only move forward and leases expire.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use milestone_core::record::{AggregateKind, ExtremeState, MetricSample, MilestoneRecord};
use milestone_core::track::Track;
use milestone_core::types::Timestamp;

use crate::error::WorkerError;
use crate::store::{MilestoneStore, SampleSource, TrackLease};

#[derive(Default)]
struct Inner {
    /// Source buckets keyed by track key.
    samples: HashMap<String, BTreeMap<Timestamp, MetricSample>>,
    /// Records keyed by natural key.
    records: BTreeMap<String, MilestoneRecord>,
    cursors: HashMap<String, Timestamp>,
    /// track key -> (holder, expires_at)
    leases: HashMap<String, (String, Timestamp)>,
}

impl Inner {
    /// Highest HIGH or lowest LOW of a track, earliest on ties.
    fn extreme(
        &self,
        track: &Track,
        kind: AggregateKind,
        before: Option<Timestamp>,
    ) -> Option<ExtremeState> {
        let candidates = self.records.values().filter(|r| {
            r.aggregate_kind == kind
                && r.metric == track.metric
                && r.period == track.period
                && r.partition == track.partition
                && before.map_or(true, |b| r.bucket_time < b)
        });
        let best = candidates.reduce(|best, r| {
            let better = match kind {
                AggregateKind::High => r.value > best.value,
                AggregateKind::Low => r.value < best.value,
            };
            if better || (r.value == best.value && r.bucket_time < best.bucket_time) {
                r
            } else {
                best
            }
        });
        best.map(ExtremeState::from)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    failures: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `n` store calls fail with `StoreUnavailable`.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), WorkerError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(WorkerError::StoreUnavailable(
                "memory store: injected failure".to_string(),
            ));
        }
        Ok(())
    }

    /// Add or replace source buckets for a track.
    pub fn insert_samples(&self, track: &Track, samples: &[MetricSample]) {
        let mut inner = self.lock();
        let buckets = inner.samples.entry(track.key()).or_default();
        for sample in samples {
            buckets.insert(sample.bucket_time, *sample);
        }
    }

    /// Records for a track ordered by bucket time, then kind.
    pub fn records_for(&self, track: &Track) -> Vec<MilestoneRecord> {
        let inner = self.lock();
        let mut records: Vec<_> = inner
            .records
            .values()
            .filter(|r| {
                r.metric == track.metric && r.period == track.period && r.partition == track.partition
            })
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.bucket_time, r.aggregate_kind));
        records
    }

    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }
}

#[async_trait]
impl SampleSource for MemoryStore {
    async fn fetch_samples(
        &self,
        track: &Track,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<MetricSample>, WorkerError> {
        self.check_available()?;
        if start >= end {
            return Ok(Vec::new());
        }
        let inner = self.lock();
        Ok(inner
            .samples
            .get(&track.key())
            .map(|buckets| buckets.range(start..end).map(|(_, s)| *s).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl MilestoneStore for MemoryStore {
    async fn upsert_records(&self, records: &[MilestoneRecord]) -> Result<u64, WorkerError> {
        self.check_available()?;
        let mut inner = self.lock();
        let mut inserted = 0;
        for record in records {
            let duplicate_id = inner
                .records
                .values()
                .any(|r| r.instance_id == record.instance_id && r.natural_key() != record.natural_key());
            if duplicate_id {
                continue;
            }
            if let Entry::Vacant(slot) = inner.records.entry(record.natural_key()) {
                slot.insert(record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn current_state(
        &self,
        track: &Track,
        kind: AggregateKind,
    ) -> Result<Option<ExtremeState>, WorkerError> {
        self.check_available()?;
        Ok(self.lock().extreme(track, kind, None))
    }

    async fn state_before(
        &self,
        track: &Track,
        kind: AggregateKind,
        before: Timestamp,
    ) -> Result<Option<ExtremeState>, WorkerError> {
        self.check_available()?;
        Ok(self.lock().extreme(track, kind, Some(before)))
    }

    async fn cursor(&self, track: &Track) -> Result<Option<Timestamp>, WorkerError> {
        self.check_available()?;
        Ok(self.lock().cursors.get(&track.key()).copied())
    }

    async fn advance_cursor(&self, track: &Track, bucket: Timestamp) -> Result<(), WorkerError> {
        self.check_available()?;
        let mut inner = self.lock();
        let cursor = inner.cursors.entry(track.key()).or_insert(bucket);
        if bucket > *cursor {
            *cursor = bucket;
        }
        Ok(())
    }
}

#[async_trait]
impl TrackLease for MemoryStore {
    async fn try_acquire(
        &self,
        track_key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, WorkerError> {
        self.check_available()?;
        let now = Utc::now();
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        let expires_at = now.checked_add_signed(ttl).unwrap_or(Timestamp::MAX_UTC);

        let mut inner = self.lock();
        match inner.leases.get(track_key) {
            Some((current, expiry)) if current != holder && *expiry > now => Ok(false),
            _ => {
                inner
                    .leases
                    .insert(track_key.to_string(), (holder.to_string(), expires_at));
                Ok(true)
            }
        }
    }

    async fn release(&self, track_key: &str, holder: &str) -> Result<(), WorkerError> {
        self.check_available()?;
        let mut inner = self.lock();
        if inner.leases.get(track_key).is_some_and(|(current, _)| current == holder) {
            inner.leases.remove(track_key);
        }
        Ok(())
    }
}
