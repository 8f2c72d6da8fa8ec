//! Backfill Runner: full-history recomputation, fanned out per track.
//!
//! Every selected track is processed by exactly one task. A task takes the
//! track's lease, replays the requested range through a tracker seeded with
//! the extremes recorded before the range, persists the records and moves
//! the cursor, then releases the lease. The lease is renewed before the
//! write; a task that lost it writes nothing. Tasks are independent: one
//! track failing never affects another.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use milestone_core::error::CoreError;
use milestone_core::metric::Metric;
use milestone_core::period::Period;
use milestone_core::record::MilestoneRecord;
use milestone_core::track::Track;
use milestone_core::tracker::track_extremes;
use milestone_core::types::Timestamp;
use milestone_core::PartitionCatalog;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;
use crate::retry::{with_backoff, RetryConfig};
use crate::store::{renew_lease, seed_state, Stores};

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Tracks processed at once.
    pub concurrency: usize,
    pub lease_ttl: Duration,
    /// Lease holder id.
    pub holder: String,
    pub retry: RetryConfig,
}

/// Which tracks to rebuild and over what range. `None` filters select
/// everything the catalog defines.
#[derive(Debug, Clone)]
pub struct BackfillRequest {
    pub start: Timestamp,
    pub end: Timestamp,
    pub metrics: Option<Vec<Metric>>,
    pub networks: Option<Vec<String>>,
    pub periods: Option<Vec<Period>>,
}

impl BackfillRequest {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self {
            start,
            end,
            metrics: None,
            networks: None,
            periods: None,
        }
    }

    pub fn with_metrics(mut self, metrics: impl Into<Vec<Metric>>) -> Self {
        self.metrics = Some(metrics.into());
        self
    }

    pub fn with_networks<S: Into<String>>(mut self, networks: impl IntoIterator<Item = S>) -> Self {
        self.networks = Some(networks.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_periods(mut self, periods: impl Into<Vec<Period>>) -> Self {
        self.periods = Some(periods.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackFailure {
    pub track: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Tracks leased by another worker, or not reached before cancellation.
    pub skipped: usize,
    pub records_emitted: usize,
    pub failures: Vec<TrackFailure>,
}

impl BackfillReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

pub struct BackfillRunner {
    catalog: Arc<PartitionCatalog>,
    stores: Stores,
    config: Arc<BackfillConfig>,
}

impl BackfillRunner {
    pub fn new(catalog: Arc<PartitionCatalog>, stores: Stores, config: BackfillConfig) -> Self {
        Self {
            catalog,
            stores,
            config: Arc::new(config),
        }
    }

    /// Resolve a request into the tracks it covers.
    ///
    /// Rejects an empty range, unknown networks and periods that none of
    /// the requested metrics is tracked at, before any work starts.
    pub fn plan(&self, request: &BackfillRequest) -> Result<Vec<Track>, CoreError> {
        if request.start >= request.end {
            return Err(CoreError::Validation(format!(
                "Backfill start {} must be before end {}",
                request.start, request.end
            )));
        }

        if let Some(networks) = &request.networks {
            for code in networks {
                if self.catalog.network(code).is_none() {
                    return Err(CoreError::Validation(format!("Unknown network '{code}'")));
                }
            }
        }

        let metrics: Vec<Metric> = request
            .metrics
            .clone()
            .unwrap_or_else(|| Metric::ALL.to_vec());

        if let Some(periods) = &request.periods {
            for period in periods {
                let tracked = metrics
                    .iter()
                    .any(|m| PartitionCatalog::periods_for(*m).contains(period));
                if !tracked {
                    return Err(CoreError::UnsupportedTrack {
                        metric: metrics
                            .iter()
                            .map(|m| m.as_str())
                            .collect::<Vec<_>>()
                            .join(","),
                        period: period.to_string(),
                        partition: "*".to_string(),
                    });
                }
            }
        }

        let tracks: Vec<Track> = metrics
            .iter()
            .flat_map(|m| self.catalog.tracks(*m))
            .filter(|t| {
                request
                    .networks
                    .as_ref()
                    .map_or(true, |n| n.iter().any(|code| code == t.partition.network()))
            })
            .filter(|t| {
                request
                    .periods
                    .as_ref()
                    .map_or(true, |p| p.contains(&t.period))
            })
            .collect();

        if tracks.is_empty() {
            return Err(CoreError::Validation(
                "Backfill request selects no tracks".to_string(),
            ));
        }
        Ok(tracks)
    }

    /// Rebuild every track the request selects.
    ///
    /// Returns `Err` only when the request itself is invalid. Per-track
    /// failures are reported in [`BackfillReport::failures`].
    pub async fn run(
        &self,
        request: &BackfillRequest,
        cancel: &CancellationToken,
    ) -> Result<BackfillReport, WorkerError> {
        let tracks = self.plan(request)?;
        tracing::info!(
            tracks = tracks.len(),
            start = %request.start,
            end = %request.end,
            concurrency = self.config.concurrency,
            "Backfill starting",
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut set = JoinSet::new();

        for track in tracks {
            let catalog = Arc::clone(&self.catalog);
            let stores = self.stores.clone();
            let config = Arc::clone(&self.config);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let (start, end) = (request.start, request.end);

            set.spawn(async move {
                let key = track.key();
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        backfill_track(&catalog, &stores, &config, &cancel, &track, start, end).await
                    }
                    Err(_) => Err(WorkerError::Cancelled),
                };
                (key, result)
            });
        }

        let mut report = BackfillReport::default();
        while let Some(joined) = set.join_next().await {
            let (key, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(error = %e, "Backfill task panicked");
                    report.failed += 1;
                    report.failures.push(TrackFailure {
                        track: "unknown".to_string(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            match result {
                Ok(records) => {
                    report.succeeded += 1;
                    report.records_emitted += records;
                }
                Err(WorkerError::LeaseHeld(_)) => {
                    tracing::info!(track = %key, "Track leased elsewhere, skipping");
                    report.skipped += 1;
                }
                Err(WorkerError::Cancelled) => {
                    report.skipped += 1;
                }
                Err(e) => {
                    if e.is_invariant_violation() {
                        tracing::error!(track = %key, error = %e, "Backfill invariant violated");
                    } else {
                        tracing::error!(track = %key, error = %e, "Backfill track failed");
                    }
                    report.failed += 1;
                    report.failures.push(TrackFailure {
                        track: key,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            records = report.records_emitted,
            cancelled = cancel.is_cancelled(),
            "Backfill finished",
        );
        Ok(report)
    }
}

/// Rebuild one track under its lease. Returns the number of records emitted.
async fn backfill_track(
    catalog: &PartitionCatalog,
    stores: &Stores,
    config: &BackfillConfig,
    cancel: &CancellationToken,
    track: &Track,
    start: Timestamp,
    end: Timestamp,
) -> Result<usize, WorkerError> {
    if cancel.is_cancelled() {
        return Err(WorkerError::Cancelled);
    }

    let key = track.key();
    let rules = catalog.rules(track)?;
    let calendar = catalog.calendar(track.partition.network())?;
    // Only whole buckets: a partial trailing bucket would be skipped by the
    // live runner once the cursor sits on it.
    let start = calendar.bucket_start(start, track.period);
    let end = calendar.bucket_start(end, track.period);

    let acquired = with_backoff(&config.retry, cancel, &key, || {
        stores.leases.try_acquire(&key, &config.holder, config.lease_ttl)
    })
    .await?;
    if !acquired {
        return Err(WorkerError::LeaseHeld(key));
    }

    let result = with_backoff(&config.retry, cancel, &key, || async {
        let samples = stores.source.fetch_samples(track, start, end).await?;
        let initial = seed_state(stores.milestones.as_ref(), track, start).await?;
        let output = track_extremes(track.clone(), rules, initial, &samples)?;
        check_unique(track, &output.records)?;

        renew_lease(stores.leases.as_ref(), &key, &config.holder, config.lease_ttl).await?;
        stores.milestones.upsert_records(&output.records).await?;
        if let Some(last) = output.state.last_bucket {
            let bucket = calendar.bucket_start(last, track.period);
            stores.milestones.advance_cursor(track, bucket).await?;
        }

        tracing::debug!(
            track = %key,
            samples = samples.len(),
            records = output.records.len(),
            "Backfilled track",
        );
        Ok::<_, WorkerError>(output.records.len())
    })
    .await;

    if let Err(e) = stores.leases.release(&key, &config.holder).await {
        tracing::warn!(track = %key, error = %e, "Failed to release lease");
    }
    result
}

/// A run must never produce two records with the same instance id, or two
/// records of one kind in the same bucket.
fn check_unique(track: &Track, records: &[MilestoneRecord]) -> Result<(), CoreError> {
    let mut ids = HashSet::with_capacity(records.len());
    let mut buckets = HashSet::with_capacity(records.len());
    for record in records {
        if !ids.insert(record.instance_id)
            || !buckets.insert((record.bucket_time, record.aggregate_kind))
        {
            return Err(CoreError::InvariantViolation(format!(
                "{track}: duplicate record at {} ({})",
                record.bucket_time, record.instance_id
            )));
        }
    }
    Ok(())
}
