//! Live Runner: advances tracks one newly closed bucket at a time.
//!
//! Each tick aligns "now" to the network interval, works out which tracks
//! have a bucket that just closed (or are still behind from an earlier
//! tick) and brings each of them up to date from its persisted cursor and
//! extreme state. A track whose source has no sample for a closed bucket
//! stops there and is retried on the next tick; state never advances past
//! a missing bucket.
//!
//! A track with no cursor first replays its history from
//! [`LiveConfig::history_start`], so its chain matches a backfill. Store
//! calls are retried with backoff within the tick, and the lease is renewed
//! before every write.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use milestone_core::calendar::PeriodCalendar;
use milestone_core::error::CoreError;
use milestone_core::metric::Metric;
use milestone_core::period::Period;
use milestone_core::track::{Track, TrackRules};
use milestone_core::tracker::{track_extremes, ExtremeTracker};
use milestone_core::types::Timestamp;
use milestone_core::PartitionCatalog;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;
use crate::retry::{with_backoff, RetryConfig};
use crate::store::{load_state, renew_lease, seed_state, Stores};

#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Tracks advanced at once within a tick.
    pub concurrency: usize,
    pub lease_ttl: Duration,
    /// Lease holder id.
    pub holder: String,
    /// Consecutive data-not-ready ticks between gap alerts.
    pub gap_alert_ticks: u32,
    /// How often [`LiveRunner::run`] ticks.
    pub tick_interval: Duration,
    /// Where a track with no cursor starts replaying history from.
    pub history_start: Timestamp,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LiveTickReport {
    pub tracks_due: usize,
    pub buckets_processed: usize,
    pub records_emitted: usize,
    pub not_ready: usize,
    pub lease_conflicts: usize,
    pub failed: usize,
}

#[derive(Debug)]
struct LiveTrack {
    track: Track,
    key: String,
    rules: TrackRules,
    calendar: PeriodCalendar,
}

#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    buckets: usize,
    records: usize,
}

pub struct LiveRunner {
    stores: Stores,
    config: Arc<LiveConfig>,
    tracks: Vec<Arc<LiveTrack>>,
    calendars: BTreeMap<String, PeriodCalendar>,
    /// Tracks known to be behind; every track starts here.
    backlog: HashSet<String>,
    /// Consecutive data-not-ready ticks per track.
    gap_ticks: HashMap<String, u32>,
    /// Aligned instant of the previous tick per network.
    last_tick: HashMap<String, Timestamp>,
    /// Stops retries in flight; replaced by the token given to `run`.
    cancel: CancellationToken,
}

impl LiveRunner {
    /// A runner over every track the catalog defines.
    pub fn new(
        catalog: &PartitionCatalog,
        stores: Stores,
        config: LiveConfig,
    ) -> Result<Self, CoreError> {
        let tracks = Metric::ALL
            .iter()
            .flat_map(|m| catalog.tracks(*m))
            .collect();
        Self::for_tracks(catalog, stores, config, tracks)
    }

    /// A runner over a chosen set of tracks, each validated by the catalog.
    pub fn for_tracks(
        catalog: &PartitionCatalog,
        stores: Stores,
        config: LiveConfig,
        tracks: Vec<Track>,
    ) -> Result<Self, CoreError> {
        let mut calendars = BTreeMap::new();
        let mut entries = Vec::with_capacity(tracks.len());
        for track in tracks {
            let rules = catalog.rules(&track)?;
            let network = track.partition.network().to_string();
            let calendar = catalog.calendar(&network)?;
            calendars.insert(network, calendar);
            entries.push(Arc::new(LiveTrack {
                key: track.key(),
                track,
                rules,
                calendar,
            }));
        }

        let backlog = entries.iter().map(|t| t.key.clone()).collect();
        Ok(Self {
            stores,
            config: Arc::new(config),
            tracks: entries,
            calendars,
            backlog,
            gap_ticks: HashMap::new(),
            last_tick: HashMap::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Tracks waiting to be retried on the next tick.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn is_behind(&self, track: &Track) -> bool {
        self.backlog.contains(&track.key())
    }

    pub fn gap_ticks(&self, track: &Track) -> u32 {
        self.gap_ticks.get(&track.key()).copied().unwrap_or(0)
    }

    /// Bring every due track up to date as of `now`.
    pub async fn tick(&mut self, now: Timestamp) -> LiveTickReport {
        let aligned: HashMap<String, Timestamp> = self
            .calendars
            .iter()
            .map(|(code, calendar)| (code.clone(), calendar.bucket_start(now, Period::Interval)))
            .collect();

        let due: Vec<(Arc<LiveTrack>, Timestamp)> = self
            .tracks
            .iter()
            .filter_map(|entry| {
                let network = entry.track.partition.network();
                let at = *aligned.get(network)?;
                let closed = self.period_closed(entry, network, at);
                (closed || self.backlog.contains(&entry.key)).then(|| (Arc::clone(entry), at))
            })
            .collect();

        let mut report = LiveTickReport {
            tracks_due: due.len(),
            ..Default::default()
        };

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut set = JoinSet::new();
        for (entry, at) in due {
            let stores = self.stores.clone();
            let config = Arc::clone(&self.config);
            let semaphore = Arc::clone(&semaphore);
            let cancel = self.cancel.clone();
            set.spawn(async move {
                let mut progress = Progress::default();
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        advance_track(&stores, &config, &cancel, &entry, at, &mut progress).await
                    }
                    Err(_) => Err(WorkerError::Cancelled),
                };
                (entry, progress, result)
            });
        }

        while let Some(joined) = set.join_next().await {
            let (entry, progress, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(error = %e, "Live track task panicked");
                    report.failed += 1;
                    continue;
                }
            };
            report.buckets_processed += progress.buckets;
            report.records_emitted += progress.records;
            self.settle(&entry, result, &mut report);
        }

        self.last_tick.extend(aligned);
        report
    }

    /// Drive [`LiveRunner::tick`] on a fixed interval until `cancel` fires.
    /// Ticks run one after another, never overlapping.
    pub async fn run(&mut self, cancel: CancellationToken) {
        self.cancel = cancel.clone();
        tracing::info!(
            tracks = self.tracks.len(),
            interval_secs = self.config.tick_interval.as_secs(),
            "Live runner started",
        );

        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Live runner stopping");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.tick(Utc::now()).await;
                    if report.tracks_due > 0 {
                        tracing::info!(
                            due = report.tracks_due,
                            buckets = report.buckets_processed,
                            records = report.records_emitted,
                            not_ready = report.not_ready,
                            lease_conflicts = report.lease_conflicts,
                            failed = report.failed,
                            backlog = self.backlog.len(),
                            "Live tick complete",
                        );
                    } else {
                        tracing::debug!("Live tick: nothing due");
                    }
                }
            }
        }
    }

    /// Whether a bucket of the track's period closed since the previous tick
    /// (or closes exactly now, on the first tick).
    fn period_closed(&self, entry: &LiveTrack, network: &str, at: Timestamp) -> bool {
        let period = entry.track.period;
        match self.last_tick.get(network) {
            Some(prev) => at > *prev && entry.calendar.bucket_start(at, period) > *prev,
            None => entry.calendar.closes_period(at, period),
        }
    }

    fn settle(&mut self, entry: &LiveTrack, result: Result<(), WorkerError>, report: &mut LiveTickReport) {
        let key = &entry.key;
        match result {
            Ok(()) => {
                self.backlog.remove(key);
                self.gap_ticks.remove(key);
            }
            Err(WorkerError::DataNotReady { bucket, .. }) => {
                report.not_ready += 1;
                self.backlog.insert(key.clone());
                let ticks = self.gap_ticks.entry(key.clone()).or_insert(0);
                *ticks += 1;
                if *ticks % self.config.gap_alert_ticks.max(1) == 0 {
                    tracing::warn!(
                        track = %key,
                        bucket = %bucket,
                        ticks = *ticks,
                        "Data gap: closed bucket still has no samples",
                    );
                } else {
                    tracing::debug!(track = %key, bucket = %bucket, "Data not ready, will retry");
                }
            }
            Err(WorkerError::LeaseHeld(_)) => {
                report.lease_conflicts += 1;
                self.backlog.insert(key.clone());
                tracing::debug!(track = %key, "Track leased elsewhere, will retry");
            }
            Err(WorkerError::Cancelled) => {
                self.backlog.insert(key.clone());
            }
            Err(e) => {
                report.failed += 1;
                self.backlog.insert(key.clone());
                if e.is_invariant_violation() {
                    tracing::error!(track = %key, error = %e, "Live invariant violated");
                } else {
                    tracing::warn!(track = %key, error = %e, "Live track failed, will retry");
                }
            }
        }
    }
}

/// Process every closed bucket after the track's cursor, in order, under
/// the track's lease.
async fn advance_track(
    stores: &Stores,
    config: &LiveConfig,
    cancel: &CancellationToken,
    entry: &LiveTrack,
    now: Timestamp,
    progress: &mut Progress,
) -> Result<(), WorkerError> {
    let acquired = with_backoff(&config.retry, cancel, &entry.key, || {
        stores
            .leases
            .try_acquire(&entry.key, &config.holder, config.lease_ttl)
    })
    .await?;
    if !acquired {
        return Err(WorkerError::LeaseHeld(entry.key.clone()));
    }

    let result = catch_up(stores, config, cancel, entry, now, progress).await;

    if let Err(e) = stores.leases.release(&entry.key, &config.holder).await {
        tracing::warn!(track = %entry.key, error = %e, "Failed to release lease");
    }
    result
}

async fn catch_up(
    stores: &Stores,
    config: &LiveConfig,
    cancel: &CancellationToken,
    entry: &LiveTrack,
    now: Timestamp,
    progress: &mut Progress,
) -> Result<(), WorkerError> {
    let track = &entry.track;
    let period = track.period;
    let (latest_closed, _) = entry.calendar.period_range(now, period);
    let retry = &config.retry;
    let key = entry.key.as_str();

    let cursor = with_backoff(retry, cancel, key, || stores.milestones.cursor(track)).await?;
    let mut bucket = match cursor {
        Some(last) => entry.calendar.next_bucket(last, period),
        None => bootstrap(stores, config, cancel, entry, latest_closed, progress).await?,
    };

    while bucket <= latest_closed {
        let end = entry.calendar.next_bucket(bucket, period);
        let samples = with_backoff(retry, cancel, key, || {
            stores.source.fetch_samples(track, bucket, end)
        })
        .await?;
        let Some(sample) = samples.first() else {
            return Err(WorkerError::DataNotReady {
                track: entry.key.clone(),
                bucket,
            });
        };

        let state = with_backoff(retry, cancel, key, || {
            load_state(stores.milestones.as_ref(), track)
        })
        .await?;
        let mut tracker = ExtremeTracker::with_state(track.clone(), entry.rules, state);
        let records = tracker.observe(sample)?;

        // Write first; the cursor only moves once the records are durable.
        with_backoff(retry, cancel, key, || {
            renew_lease(stores.leases.as_ref(), key, &config.holder, config.lease_ttl)
        })
        .await?;
        with_backoff(retry, cancel, key, || stores.milestones.upsert_records(&records)).await?;
        with_backoff(retry, cancel, key, || stores.milestones.advance_cursor(track, bucket))
            .await?;

        tracing::debug!(
            track = %entry.key,
            bucket = %bucket,
            records = records.len(),
            "Processed bucket",
        );
        progress.buckets += 1;
        progress.records += records.len();
        bucket = end;
    }
    Ok(())
}

/// First run of a track with no cursor: replay everything from
/// `history_start` up to the latest closed bucket, as a backfill would, and
/// return the bucket to continue from.
async fn bootstrap(
    stores: &Stores,
    config: &LiveConfig,
    cancel: &CancellationToken,
    entry: &LiveTrack,
    latest_closed: Timestamp,
    progress: &mut Progress,
) -> Result<Timestamp, WorkerError> {
    let track = &entry.track;
    let period = track.period;
    let key = entry.key.as_str();
    let start = entry.calendar.bucket_start(config.history_start, period);
    let end = entry.calendar.next_bucket(latest_closed, period);

    let (buckets, records, last) = with_backoff(&config.retry, cancel, key, || async {
        let samples = stores.source.fetch_samples(track, start, end).await?;
        let initial = seed_state(stores.milestones.as_ref(), track, start).await?;
        let output = track_extremes(track.clone(), entry.rules, initial, &samples)?;
        let Some(last) = output.state.last_bucket else {
            return Err(WorkerError::DataNotReady {
                track: entry.key.clone(),
                bucket: latest_closed,
            });
        };
        let last = entry.calendar.bucket_start(last, period);

        renew_lease(stores.leases.as_ref(), key, &config.holder, config.lease_ttl).await?;
        stores.milestones.upsert_records(&output.records).await?;
        stores.milestones.advance_cursor(track, last).await?;
        Ok::<_, WorkerError>((samples.len(), output.records.len(), last))
    })
    .await?;

    tracing::info!(
        track = %key,
        buckets,
        records,
        through = %last,
        "Initialised track from history",
    );
    progress.buckets += buckets;
    progress.records += records;
    Ok(entry.calendar.next_bucket(last, period))
}
