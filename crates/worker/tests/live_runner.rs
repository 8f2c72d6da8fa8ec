//! Integration tests for the Live Runner over the in-memory store.
//!
//! - Live ticks reproduce a backfill of the same history
//! - Data-not-ready buckets are retried, never skipped
//! - Store outages and lease conflicts leave the track behind, then catch up
//! - Periods are only due when they close
//! - A track with no cursor replays its history first

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use milestone_core::{
    CatalogConfig, CoreError, Metric, MetricSample, MilestoneRecord, Partition, PartitionCatalog,
    Period, Track,
};
use milestone_worker::{
    BackfillConfig, BackfillRequest, BackfillRunner, LiveConfig, LiveRunner, MemoryStore,
    MilestoneStore, RetryConfig, SampleSource, Stores, TrackLease, WorkerError,
};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Midnight in NEM market time (UTC+10) on 2024-01-01 plus `n` days.
fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 12, 31, 14, 0, 0).unwrap() + chrono::Duration::days(n)
}

fn minutes(n: i64) -> chrono::Duration {
    chrono::Duration::minutes(n)
}

fn track(period: Period) -> Track {
    Track::new(
        Metric::Energy,
        period,
        Partition::NetworkRegion {
            network: "NEM".into(),
            region: "SA1".into(),
        },
    )
}

fn catalog() -> PartitionCatalog {
    PartitionCatalog::new(CatalogConfig::default()).unwrap()
}

fn live_config() -> LiveConfig {
    LiveConfig {
        concurrency: 4,
        lease_ttl: Duration::from_secs(60),
        holder: "live-test".into(),
        gap_alert_ticks: 2,
        tick_interval: Duration::from_millis(10),
        history_start: day(-365),
        retry: RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
            max_attempts: 2,
        },
    }
}

fn live(store: &Arc<MemoryStore>, tracks: Vec<Track>) -> LiveRunner {
    LiveRunner::for_tracks(
        &catalog(),
        Stores::from_shared(Arc::clone(store)),
        live_config(),
        tracks,
    )
    .unwrap()
}

/// A history with rises, falls, ties and partial days.
fn history(days: i64) -> Vec<MetricSample> {
    (0..days)
        .map(|n| {
            let value = ((n * 37) % 17) as f64 * 10.0 + 5.0;
            let count = if n % 4 == 1 { 200 } else { 288 };
            MetricSample::new(day(n), value, count)
        })
        .collect()
}

async fn backfilled(samples: &[MetricSample], end: DateTime<Utc>) -> Vec<MilestoneRecord> {
    let store = Arc::new(MemoryStore::new());
    store.insert_samples(&track(Period::Day), samples);
    backfill_days(&store, day(0), end).await;
    store.records_for(&track(Period::Day))
}

async fn backfill_days(store: &Arc<MemoryStore>, start: DateTime<Utc>, end: DateTime<Utc>) {
    let runner = BackfillRunner::new(
        Arc::new(catalog()),
        Stores::from_shared(Arc::clone(store)),
        BackfillConfig {
            concurrency: 8,
            lease_ttl: Duration::from_secs(60),
            holder: "backfill-test".into(),
            retry: RetryConfig::default(),
        },
    );
    let request = BackfillRequest::new(start, end)
        .with_metrics([Metric::Energy])
        .with_networks(["NEM"])
        .with_periods([Period::Day]);
    let report = runner.run(&request, &CancellationToken::new()).await.unwrap();
    assert!(report.is_success());
}

/// Hands the lease to another holder while samples are being read, as if
/// this worker stalled past its lease.
struct LeaseLosingSource {
    store: Arc<MemoryStore>,
}

#[async_trait]
impl SampleSource for LeaseLosingSource {
    async fn fetch_samples(
        &self,
        track: &Track,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, WorkerError> {
        self.store
            .try_acquire(&track.key(), "intruder", Duration::from_secs(60))
            .await?;
        self.store.fetch_samples(track, start, end).await
    }
}

// ---------------------------------------------------------------------------
// Equivalence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_live_ticks_match_backfill() {
    let samples = history(30);
    let expected = backfilled(&samples, day(30)).await;
    assert!(!expected.is_empty());

    let store = Arc::new(MemoryStore::new());
    store.insert_samples(&track(Period::Day), &samples);
    let mut runner = live(&store, vec![track(Period::Day)]);

    for n in 1..=30 {
        let report = runner.tick(day(n)).await;
        assert_eq!(report.tracks_due, 1);
        assert_eq!(report.buckets_processed, 1);
        // Ticks between boundaries have nothing to do.
        let idle = runner.tick(day(n) + minutes(5)).await;
        assert_eq!(idle.tracks_due, 0);
    }

    assert_eq!(store.records_for(&track(Period::Day)), expected);
    assert_eq!(store.cursor(&track(Period::Day)).await.unwrap(), Some(day(29)));
}

#[tokio::test]
async fn test_live_continues_from_backfilled_state() {
    let samples = history(20);
    let expected = backfilled(&samples, day(20)).await;

    // Backfill the first 12 days, then go live.
    let store = Arc::new(MemoryStore::new());
    store.insert_samples(&track(Period::Day), &samples);
    backfill_days(&store, day(0), day(12)).await;

    let mut runner = live(&store, vec![track(Period::Day)]);
    let report = runner.tick(day(20)).await;
    assert_eq!(report.buckets_processed, 8);

    assert_eq!(store.records_for(&track(Period::Day)), expected);
}

#[tokio::test]
async fn test_cold_start_replays_history() {
    let samples = history(14);
    let expected = backfilled(&samples, day(14)).await;

    let store = Arc::new(MemoryStore::new());
    store.insert_samples(&track(Period::Day), &samples);
    let mut runner = live(&store, vec![track(Period::Day)]);

    let report = runner.tick(day(11)).await;
    assert_eq!(report.buckets_processed, 11);
    assert_eq!(store.cursor(&track(Period::Day)).await.unwrap(), Some(day(10)));

    // A later backfill over the same range agrees with what live wrote.
    let count = store.record_count();
    backfill_days(&store, day(0), day(11)).await;
    assert_eq!(store.record_count(), count);

    runner.tick(day(12)).await;
    runner.tick(day(13)).await;
    runner.tick(day(14)).await;
    assert_eq!(store.records_for(&track(Period::Day)), expected);
}

#[tokio::test]
async fn test_cold_start_without_history_waits() {
    let store = Arc::new(MemoryStore::new());
    let t = track(Period::Day);
    let mut runner = live(&store, vec![t.clone()]);

    let report = runner.tick(day(1)).await;
    assert_eq!(report.not_ready, 1);
    assert!(store.cursor(&t).await.unwrap().is_none());

    store.insert_samples(&t, &[MetricSample::new(day(0), 40.0, 288)]);
    let report = runner.tick(day(1) + minutes(5)).await;
    assert_eq!(report.buckets_processed, 1);
    assert_eq!(store.cursor(&t).await.unwrap(), Some(day(0)));
}

// ---------------------------------------------------------------------------
// Data gaps
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_bucket_is_retried_not_skipped() {
    let store = Arc::new(MemoryStore::new());
    let t = track(Period::Day);
    store.insert_samples(
        &t,
        &[
            MetricSample::new(day(0), 100.0, 288),
            MetricSample::new(day(1), 90.0, 288),
            MetricSample::new(day(3), 70.0, 288),
        ],
    );
    let mut runner = live(&store, vec![t.clone()]);

    runner.tick(day(1)).await;
    runner.tick(day(2)).await;

    // Day 2 has closed but its data has not arrived.
    let report = runner.tick(day(3)).await;
    assert_eq!(report.not_ready, 1);
    assert!(runner.is_behind(&t));
    assert_eq!(runner.gap_ticks(&t), 1);
    assert_eq!(store.cursor(&t).await.unwrap(), Some(day(1)));

    let report = runner.tick(day(3) + minutes(5)).await;
    assert_eq!(report.tracks_due, 1);
    assert_eq!(report.not_ready, 1);
    assert_eq!(runner.gap_ticks(&t), 2);

    store.insert_samples(&t, &[MetricSample::new(day(2), 80.0, 288)]);
    let report = runner.tick(day(3) + minutes(10)).await;
    assert_eq!(report.buckets_processed, 1);
    assert!(!runner.is_behind(&t));
    assert_eq!(runner.gap_ticks(&t), 0);

    let report = runner.tick(day(4)).await;
    assert_eq!(report.buckets_processed, 1);

    let lows: Vec<_> = store
        .records_for(&t)
        .into_iter()
        .filter(|r| r.aggregate_kind == milestone_core::AggregateKind::Low)
        .map(|r| (r.bucket_time, r.value))
        .collect();
    assert_eq!(
        lows,
        vec![(day(0), 100.0), (day(1), 90.0), (day(2), 80.0), (day(3), 70.0)]
    );
}

// ---------------------------------------------------------------------------
// Outages and leases
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_store_outage_catches_up_in_order() {
    let samples = history(6);
    let expected = backfilled(&samples[..4], day(4)).await;

    let store = Arc::new(MemoryStore::new());
    let t = track(Period::Day);
    store.insert_samples(&t, &samples);
    let mut runner = live(&store, vec![t.clone()]);

    assert_eq!(runner.tick(day(1)).await.buckets_processed, 1);

    store.fail_next(1_000);
    for n in 2..=3 {
        let report = runner.tick(day(n)).await;
        assert_eq!(report.failed, 1);
        assert!(runner.is_behind(&t));
    }
    store.fail_next(0);

    let report = runner.tick(day(4)).await;
    assert_eq!(report.failed, 0);
    assert_eq!(report.buckets_processed, 3);
    assert!(!runner.is_behind(&t));
    assert_eq!(store.records_for(&t), expected);
}

#[tokio::test]
async fn test_brief_store_failure_is_retried_within_the_tick() {
    let store = Arc::new(MemoryStore::new());
    let t = track(Period::Day);
    store.insert_samples(&t, &history(3));
    let mut runner = live(&store, vec![t.clone()]);
    runner.tick(day(1)).await;

    store.fail_next(1);
    let report = runner.tick(day(2)).await;
    assert_eq!(report.failed, 0);
    assert_eq!(report.buckets_processed, 1);
    assert!(!runner.is_behind(&t));
}

#[tokio::test]
async fn test_lost_lease_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let t = track(Period::Day);
    store.insert_samples(&t, &history(3));
    let stores = Stores {
        source: Arc::new(LeaseLosingSource {
            store: Arc::clone(&store),
        }),
        milestones: store.clone(),
        leases: store.clone(),
    };
    let config = LiveConfig {
        lease_ttl: Duration::ZERO,
        ..live_config()
    };
    let mut runner = LiveRunner::for_tracks(&catalog(), stores, config, vec![t.clone()]).unwrap();

    let report = runner.tick(day(1)).await;
    assert_eq!(report.lease_conflicts, 1);
    assert!(runner.is_behind(&t));
    assert!(store.records_for(&t).is_empty());
    assert!(store.cursor(&t).await.unwrap().is_none());
}

#[tokio::test]
async fn test_leased_track_waits_for_release() {
    let store = Arc::new(MemoryStore::new());
    let t = track(Period::Day);
    store.insert_samples(&t, &history(3));
    let mut runner = live(&store, vec![t.clone()]);

    assert!(store
        .try_acquire(&t.key(), "backfill-1", Duration::from_secs(60))
        .await
        .unwrap());
    let report = runner.tick(day(1)).await;
    assert_eq!(report.lease_conflicts, 1);
    assert!(store.records_for(&t).is_empty());

    store.release(&t.key(), "backfill-1").await.unwrap();
    let report = runner.tick(day(1) + minutes(5)).await;
    assert_eq!(report.lease_conflicts, 0);
    assert_eq!(report.buckets_processed, 1);
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_month_is_only_due_when_it_closes() {
    let store = Arc::new(MemoryStore::new());
    let t = track(Period::Month);
    // December 2023 in NEM market time.
    let december = Utc.with_ymd_and_hms(2023, 11, 30, 14, 0, 0).unwrap();
    store.insert_samples(&t, &[MetricSample::new(december, 4_000.0, 8_928)]);
    let mut runner = live(&store, vec![t.clone()]);

    let report = runner.tick(day(0)).await;
    assert_eq!(report.buckets_processed, 1);
    assert_eq!(store.records_for(&t).len(), 2);

    assert_eq!(runner.tick(day(1)).await.tracks_due, 0);
    assert_eq!(runner.tick(day(15)).await.tracks_due, 0);

    // 1 February: January has closed but has no data yet.
    let report = runner.tick(day(31)).await;
    assert_eq!(report.tracks_due, 1);
    assert_eq!(report.not_ready, 1);
}

#[tokio::test]
async fn test_unaligned_now_is_truncated_to_the_interval() {
    let store = Arc::new(MemoryStore::new());
    let t = track(Period::Day);
    store.insert_samples(&t, &history(2));
    let mut runner = live(&store, vec![t.clone()]);

    runner.tick(day(1)).await;
    // 00:03 local on day 2 aligns to the 00:00 close.
    let report = runner.tick(day(2) + minutes(3)).await;
    assert_eq!(report.buckets_processed, 1);
    assert_eq!(store.cursor(&t).await.unwrap(), Some(day(1)));
}

#[tokio::test]
async fn test_run_stops_on_cancel() {
    let store = Arc::new(MemoryStore::new());
    let mut runner = live(&store, vec![track(Period::Day)]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(5), runner.run(cancel))
        .await
        .expect("run should stop once cancelled");
}

#[test]
fn test_unsupported_tracks_are_rejected() {
    let store = Arc::new(MemoryStore::new());
    let power_daily = Track::new(
        Metric::Power,
        Period::Day,
        Partition::Network {
            network: "NEM".into(),
        },
    );
    let result = LiveRunner::for_tracks(
        &catalog(),
        Stores::from_shared(store),
        live_config(),
        vec![power_daily],
    );
    assert_matches!(result.err(), Some(CoreError::UnsupportedTrack { .. }));

    let stores = Stores::from_shared(Arc::new(MemoryStore::new()));
    let all = LiveRunner::new(&catalog(), stores, live_config()).unwrap();
    assert_eq!(all.backlog_len(), all.track_count());
}
