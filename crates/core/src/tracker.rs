//! Extreme Tracker: the running max/min fold over one track.
//!
//! The tracker is a plain state machine. Feeding it a whole history in one
//! call (backfill) or one sample per call with the state carried between
//! calls (live) produces the same records, because every decision depends
//! only on the carried [`TrackState`] and the current sample.

use crate::error::CoreError;
use crate::period::Period;
use crate::record::{
    epoch_millis, AggregateKind, ExtremeState, MetricSample, MilestoneRecord, TrackState,
};
use crate::track::{Track, TrackRules};

/// Records emitted by a run plus the state to continue from.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerOutput {
    pub records: Vec<MilestoneRecord>,
    pub state: TrackState,
}

#[derive(Debug, Clone)]
pub struct ExtremeTracker {
    track: Track,
    rules: TrackRules,
    state: TrackState,
}

impl ExtremeTracker {
    /// A tracker for a track with no history.
    pub fn new(track: Track, rules: TrackRules) -> Self {
        Self::with_state(track, rules, TrackState::default())
    }

    /// A tracker resuming from previously persisted state.
    pub fn with_state(track: Track, rules: TrackRules, state: TrackState) -> Self {
        Self {
            track,
            rules,
            state,
        }
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn state(&self) -> &TrackState {
        &self.state
    }

    pub fn into_state(self) -> TrackState {
        self.state
    }

    /// Consume one sample and return the 0, 1 or 2 records it sets.
    ///
    /// Samples must arrive in strictly increasing bucket order. A sample at
    /// or before the last consumed bucket is an invariant violation, and a
    /// bucket before the Unix epoch is a validation error; both leave the
    /// state untouched.
    pub fn observe(&mut self, sample: &MetricSample) -> Result<Vec<MilestoneRecord>, CoreError> {
        epoch_millis(sample.bucket_time)?;
        if let Some(last) = self.state.last_bucket {
            if sample.bucket_time <= last {
                return Err(CoreError::InvariantViolation(format!(
                    "{}: sample at {} is not after last processed bucket {}",
                    self.track, sample.bucket_time, last
                )));
            }
        }
        self.state.last_bucket = Some(sample.bucket_time);

        let mut emitted = Vec::new();
        if !sample.value.is_finite() {
            return Ok(emitted);
        }

        let high_eligible = self.rules.allow_non_positive || sample.value > 0.0;
        if high_eligible && self.state.high.map_or(true, |h| sample.value > h.value) {
            let record = self.emit(AggregateKind::High, sample)?;
            self.state.high = Some(ExtremeState::from(&record));
            emitted.push(record);
        }

        // A partial bucket must never set a low: it would shadow every
        // complete bucket that follows.
        if self.meets_threshold(sample) && self.state.low.map_or(true, |l| sample.value < l.value)
        {
            let record = self.emit(AggregateKind::Low, sample)?;
            self.state.low = Some(ExtremeState::from(&record));
            emitted.push(record);
        }

        Ok(emitted)
    }

    /// Consume an ordered run of samples.
    ///
    /// On error the records emitted before the offending sample are
    /// discarded with it; callers retry the whole run.
    pub fn run<'a, I>(&mut self, samples: I) -> Result<Vec<MilestoneRecord>, CoreError>
    where
        I: IntoIterator<Item = &'a MetricSample>,
    {
        let mut records = Vec::new();
        for sample in samples {
            records.extend(self.observe(sample)?);
        }
        Ok(records)
    }

    fn meets_threshold(&self, sample: &MetricSample) -> bool {
        self.track.period == Period::Interval
            || sample.sample_count >= self.rules.completeness_threshold
    }

    fn emit(
        &self,
        kind: AggregateKind,
        sample: &MetricSample,
    ) -> Result<MilestoneRecord, CoreError> {
        MilestoneRecord::new(
            &self.track,
            kind,
            sample.bucket_time,
            sample.value,
            self.state.get(kind),
        )
    }
}

/// Run a track over `samples` starting from `initial`.
pub fn track_extremes(
    track: Track,
    rules: TrackRules,
    initial: TrackState,
    samples: &[MetricSample],
) -> Result<TrackerOutput, CoreError> {
    let mut tracker = ExtremeTracker::with_state(track, rules, initial);
    let records = tracker.run(samples)?;
    Ok(TrackerOutput {
        records,
        state: tracker.into_state(),
    })
}
