//! Grid milestone core: running-extreme detection over bucketed metrics.
//!
//! Everything in this crate is pure and synchronous. Persistence lives in
//! `milestone-db`; the backfill and live runners live in `milestone-worker`.

pub mod calendar;
pub mod catalog;
pub mod config;
pub mod error;
pub mod metric;
pub mod partition;
pub mod period;
pub mod record;
pub mod track;
pub mod tracker;
pub mod types;

pub use calendar::PeriodCalendar;
pub use catalog::PartitionCatalog;
pub use config::{CatalogConfig, NetworkConfig};
pub use error::CoreError;
pub use metric::Metric;
pub use partition::{FueltechGroup, Partition, PartitionKind};
pub use period::Period;
pub use record::{AggregateKind, ExtremeState, MetricSample, MilestoneRecord, TrackState};
pub use track::{Track, TrackRules};
pub use tracker::{ExtremeTracker, TrackerOutput};
