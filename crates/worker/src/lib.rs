//! Backfill and live runners that drive the extreme tracker against a
//! sample source and a milestone store.

pub mod backfill;
pub mod config;
pub mod error;
pub mod live;
pub mod memory;
pub mod pg;
pub mod retry;
pub mod store;

pub use backfill::{BackfillConfig, BackfillReport, BackfillRequest, BackfillRunner};
pub use config::{WorkerConfig, WorkerMode};
pub use error::WorkerError;
pub use live::{LiveConfig, LiveRunner, LiveTickReport};
pub use memory::MemoryStore;
pub use pg::PgStore;
pub use retry::RetryConfig;
pub use store::{MilestoneStore, SampleSource, Stores, TrackLease};
