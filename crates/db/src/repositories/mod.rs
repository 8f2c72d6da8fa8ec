//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods
//! that accept `&PgPool` as the first argument.

pub mod metric_bucket_repo;
pub mod milestone_repo;
pub mod track_cursor_repo;
pub mod track_lease_repo;

pub use metric_bucket_repo::MetricBucketRepo;
pub use milestone_repo::MilestoneRepo;
pub use track_cursor_repo::TrackCursorRepo;
pub use track_lease_repo::TrackLeaseRepo;
