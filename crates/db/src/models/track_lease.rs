//! Per-track lease rows.

use milestone_core::types::Timestamp;
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `track_leases` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TrackLease {
    pub track_key: String,
    pub holder: String,
    pub acquired_at: Timestamp,
    pub expires_at: Timestamp,
}
