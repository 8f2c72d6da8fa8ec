//! Per-track processing cursor rows.

use milestone_core::types::Timestamp;
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `track_cursors` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TrackCursor {
    pub track_key: String,
    pub metric: String,
    pub period: String,
    pub partition_descriptor: String,
    /// Last bucket whose sample has been fully processed and persisted.
    pub last_bucket: Timestamp,
    pub updated_at: Timestamp,
}
