//! Row models.
//!
//! Each submodule contains a `FromRow` struct matching the table row and,
//! where the row maps onto a domain type, the conversion into
//! `milestone_core` types.

pub mod metric_bucket;
pub mod milestone;
pub mod track_cursor;
pub mod track_lease;
