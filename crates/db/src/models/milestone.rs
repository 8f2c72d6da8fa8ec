//! Milestone record rows.

use milestone_core::error::CoreError;
use milestone_core::record::{ExtremeState, MilestoneRecord};
use milestone_core::types::{DbId, InstanceId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `milestones` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Milestone {
    pub id: DbId,
    pub instance_id: InstanceId,
    pub previous_instance_id: Option<InstanceId>,
    pub bucket_time: Timestamp,
    pub metric: String,
    pub period: String,
    pub partition_descriptor: String,
    pub network: String,
    pub region: Option<String>,
    pub fueltech_group: Option<String>,
    pub renewable: Option<bool>,
    pub aggregate_kind: String,
    pub value: f64,
    pub percent_change: f64,
    pub unit: String,
    pub description: String,
    pub created_at: Timestamp,
}

impl TryFrom<Milestone> for MilestoneRecord {
    type Error = CoreError;

    fn try_from(row: Milestone) -> Result<Self, Self::Error> {
        Ok(MilestoneRecord {
            instance_id: row.instance_id,
            previous_instance_id: row.previous_instance_id,
            bucket_time: row.bucket_time,
            metric: row.metric.parse()?,
            period: row.period.parse()?,
            partition: row.partition_descriptor.parse()?,
            aggregate_kind: row.aggregate_kind.parse()?,
            value: row.value,
            percent_change: row.percent_change,
        })
    }
}

/// The slice of a milestone row needed to resume a tracker.
#[derive(Debug, Clone, Copy, FromRow)]
pub struct MilestoneState {
    pub value: f64,
    pub instance_id: InstanceId,
    pub bucket_time: Timestamp,
}

impl From<MilestoneState> for ExtremeState {
    fn from(row: MilestoneState) -> Self {
        ExtremeState {
            value: row.value,
            instance_id: row.instance_id,
            bucket_time: row.bucket_time,
        }
    }
}
