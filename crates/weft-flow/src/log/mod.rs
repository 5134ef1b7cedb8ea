//! Pluggable persistence for job log entries and dependency edges.
//!
//! The job log is the single source of truth across possibly-concurrent
//! executions of the same job id. Entries are keyed by
//! `(project, spec name, job id)` and carry a status plus accumulated data;
//! all mutations are upserts with explicit merge-vs-replace semantics so
//! checkpoints compose without clobbering each other.
//!
//! ## Design Principles
//!
//! - **Idempotent resume**: A `Completed` entry is immutable and
//!   authoritative; later attempts short-circuit on it
//! - **Merge checkpointing**: Incremental data merges field-wise, never
//!   overwrites wholesale
//! - **Testability**: In-memory implementation for tests, a relational or
//!   document store in production

pub mod liveness;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use weft_core::{JobId, ProjectId, SpecName};

use crate::error::Result;

/// Status of a job log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// An execution is (or was last known to be) processing the job.
    Active,
    /// The execution suspended until its spawned children settle.
    WaitingChildren,
    /// The job finished; `data` is final and authoritative.
    Completed,
    /// The job's last execution attempt failed.
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::WaitingChildren => write!(f, "waiting_children"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A persisted job log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogEntry {
    /// Project namespace.
    pub project: ProjectId,
    /// The job type (spec name).
    pub spec: SpecName,
    /// The job id.
    pub job_id: JobId,
    /// Current status.
    pub status: JobStatus,
    /// Accumulated data, merged across checkpoints.
    pub data: Value,
    /// When the entry was first created.
    pub created_at: DateTime<Utc>,
    /// When the entry was last updated.
    pub updated_at: DateTime<Utc>,
}

/// How incoming data combines with an entry's existing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Deep field-wise merge into the existing data.
    Merge,
    /// Replace the existing data wholesale.
    Replace,
}

/// An upsert applied to a job log entry.
///
/// Absent fields are left untouched: a status-only update does not disturb
/// accumulated data, and a data-only update does not change status.
#[derive(Debug, Clone)]
pub struct JobLogUpdate {
    /// New status, if the status should change.
    pub status: Option<JobStatus>,
    /// Incoming data, if any.
    pub data: Option<Value>,
    /// How incoming data combines with existing data.
    pub merge: MergeStrategy,
}

impl JobLogUpdate {
    /// An update that only transitions status.
    #[must_use]
    pub const fn status_only(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            data: None,
            merge: MergeStrategy::Merge,
        }
    }

    /// An update that merges checkpoint data without changing status.
    #[must_use]
    pub const fn merge_data(data: Value) -> Self {
        Self {
            status: None,
            data: Some(data),
            merge: MergeStrategy::Merge,
        }
    }

    /// An update that sets a status and replaces data with a final value.
    #[must_use]
    pub const fn finalize(status: JobStatus, data: Value) -> Self {
        Self {
            status: Some(status),
            data: Some(data),
            merge: MergeStrategy::Replace,
        }
    }
}

/// A recorded parent→child dependency edge.
///
/// Edges are append-only and used for lineage and audit; wait-coordination
/// itself is delegated to the queue primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Project namespace.
    pub project: ProjectId,
    /// The waiting parent job.
    pub parent: JobId,
    /// The spawned child job.
    pub child: JobId,
    /// When the edge was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Storage abstraction for job log entries and dependency edges.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent access from multiple
/// executing jobs.
#[async_trait]
pub trait JobLogStore: Send + Sync {
    /// Gets the entry for `(project, spec, job_id)`.
    ///
    /// With a `status` filter, returns the entry only if its status matches.
    async fn get(
        &self,
        project: &ProjectId,
        spec: &SpecName,
        job_id: &JobId,
        status: Option<JobStatus>,
    ) -> Result<Option<JobLogEntry>>;

    /// Inserts or updates the entry for `(project, spec, job_id)`.
    ///
    /// Creates the entry (status required, defaulting data to an empty
    /// object) if it does not exist; otherwise applies the update's status
    /// and data per its merge strategy.
    async fn upsert(
        &self,
        project: &ProjectId,
        spec: &SpecName,
        job_id: &JobId,
        update: JobLogUpdate,
    ) -> Result<()>;

    /// Records a parent→child dependency edge.
    ///
    /// Idempotent: recording the same edge twice keeps a single row.
    async fn record_dependency(
        &self,
        project: &ProjectId,
        parent: &JobId,
        child: &JobId,
    ) -> Result<()>;

    /// Returns all recorded edges for `parent`, in insertion order.
    async fn dependencies(&self, project: &ProjectId, parent: &JobId)
    -> Result<Vec<DependencyEdge>>;
}

/// Deep field-wise merge of `incoming` into `base`.
///
/// Objects merge recursively; any other pairing replaces the base value.
/// Array elements are not merged positionally — an incoming array replaces
/// the existing one.
pub fn merge_values(base: &mut Value, incoming: Value) {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, incoming) => *base_slot = incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_display_matches_wire_format() {
        assert_eq!(JobStatus::WaitingChildren.to_string(), "waiting_children");
        assert_eq!(
            serde_json::to_string(&JobStatus::WaitingChildren).unwrap(),
            "\"waiting_children\""
        );
    }

    #[test]
    fn merge_unions_disjoint_fields() {
        let mut base = json!({"a": 1});
        merge_values(&mut base, json!({"b": 2}));
        assert_eq!(base, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn merge_recurses_into_nested_objects() {
        let mut base = json!({"outer": {"a": 1}, "keep": true});
        merge_values(&mut base, json!({"outer": {"b": 2}}));
        assert_eq!(base, json!({"outer": {"a": 1, "b": 2}, "keep": true}));
    }

    #[test]
    fn merge_replaces_scalars_and_arrays() {
        let mut base = json!({"a": 1, "list": [1, 2]});
        merge_values(&mut base, json!({"a": 9, "list": [3]}));
        assert_eq!(base, json!({"a": 9, "list": [3]}));
    }

    #[test]
    fn update_constructors() {
        let status = JobLogUpdate::status_only(JobStatus::Active);
        assert_eq!(status.status, Some(JobStatus::Active));
        assert!(status.data.is_none());

        let finalize = JobLogUpdate::finalize(JobStatus::Completed, json!({"r": 1}));
        assert_eq!(finalize.merge, MergeStrategy::Replace);
    }
}
