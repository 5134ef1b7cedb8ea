//! Durable queue primitive abstraction.
//!
//! This module provides:
//!
//! - [`JobQueue`]: Trait for the external queue/broker the workers consume
//! - [`QueuedJob`]: Serializable unit-of-work payload
//! - [`InMemoryJobQueue`](memory::InMemoryJobQueue): In-memory queue for
//!   testing
//!
//! ## Design Principles
//!
//! - **Backend agnostic**: Same interface for Redis-backed brokers, SQS, or
//!   local workers
//! - **Leases, not locks**: A dequeue grants a [`LeaseToken`]; settlement
//!   calls must present it, and a stale lease surfaces as benign
//!   [`Error::LockContention`](crate::error::Error::LockContention)
//! - **Native child waits**: Deferring a parent until its children settle is
//!   a queue primitive, distinguishable from failure
//!
//! The queue's own retry/backoff policy is deliberately out of scope; this
//! layer only translates execution outcomes into acknowledgements.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use weft_core::{JobId, LeaseToken, SpecName};

use crate::error::Result;

/// A unit of work enqueued for a job specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob {
    /// Globally addressable job identifier.
    pub job_id: JobId,
    /// The spec this job belongs to (queue routing key).
    pub spec: SpecName,
    /// Input parameters for the processor.
    pub params: Value,
    /// The spawning parent, when this job was spawned as a child.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<JobId>,
    /// When the job was enqueued.
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedJob {
    /// Creates a new unit of work.
    #[must_use]
    pub fn new(job_id: JobId, spec: SpecName, params: Value) -> Self {
        Self {
            job_id,
            spec,
            params,
            parent_id: None,
            enqueued_at: Utc::now(),
        }
    }
}

/// Options for enqueueing a job.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// The spawning parent job, recorded on the queued unit.
    pub parent_id: Option<JobId>,
    /// Whether the parent must wait for this job to settle before it can
    /// itself reach a terminal state.
    pub parent_waits: bool,
}

impl EnqueueOptions {
    /// Creates default options (no parent).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the job as spawned by `parent` without a wait obligation.
    #[must_use]
    pub fn spawned_by(parent: JobId) -> Self {
        Self {
            parent_id: Some(parent),
            parent_waits: false,
        }
    }

    /// Marks the job as a dependency `parent` must wait on.
    #[must_use]
    pub fn awaited_by(parent: JobId) -> Self {
        Self {
            parent_id: Some(parent),
            parent_waits: true,
        }
    }
}

/// Result of enqueuing a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    /// The job was enqueued.
    Enqueued,
    /// A job with this id is already known to the queue.
    ///
    /// Expected under idempotent re-spawn: a retried parent re-deriving a
    /// child id addresses the existing child.
    Deduplicated,
}

impl EnqueueResult {
    /// Returns true if the job was newly enqueued.
    #[must_use]
    pub const fn is_enqueued(&self) -> bool {
        matches!(self, Self::Enqueued)
    }
}

/// Queue abstraction for dispatching jobs to worker pools.
///
/// Implementations may target Redis-backed brokers, cloud queues, or the
/// in-memory queue for tests.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent access from multiple
/// workers and executing jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues a job.
    ///
    /// Enqueueing an id the queue already knows is not an error; it returns
    /// [`EnqueueResult::Deduplicated`].
    async fn enqueue(&self, job: QueuedJob, options: EnqueueOptions) -> Result<EnqueueResult>;

    /// Dequeues the next job for `spec`, granting an exclusive lease.
    ///
    /// Returns `None` when no work is available.
    async fn dequeue_with_lease(
        &self,
        spec: &SpecName,
    ) -> Result<Option<(QueuedJob, LeaseToken)>>;

    /// Acknowledges successful completion of a dequeued job.
    async fn ack(&self, job_id: &JobId, lease: &LeaseToken, result: Value) -> Result<()>;

    /// Reports failure of a dequeued job.
    ///
    /// Retry policy is the queue's own concern; this layer only reports.
    async fn nack(&self, job_id: &JobId, lease: &LeaseToken, error: String) -> Result<()>;

    /// Defers a dequeued job until all children it waits on have settled.
    ///
    /// The queue redelivers the job once its children reach a terminal
    /// state; the redelivered execution resumes idempotently.
    async fn defer_until_children(&self, job_id: &JobId, lease: &LeaseToken) -> Result<()>;

    /// Forcibly completes a job with `result`.
    ///
    /// Used by the heartbeat monitor to recover jobs whose completion signal
    /// was lost. Semantically equivalent to [`JobQueue::ack`].
    async fn mark_completed(&self, job_id: &JobId, result: Value, lease: &LeaseToken)
    -> Result<()>;

    /// Returns true if every child registered for `job_id` has settled.
    ///
    /// Vacuously true for jobs with no registered children.
    async fn children_settled(&self, job_id: &JobId) -> Result<bool>;

    /// Returns the number of jobs waiting for `spec`.
    ///
    /// Also serves as the worker's connectivity probe at startup.
    async fn depth(&self, spec: &SpecName) -> Result<usize>;
}
