//! In-memory job queue implementation for testing.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No persistence, no distribution
//! - **Single-process only**: Jobs are not visible across process boundaries
//! - **Terminal failures**: A nacked job is settled as failed; there is no
//!   retry/backoff policy (that is the production broker's concern)

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use weft_core::{JobId, LeaseToken, SpecName};

use super::{EnqueueOptions, EnqueueResult, JobQueue, QueuedJob};
use crate::error::{Error, Result};

/// How a settled job ended.
#[derive(Debug, Clone)]
enum Settled {
    Completed(Value),
    Failed(String),
}

#[derive(Debug, Default)]
struct QueueState {
    pending: HashMap<SpecName, VecDeque<QueuedJob>>,
    active: HashMap<JobId, (QueuedJob, LeaseToken)>,
    waiting: HashMap<JobId, QueuedJob>,
    settled: HashMap<JobId, Settled>,
    children: HashMap<JobId, Vec<JobId>>,
    known: HashSet<JobId>,
}

impl QueueState {
    fn all_children_settled(&self, job_id: &JobId) -> bool {
        self.children
            .get(job_id)
            .map_or(true, |kids| kids.iter().all(|kid| self.settled.contains_key(kid)))
    }

    /// Settles `job_id` and requeues a waiting parent whose children are now
    /// all settled.
    fn settle(&mut self, job: QueuedJob, outcome: Settled) {
        let parent_id = job.parent_id.clone();
        self.settled.insert(job.job_id, outcome);

        if let Some(parent_id) = parent_id {
            if self.waiting.contains_key(&parent_id) && self.all_children_settled(&parent_id) {
                if let Some(parent) = self.waiting.remove(&parent_id) {
                    self.pending
                        .entry(parent.spec.clone())
                        .or_default()
                        .push_back(parent);
                }
            }
        }
    }
}

/// In-memory job queue for testing.
///
/// Provides a simple, thread-safe implementation of the [`JobQueue`] trait
/// using `RwLock` for synchronization.
///
/// ## Example
///
/// ```rust
/// use weft_flow::queue::memory::InMemoryJobQueue;
///
/// let queue = InMemoryJobQueue::new();
/// // Enqueue jobs in tests...
/// ```
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    state: RwLock<QueueState>,
}

/// Converts a lock poison error to a job log error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::JobLog {
        message: "job queue lock poisoned".to_string(),
    }
}

impl InMemoryJobQueue {
    /// Creates a new empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the completed result for `job_id`, if it settled successfully.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn completed_result(&self, job_id: &JobId) -> Result<Option<Value>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(match state.settled.get(job_id) {
            Some(Settled::Completed(value)) => Some(value.clone()),
            _ => None,
        })
    }

    /// Returns the failure message for `job_id`, if it settled with a nack.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn failure_of(&self, job_id: &JobId) -> Result<Option<String>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(match state.settled.get(job_id) {
            Some(Settled::Failed(message)) => Some(message.clone()),
            _ => None,
        })
    }

    /// Returns true if `job_id` has settled (completed or failed).
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_settled(&self, job_id: &JobId) -> Result<bool> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.settled.contains_key(job_id))
    }

    fn check_lease<'a>(
        state: &'a QueueState,
        job_id: &JobId,
        lease: &LeaseToken,
    ) -> Result<&'a QueuedJob> {
        match state.active.get(job_id) {
            Some((job, held)) if held == lease => Ok(job),
            Some(_) => Err(Error::LockContention {
                message: format!("lease for job '{job_id}' is held by another execution"),
            }),
            None => Err(Error::LockContention {
                message: format!("no active lease for job '{job_id}'"),
            }),
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, mut job: QueuedJob, options: EnqueueOptions) -> Result<EnqueueResult> {
        let mut state = self.state.write().map_err(poison_err)?;

        if state.known.contains(&job.job_id) {
            return Ok(EnqueueResult::Deduplicated);
        }
        state.known.insert(job.job_id.clone());

        if let Some(parent_id) = options.parent_id {
            job.parent_id = Some(parent_id.clone());
            if options.parent_waits {
                state
                    .children
                    .entry(parent_id)
                    .or_default()
                    .push(job.job_id.clone());
            }
        }

        state
            .pending
            .entry(job.spec.clone())
            .or_default()
            .push_back(job);
        Ok(EnqueueResult::Enqueued)
    }

    async fn dequeue_with_lease(
        &self,
        spec: &SpecName,
    ) -> Result<Option<(QueuedJob, LeaseToken)>> {
        let mut state = self.state.write().map_err(poison_err)?;

        let Some(job) = state.pending.get_mut(spec).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };

        let lease = LeaseToken::generate();
        state
            .active
            .insert(job.job_id.clone(), (job.clone(), lease));
        Ok(Some((job, lease)))
    }

    async fn ack(&self, job_id: &JobId, lease: &LeaseToken, result: Value) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        Self::check_lease(&state, job_id, lease)?;
        let (job, _) = state.active.remove(job_id).expect("lease checked");
        state.settle(job, Settled::Completed(result));
        Ok(())
    }

    async fn nack(&self, job_id: &JobId, lease: &LeaseToken, error: String) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        Self::check_lease(&state, job_id, lease)?;
        let (job, _) = state.active.remove(job_id).expect("lease checked");
        state.settle(job, Settled::Failed(error));
        Ok(())
    }

    async fn defer_until_children(&self, job_id: &JobId, lease: &LeaseToken) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        Self::check_lease(&state, job_id, lease)?;
        let (job, _) = state.active.remove(job_id).expect("lease checked");

        if state.all_children_settled(&job.job_id) {
            // Children already settled; redeliver immediately.
            state
                .pending
                .entry(job.spec.clone())
                .or_default()
                .push_back(job);
        } else {
            state.waiting.insert(job.job_id.clone(), job);
        }
        Ok(())
    }

    async fn mark_completed(
        &self,
        job_id: &JobId,
        result: Value,
        lease: &LeaseToken,
    ) -> Result<()> {
        self.ack(job_id, lease, result).await
    }

    async fn children_settled(&self, job_id: &JobId) -> Result<bool> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.all_children_settled(job_id))
    }

    async fn depth(&self, spec: &SpecName) -> Result<usize> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.pending.get(spec).map_or(0, VecDeque::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(id: &str) -> QueuedJob {
        QueuedJob::new(
            JobId::new(id).unwrap(),
            SpecName::new("resize").unwrap(),
            json!({"width": 10}),
        )
    }

    #[tokio::test]
    async fn enqueue_dequeue_ack_round_trip() {
        let queue = InMemoryJobQueue::new();
        let spec = SpecName::new("resize").unwrap();

        queue.enqueue(job("j1"), EnqueueOptions::new()).await.unwrap();
        assert_eq!(queue.depth(&spec).await.unwrap(), 1);

        let (dequeued, lease) = queue.dequeue_with_lease(&spec).await.unwrap().unwrap();
        assert_eq!(dequeued.job_id.as_str(), "j1");
        assert_eq!(queue.depth(&spec).await.unwrap(), 0);

        queue.ack(&dequeued.job_id, &lease, json!({"ok": true})).await.unwrap();
        assert_eq!(
            queue.completed_result(&dequeued.job_id).unwrap(),
            Some(json!({"ok": true}))
        );
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_deduplicated() {
        let queue = InMemoryJobQueue::new();

        let first = queue.enqueue(job("j1"), EnqueueOptions::new()).await.unwrap();
        assert!(first.is_enqueued());

        let second = queue.enqueue(job("j1"), EnqueueOptions::new()).await.unwrap();
        assert_eq!(second, EnqueueResult::Deduplicated);
    }

    #[tokio::test]
    async fn stale_lease_is_lock_contention() {
        let queue = InMemoryJobQueue::new();
        let spec = SpecName::new("resize").unwrap();

        queue.enqueue(job("j1"), EnqueueOptions::new()).await.unwrap();
        let (dequeued, lease) = queue.dequeue_with_lease(&spec).await.unwrap().unwrap();

        queue.ack(&dequeued.job_id, &lease, json!(1)).await.unwrap();

        // Settling again with the same (now released) lease is contention.
        let err = queue.ack(&dequeued.job_id, &lease, json!(2)).await.unwrap_err();
        assert!(err.is_lock_contention());
    }

    #[tokio::test]
    async fn deferred_parent_redelivers_after_children_settle() {
        let queue = InMemoryJobQueue::new();
        let spec = SpecName::new("resize").unwrap();
        let parent_id = JobId::new("p1").unwrap();
        let child_id = parent_id.child("c1").unwrap();

        queue
            .enqueue(
                QueuedJob::new(parent_id.clone(), spec.clone(), json!({})),
                EnqueueOptions::new(),
            )
            .await
            .unwrap();
        let (parent, parent_lease) = queue.dequeue_with_lease(&spec).await.unwrap().unwrap();

        // Parent spawns a child it must wait on, then defers.
        queue
            .enqueue(
                QueuedJob::new(child_id.clone(), spec.clone(), json!({})),
                EnqueueOptions::awaited_by(parent_id.clone()),
            )
            .await
            .unwrap();
        assert!(!queue.children_settled(&parent_id).await.unwrap());

        queue
            .defer_until_children(&parent.job_id, &parent_lease)
            .await
            .unwrap();
        assert_eq!(queue.depth(&spec).await.unwrap(), 1); // just the child

        // Child runs and completes; parent is redelivered.
        let (child, child_lease) = queue.dequeue_with_lease(&spec).await.unwrap().unwrap();
        assert_eq!(child.job_id, child_id);
        queue.ack(&child.job_id, &child_lease, json!("done")).await.unwrap();

        assert!(queue.children_settled(&parent_id).await.unwrap());
        let (redelivered, _) = queue.dequeue_with_lease(&spec).await.unwrap().unwrap();
        assert_eq!(redelivered.job_id, parent_id);
    }

    #[tokio::test]
    async fn defer_with_settled_children_redelivers_immediately() {
        let queue = InMemoryJobQueue::new();
        let spec = SpecName::new("resize").unwrap();

        queue.enqueue(job("p1"), EnqueueOptions::new()).await.unwrap();
        let (parent, lease) = queue.dequeue_with_lease(&spec).await.unwrap().unwrap();

        // No children registered: vacuously settled.
        queue.defer_until_children(&parent.job_id, &lease).await.unwrap();
        assert_eq!(queue.depth(&spec).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn nack_records_failure() {
        let queue = InMemoryJobQueue::new();
        let spec = SpecName::new("resize").unwrap();

        queue.enqueue(job("j1"), EnqueueOptions::new()).await.unwrap();
        let (dequeued, lease) = queue.dequeue_with_lease(&spec).await.unwrap().unwrap();
        queue
            .nack(&dequeued.job_id, &lease, "boom".to_string())
            .await
            .unwrap();

        assert_eq!(queue.failure_of(&dequeued.job_id).unwrap(), Some("boom".into()));
        assert_eq!(queue.completed_result(&dequeued.job_id).unwrap(), None);
    }
}
