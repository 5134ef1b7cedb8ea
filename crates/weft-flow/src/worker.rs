//! Worker: a long-running consumer bound to one job specification.
//!
//! A worker maintains up to its spec's `concurrency` simultaneously
//! executing jobs, each isolated in its own [`JobContext`]. For every
//! dequeued unit it runs the execution lifecycle and translates the outcome
//! into a queue acknowledgement:
//!
//! - `Completed` → `ack`
//! - `WaitingChildren` → `defer_until_children` (not a failure)
//! - error → `nack`, deferring retry policy to the queue primitive
//!
//! Lock-contention errors are expected under concurrent lock renewal and
//! redelivery; they are logged at reduced severity and swallowed rather
//! than escalated.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;

use weft_core::{JobId, LeaseToken};

use crate::context::{ExecutionOutcome, JobContext};
use crate::env::FlowEnv;
use crate::error::Result;
use crate::metrics;
use crate::queue::QueuedJob;
use crate::spec::JobSpec;

/// Lifecycle events emitted by a worker for observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A job execution began.
    Active {
        /// The job being executed.
        job_id: JobId,
    },
    /// A job settled successfully.
    Completed {
        /// The completed job.
        job_id: JobId,
    },
    /// A job suspended until its children settle.
    WaitingChildren {
        /// The deferred job.
        job_id: JobId,
    },
    /// A job settled with a failure.
    Failed {
        /// The failed job.
        job_id: JobId,
        /// The failure message.
        message: String,
    },
    /// A worker-level error outside any single job.
    Error {
        /// The error message.
        message: String,
    },
}

/// A sink for worker lifecycle events.
///
/// Implementations must be cheap and non-blocking; the worker emits events
/// inline on its execution paths.
pub trait WorkerEventSink: Send + Sync {
    /// Records an event.
    fn push(&self, event: WorkerEvent);
}

/// A sink that discards all events.
#[derive(Debug, Default)]
pub struct NoOpEventSink;

impl WorkerEventSink for NoOpEventSink {
    fn push(&self, _event: WorkerEvent) {}
}

/// In-memory sink collecting events for tests.
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<WorkerEvent>>,
}

impl InMemoryEventSink {
    /// Creates a new empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<WorkerEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl WorkerEventSink for InMemoryEventSink {
    fn push(&self, event: WorkerEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// A long-running consumer bound to one job specification.
pub struct Worker {
    env: Arc<FlowEnv>,
    spec: Arc<JobSpec>,
    concurrency: usize,
    events: Arc<dyn WorkerEventSink>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("spec", &self.spec.name())
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Creates a worker for `spec` with the spec's declared concurrency.
    #[must_use]
    pub fn new(env: Arc<FlowEnv>, spec: Arc<JobSpec>) -> Self {
        let concurrency = spec.concurrency();
        Self {
            env,
            spec,
            concurrency,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Overrides the spec's declared concurrency for this worker instance.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Attaches an event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn WorkerEventSink>) -> Self {
        self.events = events;
        self
    }

    /// Starts consuming.
    ///
    /// Confirms connectivity to the queue before resolving, so a successful
    /// return means the worker is ready. The returned handle shuts the
    /// dequeue loop down deterministically.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue connectivity check fails.
    pub async fn start(self) -> Result<WorkerHandle> {
        // Readiness gate: a depth probe confirms the queue is reachable.
        self.env.queue().depth(self.spec.name()).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let spec_name = self.spec.name().clone();
        let join = tokio::spawn(run_loop(
            self.env,
            self.spec,
            self.concurrency,
            self.events,
            shutdown_rx,
        ));
        tracing::info!(spec = %spec_name, "worker started");

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join,
        })
    }
}

/// Handle to a running worker.
///
/// Dropping the handle aborts the dequeue loop; prefer
/// [`WorkerHandle::shutdown`] for a drain that lets in-flight jobs settle.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signals shutdown and waits for in-flight jobs to settle.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }

    /// Aborts the dequeue loop without draining.
    pub fn abort(&self) {
        self.join.abort();
    }
}

#[allow(clippy::significant_drop_tightening)]
async fn run_loop(
    env: Arc<FlowEnv>,
    spec: Arc<JobSpec>,
    concurrency: usize,
    events: Arc<dyn WorkerEventSink>,
    mut shutdown: watch::Receiver<bool>,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency));

    loop {
        if *shutdown.borrow() {
            break;
        }

        let permit = tokio::select! {
            permit = Arc::clone(&semaphore).acquire_owned() => {
                permit.expect("worker semaphore never closes")
            }
            _ = shutdown.changed() => continue,
        };

        match env.queue().dequeue_with_lease(spec.name()).await {
            Ok(Some((job, lease))) => {
                metrics::record_job_dequeued(spec.name());
                let env = Arc::clone(&env);
                let spec = Arc::clone(&spec);
                let events = Arc::clone(&events);
                tokio::spawn(async move {
                    process_one(env, spec, events, job, lease).await;
                    drop(permit);
                });
            }
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    () = tokio::time::sleep(env.config().dequeue_poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(error) => {
                drop(permit);
                tracing::warn!(error = %error, spec = %spec.name(), "dequeue failed");
                events.push(WorkerEvent::Error {
                    message: error.to_string(),
                });
                tokio::select! {
                    () = tokio::time::sleep(env.config().dequeue_poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }

    // Drain: wait until every in-flight job has released its permit.
    #[allow(clippy::cast_possible_truncation)]
    let _ = semaphore.acquire_many(concurrency as u32).await;
    tracing::info!(spec = %spec.name(), "worker stopped");
}

async fn process_one(
    env: Arc<FlowEnv>,
    spec: Arc<JobSpec>,
    events: Arc<dyn WorkerEventSink>,
    job: QueuedJob,
    lease: LeaseToken,
) {
    let job_id = job.job_id.clone();
    events.push(WorkerEvent::Active {
        job_id: job_id.clone(),
    });

    let ctx = JobContext::new(Arc::clone(&env), Arc::clone(&spec), job, Some(lease));
    match ctx.begin_processing().await {
        Ok(ExecutionOutcome::Completed(value)) => {
            metrics::record_job_completed(spec.name());
            match env.queue().ack(&job_id, &lease, value).await {
                Ok(()) => {
                    tracing::info!(job_id = %job_id, "job completed");
                    events.push(WorkerEvent::Completed { job_id });
                }
                Err(error) if error.is_lock_contention() => {
                    tracing::debug!(job_id = %job_id, error = %error, "ack contended; job settled elsewhere");
                }
                Err(error) => {
                    tracing::error!(job_id = %job_id, error = %error, "failed to ack job");
                    events.push(WorkerEvent::Error {
                        message: error.to_string(),
                    });
                }
            }
        }
        Ok(ExecutionOutcome::WaitingChildren) => {
            match env.queue().defer_until_children(&job_id, &lease).await {
                Ok(()) => {
                    events.push(WorkerEvent::WaitingChildren { job_id });
                }
                Err(error) if error.is_lock_contention() => {
                    tracing::debug!(job_id = %job_id, error = %error, "defer contended; job settled elsewhere");
                }
                Err(error) => {
                    tracing::error!(job_id = %job_id, error = %error, "failed to defer job");
                    events.push(WorkerEvent::Error {
                        message: error.to_string(),
                    });
                }
            }
        }
        Err(error) if error.is_lock_contention() => {
            // Expected under concurrent lock renewal; the other execution owns
            // settlement now.
            tracing::debug!(job_id = %job_id, error = %error, "execution contended");
        }
        Err(error) => {
            metrics::record_job_failed(spec.name());
            tracing::error!(job_id = %job_id, error = %error, "job failed");
            events.push(WorkerEvent::Failed {
                job_id: job_id.clone(),
                message: error.to_string(),
            });
            if let Err(nack_error) = env.queue().nack(&job_id, &lease, error.to_string()).await {
                if nack_error.is_lock_contention() {
                    tracing::debug!(job_id = %job_id, error = %nack_error, "nack contended");
                } else {
                    tracing::error!(job_id = %job_id, error = %nack_error, "failed to nack job");
                }
            }
        }
    }
}
