//! Parallel-attempt orchestration.
//!
//! Expresses "try attempt A; if it hasn't resolved within some condition,
//! also start attempt B; ..." redundancy strategies over alternative job
//! specifications, then combines whichever attempts complete.
//!
//! The orchestration itself is an ordinary [`JobSpec`] whose processor:
//!
//! 1. Each polling tick, evaluates the head of the not-yet-started attempt
//!    queue against a fresh [`TriggerContext`] (total elapsed time plus each
//!    started attempt's elapsed time and resolved flag).
//! 2. When the head's trigger fires, pops it and starts it: spawns a child
//!    job of the attempt's spec with the orchestration's own parameters and
//!    awaits the child's first output.
//! 3. Once every attempt has started, awaits settlement bounded by the
//!    global timeout condition; attempts still running past it are reported
//!    as timed out, not cancelled.
//! 4. Aggregates all [`AttemptOutcome`]s and hands them to the
//!    caller-supplied combiner for the final output.
//!
//! If every attempt's trigger condition is false forever, the orchestration
//! stalls. That is a caller configuration error, not a recoverable
//! condition.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;

use weft_core::SpecName;

use crate::context::JobContext;
use crate::error::{Error, Result};
use crate::schema::PayloadSchema;
use crate::spec::{JobSpec, Processor, ProcessorOutcome};

/// Statistics for one started attempt, as seen by trigger conditions.
#[derive(Debug, Clone)]
pub struct AttemptStats {
    /// The attempt's name (its spec name).
    pub name: String,
    /// Time since this attempt started.
    pub elapsed: Duration,
    /// Whether the attempt has produced its output.
    pub resolved: bool,
}

/// Evaluation context rebuilt for every polling tick.
#[derive(Debug, Clone)]
pub struct TriggerContext {
    /// Time since the orchestration started.
    pub total_elapsed: Duration,
    /// Per-started-attempt statistics, in start order.
    pub attempts: Vec<AttemptStats>,
}

/// A predicate over the evaluation context, evaluated fresh every tick.
pub type TriggerCondition = Arc<dyn Fn(&TriggerContext) -> bool + Send + Sync>;

/// A trigger that fires on the first tick.
#[must_use]
pub fn immediately() -> TriggerCondition {
    Arc::new(|_ctx| true)
}

/// A trigger that fires once total elapsed time reaches `bound`.
#[must_use]
pub fn after_elapsed(bound: Duration) -> TriggerCondition {
    Arc::new(move |ctx| ctx.total_elapsed >= bound)
}

/// A trigger that fires once the named sibling attempt has run for `bound`
/// without resolving.
#[must_use]
pub fn attempt_unresolved_after(name: impl Into<String>, bound: Duration) -> TriggerCondition {
    let name = name.into();
    Arc::new(move |ctx| {
        ctx.attempts
            .iter()
            .find(|stats| stats.name == name)
            .map_or(false, |stats| !stats.resolved && stats.elapsed >= bound)
    })
}

/// One attempt in the prioritized list.
///
/// The list is consumed front-to-back and never reordered.
pub struct AttemptPlan {
    /// The spec to spawn when this attempt starts.
    pub spec: Arc<JobSpec>,
    /// When to start it.
    pub trigger: TriggerCondition,
}

impl AttemptPlan {
    /// Creates an attempt plan.
    #[must_use]
    pub fn new(spec: Arc<JobSpec>, trigger: TriggerCondition) -> Self {
        Self { spec, trigger }
    }
}

/// Aggregated outcome of one started attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    /// The attempt's name.
    pub name: String,
    /// The attempt's first output, if it produced one.
    pub result: Option<Value>,
    /// Whether the attempt errored.
    pub errored: bool,
    /// Whether the attempt was abandoned by the global timeout.
    pub timed_out: bool,
}

/// Combines all attempts' outcomes into the orchestration's final output.
pub type OutcomeCombiner = Arc<dyn Fn(Vec<AttemptOutcome>) -> Result<Value> + Send + Sync>;

/// A combiner that returns the first (in start order) successful result.
///
/// Errored and timed-out entries are tolerated as long as some attempt
/// produced a result; otherwise the orchestration fails.
#[must_use]
pub fn first_success() -> OutcomeCombiner {
    Arc::new(|outcomes| {
        let summary: Vec<String> = outcomes
            .iter()
            .map(|o| {
                let state = if o.errored {
                    "errored"
                } else if o.timed_out {
                    "timed out"
                } else {
                    "no output"
                };
                format!("{}: {state}", o.name)
            })
            .collect();
        outcomes
            .into_iter()
            .find_map(|outcome| outcome.result)
            .ok_or_else(|| Error::AttemptsExhausted {
                message: summary.join(", "),
            })
    })
}

/// Builds a [`JobSpec`] that runs a prioritized list of parallel attempts.
pub struct ParallelAttempts;

impl ParallelAttempts {
    /// Starts building an orchestration spec named `name`.
    #[must_use]
    pub fn builder(name: SpecName) -> ParallelAttemptsBuilder {
        ParallelAttemptsBuilder {
            name,
            params: PayloadSchema::Any,
            output: PayloadSchema::Any,
            attempts: Vec::new(),
            combiner: None,
            global_timeout: None,
        }
    }
}

/// Builder for a parallel-attempt orchestration spec.
pub struct ParallelAttemptsBuilder {
    name: SpecName,
    params: PayloadSchema,
    output: PayloadSchema,
    attempts: Vec<AttemptPlan>,
    combiner: Option<OutcomeCombiner>,
    global_timeout: Option<TriggerCondition>,
}

impl ParallelAttemptsBuilder {
    /// Sets the parameter schema shared with every attempt.
    #[must_use]
    pub fn params(mut self, schema: PayloadSchema) -> Self {
        self.params = schema;
        self
    }

    /// Sets the orchestration's output schema.
    #[must_use]
    pub fn output(mut self, schema: PayloadSchema) -> Self {
        self.output = schema;
        self
    }

    /// Appends an attempt to the prioritized list.
    ///
    /// The attempt's spec must declare a resolvable output stream; the
    /// orchestration awaits the child's first output.
    #[must_use]
    pub fn attempt(mut self, spec: Arc<JobSpec>, trigger: TriggerCondition) -> Self {
        self.attempts.push(AttemptPlan::new(spec, trigger));
        self
    }

    /// Sets the caller-supplied combiner.
    #[must_use]
    pub fn combiner(mut self, combiner: OutcomeCombiner) -> Self {
        self.combiner = Some(combiner);
        self
    }

    /// Overrides the global timeout condition.
    ///
    /// Defaults to the environment's `attempt_global_timeout` elapsing
    /// (15 minutes unless configured otherwise).
    #[must_use]
    pub fn global_timeout(mut self, condition: TriggerCondition) -> Self {
        self.global_timeout = Some(condition);
        self
    }

    /// Builds the orchestration spec.
    ///
    /// # Errors
    ///
    /// Returns an error if no attempts or combiner were supplied, or if two
    /// attempts share a spec name (their derived child ids would collide).
    pub fn build(self) -> Result<Arc<JobSpec>> {
        if self.attempts.is_empty() {
            return Err(Error::InvalidSpec {
                message: format!("orchestration '{}' has no attempts", self.name),
            });
        }
        let mut seen = HashSet::new();
        for plan in &self.attempts {
            if !seen.insert(plan.spec.name().clone()) {
                return Err(Error::InvalidSpec {
                    message: format!(
                        "orchestration '{}' lists attempt '{}' twice",
                        self.name,
                        plan.spec.name()
                    ),
                });
            }
        }
        let combiner = self.combiner.ok_or_else(|| Error::InvalidSpec {
            message: format!("orchestration '{}' has no combiner", self.name),
        })?;

        let processor = AttemptProcessor {
            attempts: self.attempts,
            combiner,
            global_timeout: self.global_timeout,
        };

        JobSpec::builder(self.name)
            .params(self.params)
            .output(self.output)
            .processor(Arc::new(processor))
            .build()
    }
}

struct RunningAttempt {
    name: String,
    started_at: Instant,
    resolved: Arc<AtomicBool>,
    handle: JoinHandle<Result<Value>>,
}

fn snapshot(started: Instant, running: &[RunningAttempt]) -> TriggerContext {
    TriggerContext {
        total_elapsed: started.elapsed(),
        attempts: running
            .iter()
            .map(|attempt| AttemptStats {
                name: attempt.name.clone(),
                elapsed: attempt.started_at.elapsed(),
                resolved: attempt.resolved.load(Ordering::SeqCst),
            })
            .collect(),
    }
}

struct AttemptProcessor {
    attempts: Vec<AttemptPlan>,
    combiner: OutcomeCombiner,
    global_timeout: Option<TriggerCondition>,
}

#[async_trait]
impl Processor for AttemptProcessor {
    async fn process(&self, ctx: Arc<JobContext>) -> Result<ProcessorOutcome> {
        let poll = ctx.env().config().attempt_poll_interval;
        let default_timeout = ctx.env().config().attempt_global_timeout;
        let started = Instant::now();

        let mut pending: VecDeque<&AttemptPlan> = self.attempts.iter().collect();
        let mut running: Vec<RunningAttempt> = Vec::new();

        while let Some(head) = pending.front() {
            let trigger_ctx = snapshot(started, &running);
            if (head.trigger)(&trigger_ctx) {
                let plan = pending.pop_front().expect("head exists");
                let name = plan.spec.name().to_string();
                tracing::info!(attempt = %name, job_id = %ctx.job_id(), "starting attempt");

                let spawned = ctx
                    .spawn_job(Arc::clone(&plan.spec), &name, ctx.params().clone())
                    .await?;
                let resolved = Arc::new(AtomicBool::new(false));
                let flag = Arc::clone(&resolved);
                let handle = tokio::spawn(async move {
                    let output = spawned.next_output().await;
                    flag.store(true, Ordering::SeqCst);
                    output
                });
                running.push(RunningAttempt {
                    name,
                    started_at: Instant::now(),
                    resolved,
                    handle,
                });
            }
            tokio::time::sleep(poll).await;
        }

        // Await settlement, bounded by the global timeout condition.
        loop {
            if running.iter().all(|attempt| attempt.handle.is_finished()) {
                break;
            }
            let trigger_ctx = snapshot(started, &running);
            let expired = match &self.global_timeout {
                Some(condition) => condition(&trigger_ctx),
                None => trigger_ctx.total_elapsed >= default_timeout,
            };
            if expired {
                tracing::warn!(job_id = %ctx.job_id(), "global timeout reached with unresolved attempts");
                break;
            }
            tokio::time::sleep(poll).await;
        }

        let mut outcomes = Vec::with_capacity(running.len());
        for attempt in running {
            if attempt.handle.is_finished() {
                match attempt.handle.await {
                    Ok(Ok(value)) => outcomes.push(AttemptOutcome {
                        name: attempt.name,
                        result: Some(value),
                        errored: false,
                        timed_out: false,
                    }),
                    Ok(Err(error)) => {
                        tracing::warn!(attempt = %attempt.name, error = %error, "attempt errored");
                        outcomes.push(AttemptOutcome {
                            name: attempt.name,
                            result: None,
                            errored: true,
                            timed_out: false,
                        });
                    }
                    Err(join_error) => {
                        tracing::warn!(attempt = %attempt.name, error = %join_error, "attempt task failed");
                        outcomes.push(AttemptOutcome {
                            name: attempt.name,
                            result: None,
                            errored: true,
                            timed_out: false,
                        });
                    }
                }
            } else {
                // Reported as timed out; the child job is not cancelled (no
                // cancellation primitive is assumed at this layer).
                outcomes.push(AttemptOutcome {
                    name: attempt.name,
                    result: None,
                    errored: false,
                    timed_out: true,
                });
            }
        }

        let combined = (self.combiner)(outcomes)?;
        Ok(ProcessorOutcome::Complete(combined))
    }
}
