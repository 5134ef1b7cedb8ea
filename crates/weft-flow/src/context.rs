//! Per-execution job context.
//!
//! A [`JobContext`] is created for each dequeued unit of work and owns that
//! execution's lifecycle: the idempotent-resume check, status persistence,
//! streaming accessors, incremental checkpointing (routed through the
//! large-value externalizer), child spawning, and scratch-file handling.
//!
//! ## Lifecycle
//!
//! ```text
//! not-started ──► active ──► completed
//!                   │  └────► failed
//!                   └───────► waiting_children ──(children settle, requeue)──► active
//! ```
//!
//! `waiting_children` is non-terminal: the queue redelivers the job once the
//! children it waits on settle, and the redelivered execution re-enters at
//! `active` with the idempotent-resume check applied first.
//!
//! ## Concurrent redelivery
//!
//! At most one execution holds a valid lease at a time. An execution that
//! loses its lease observes lock contention on queue settlement and abandons
//! further side effects; the idempotent-resume check reconciles state on any
//! subsequent attempt.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use weft_core::{JobId, LeaseToken};

use crate::env::FlowEnv;
use crate::error::{Error, Result};
use crate::externalize::{externalize, value_to_bytes};
use crate::log::{JobLogUpdate, JobStatus};
use crate::metrics;
use crate::queue::{EnqueueOptions, QueuedJob};
use crate::spec::{JobSpec, ProcessorOutcome};
use crate::stream::{ChannelKey, StreamCursor, StreamDirection};

/// Outcome of one execution attempt.
///
/// Suspension on children is a first-class outcome, not an error; the worker
/// translates it into a queue deferral rather than a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The job completed with this (possibly cached) output.
    Completed(Value),
    /// The execution suspended until its spawned children settle.
    WaitingChildren,
}

impl ExecutionOutcome {
    /// Returns true if the job completed.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Returns the output value if the job completed.
    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Completed(value) => Some(value),
            Self::WaitingChildren => None,
        }
    }
}

type SharedCursor = Arc<Mutex<Box<dyn StreamCursor>>>;

/// Runtime object bound to one dequeued unit of work.
pub struct JobContext {
    env: Arc<FlowEnv>,
    spec: Arc<JobSpec>,
    job_id: JobId,
    params: Value,
    parent_id: Option<JobId>,
    lease: Option<LeaseToken>,
    working_dir: PathBuf,
    input_cursors: Mutex<HashMap<String, SharedCursor>>,
    materialized: Mutex<HashMap<String, PathBuf>>,
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("spec", &self.spec.name())
            .field("parent_id", &self.parent_id)
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

impl JobContext {
    /// Creates a context for a dequeued job.
    ///
    /// `lease` is the exclusive-ownership proof granted by the queue; direct
    /// invocations (tests, drivers that bypass a queue) may pass `None`, in
    /// which case queue settlement and the heartbeat monitor are
    /// unavailable.
    #[must_use]
    pub fn new(
        env: Arc<FlowEnv>,
        spec: Arc<JobSpec>,
        job: QueuedJob,
        lease: Option<LeaseToken>,
    ) -> Arc<Self> {
        let working_dir = env.paths().scratch_dir(&job.job_id);
        Arc::new(Self {
            env,
            spec,
            job_id: job.job_id,
            params: job.params,
            parent_id: job.parent_id,
            lease,
            working_dir,
            input_cursors: Mutex::new(HashMap::new()),
            materialized: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the job id.
    #[must_use]
    pub const fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Returns the input parameters.
    #[must_use]
    pub const fn params(&self) -> &Value {
        &self.params
    }

    /// Returns the bound spec.
    #[must_use]
    pub const fn spec(&self) -> &Arc<JobSpec> {
        &self.spec
    }

    /// Returns the shared environment.
    #[must_use]
    pub const fn env(&self) -> &Arc<FlowEnv> {
        &self.env
    }

    /// Returns the spawning parent, if this job was spawned as a child.
    #[must_use]
    pub const fn parent_id(&self) -> Option<&JobId> {
        self.parent_id.as_ref()
    }

    /// Returns the queue lease, if this execution holds one.
    #[must_use]
    pub const fn lease(&self) -> Option<&LeaseToken> {
        self.lease.as_ref()
    }

    /// Returns the per-job scratch directory for local artifacts.
    #[must_use]
    pub const fn working_dir(&self) -> &PathBuf {
        &self.working_dir
    }

    /// Runs the execution lifecycle for this unit of work.
    ///
    /// 1. If a completed log entry exists for this job id, returns its data
    ///    without invoking the processor (at-most-one logical execution per
    ///    job id, even under duplicate delivery).
    /// 2. Otherwise transitions the log entry to `active`, records the
    ///    parent dependency edge if one is declared, and invokes the
    ///    processor.
    /// 3. Persists the terminal status (`completed` with the validated
    ///    output, `waiting_children`, or `failed`) and returns the outcome.
    ///
    /// # Errors
    ///
    /// Propagates processor failures, output schema violations, and
    /// job log store failures. Suspension on children is **not** an error.
    pub async fn begin_processing(self: &Arc<Self>) -> Result<ExecutionOutcome> {
        use tracing::Instrument as _;

        let span = weft_core::observability::job_span(
            "begin_processing",
            self.env.project().as_str(),
            self.spec.name().as_str(),
            self.job_id.as_str(),
        );
        self.run_lifecycle().instrument(span).await
    }

    async fn run_lifecycle(self: &Arc<Self>) -> Result<ExecutionOutcome> {
        let project = self.env.project();
        let log = self.env.job_log();

        if let Some(saved) = log
            .get(project, self.spec.name(), &self.job_id, Some(JobStatus::Completed))
            .await?
        {
            tracing::info!("skipping job: completed log entry exists");
            metrics::record_job_skipped(self.spec.name());
            return Ok(ExecutionOutcome::Completed(saved.data));
        }

        tracing::info!("picked up job");
        log.upsert(
            project,
            self.spec.name(),
            &self.job_id,
            JobLogUpdate::status_only(JobStatus::Active),
        )
        .await?;

        if let Some(parent) = &self.parent_id {
            log.record_dependency(project, parent, &self.job_id).await?;
        }

        let processor = Arc::clone(self.spec.processor());
        match processor.process(Arc::clone(self)).await {
            Ok(ProcessorOutcome::Complete(output)) => {
                if let Err(violation) = self.spec.validate_output(&output) {
                    tracing::warn!(error = %violation, "processor output failed schema validation");
                    log.upsert(
                        project,
                        self.spec.name(),
                        &self.job_id,
                        JobLogUpdate::status_only(JobStatus::Failed),
                    )
                    .await?;
                    return Err(violation);
                }
                log.upsert(
                    project,
                    self.spec.name(),
                    &self.job_id,
                    JobLogUpdate::finalize(JobStatus::Completed, output.clone()),
                )
                .await?;
                Ok(ExecutionOutcome::Completed(output))
            }
            Ok(ProcessorOutcome::AwaitChildren) => {
                tracing::info!("execution suspended until children settle");
                metrics::record_job_deferred(self.spec.name());
                log.upsert(
                    project,
                    self.spec.name(),
                    &self.job_id,
                    JobLogUpdate::status_only(JobStatus::WaitingChildren),
                )
                .await?;
                Ok(ExecutionOutcome::WaitingChildren)
            }
            Err(error) => {
                tracing::error!(error = %error, "processor failed");
                log.upsert(
                    project,
                    self.spec.name(),
                    &self.job_id,
                    JobLogUpdate::status_only(JobStatus::Failed),
                )
                .await?;
                Err(error)
            }
        }
    }

    /// Checkpoints partial state into the job log entry.
    ///
    /// With a storage backend configured, oversized and binary fields are
    /// externalized first: the blobs are persisted under the job's
    /// large-value prefix and the residual structure (sentinels in place) is
    /// merged — field-wise, not replaced — into the entry's data. Safe to
    /// call any number of times per execution.
    ///
    /// # Errors
    ///
    /// Storage failures are fatal and propagate; masking them would corrupt
    /// the persisted checkpoint.
    pub async fn update(&self, incremental: Value) -> Result<()> {
        let residual = match self.env.storage() {
            Some(storage) => {
                let split = externalize(&incremental, self.env.config().large_value_threshold);
                for extracted in &split.extracted {
                    let path = self.env.paths().large_value(&self.job_id, &extracted.path);
                    let bytes = value_to_bytes(&extracted.value)?;
                    storage.put(&path, bytes).await.map_err(|e| {
                        Error::storage_with_source(
                            format!("failed to persist large value '{}'", extracted.path),
                            e,
                        )
                    })?;
                }
                split.residual
            }
            None => incremental,
        };

        self.env
            .job_log()
            .upsert(
                self.env.project(),
                self.spec.name(),
                &self.job_id,
                JobLogUpdate::merge_data(residual),
            )
            .await
    }

    // --- Streaming accessors ---

    /// Emits a value on the implicit output stream.
    ///
    /// # Errors
    ///
    /// Returns a schema violation if the value does not conform to the
    /// stream's declared schema, or an unknown-stream error if the spec
    /// declares no resolvable output stream.
    pub async fn emit_output(&self, value: Value) -> Result<()> {
        self.emit_output_named(None, value).await
    }

    /// Emits a value on a named output stream.
    ///
    /// # Errors
    ///
    /// As [`JobContext::emit_output`].
    pub async fn emit_output_to(&self, stream: &str, value: Value) -> Result<()> {
        self.emit_output_named(Some(stream), value).await
    }

    async fn emit_output_named(&self, stream: Option<&str>, value: Value) -> Result<()> {
        let (name, schema) = self
            .spec
            .output_streams()
            .resolve(self.spec.name(), stream)?;
        schema.validate(&value)?;

        let key = ChannelKey::output(
            self.env.project().clone(),
            self.spec.name().clone(),
            self.job_id.clone(),
            name,
        );
        self.env.transport().publish(&key, value).await?;
        metrics::record_stream_message(StreamDirection::Output);
        Ok(())
    }

    /// Awaits the next message on the implicit input stream.
    ///
    /// Suspends until a message is available, then returns it in strict
    /// publish order. Repeated calls drain the channel monotonically; a
    /// consumed message is never replayed to this context.
    ///
    /// # Errors
    ///
    /// Returns an unknown-stream error if the spec declares no resolvable
    /// input stream, or a schema violation if the message does not conform.
    pub async fn next_input(&self) -> Result<Value> {
        self.next_input_named(None).await
    }

    /// Awaits the next message on a named input stream.
    ///
    /// # Errors
    ///
    /// As [`JobContext::next_input`].
    pub async fn next_input_from(&self, stream: &str) -> Result<Value> {
        self.next_input_named(Some(stream)).await
    }

    async fn next_input_named(&self, stream: Option<&str>) -> Result<Value> {
        let (name, schema) = self.spec.input_streams().resolve(self.spec.name(), stream)?;
        let name = name.to_string();
        let schema = schema.clone();

        let cursor = {
            let mut cursors = self.input_cursors.lock().await;
            match cursors.get(&name) {
                Some(cursor) => Arc::clone(cursor),
                None => {
                    let key = ChannelKey::input(
                        self.env.project().clone(),
                        self.spec.name().clone(),
                        self.job_id.clone(),
                        name.clone(),
                    );
                    let cursor: SharedCursor =
                        Arc::new(Mutex::new(self.env.transport().subscribe(&key).await?));
                    cursors.insert(name, Arc::clone(&cursor));
                    cursor
                }
            }
        };

        let value = {
            let mut cursor = cursor.lock().await;
            cursor.next().await?
        };
        schema.validate(&value)?;
        metrics::record_stream_message(StreamDirection::Input);
        Ok(value)
    }

    // --- Child spawning ---

    /// Spawns a child job with the deterministic id `{self}/{suffix}`.
    ///
    /// Validates `params` against the child spec, enqueues the unit of work,
    /// and returns a handle for feeding the child's input and awaiting its
    /// output. Re-spawning the same suffix on a retried execution addresses
    /// the existing child (queue-level deduplication).
    ///
    /// # Errors
    ///
    /// Returns a schema violation for invalid params or an invalid-id error
    /// for a malformed suffix.
    pub async fn spawn_job(
        &self,
        spec: Arc<JobSpec>,
        suffix: &str,
        params: Value,
    ) -> Result<SpawnedJob> {
        let options = EnqueueOptions::spawned_by(self.job_id.clone());
        self.spawn_inner(spec, suffix, params, options).await
    }

    /// Spawns a child job this execution must wait on.
    ///
    /// In addition to [`JobContext::spawn_job`] semantics, registers the
    /// child as a dependency with the queue's native wait mechanism and
    /// records the parent→child dependency edge. The processor should return
    /// [`ProcessorOutcome::AwaitChildren`] once all awaited children are
    /// spawned.
    ///
    /// # Errors
    ///
    /// As [`JobContext::spawn_job`].
    pub async fn spawn_child_to_wait_on(
        &self,
        spec: Arc<JobSpec>,
        suffix: &str,
        params: Value,
    ) -> Result<SpawnedJob> {
        let options = EnqueueOptions::awaited_by(self.job_id.clone());
        let spawned = self.spawn_inner(spec, suffix, params, options).await?;
        self.env
            .job_log()
            .record_dependency(self.env.project(), &self.job_id, spawned.job_id())
            .await?;
        Ok(spawned)
    }

    async fn spawn_inner(
        &self,
        spec: Arc<JobSpec>,
        suffix: &str,
        params: Value,
        options: EnqueueOptions,
    ) -> Result<SpawnedJob> {
        spec.validate_params(&params)?;
        let child_id = self.job_id.child(suffix)?;

        let job = QueuedJob::new(child_id.clone(), spec.name().clone(), params);
        let result = self.env.queue().enqueue(job, options).await?;
        if !result.is_enqueued() {
            tracing::debug!(child = %child_id, "child already enqueued; idempotent re-spawn");
        }

        Ok(SpawnedJob {
            env: Arc::clone(&self.env),
            spec,
            job_id: child_id,
            output_cursor: Mutex::new(None),
        })
    }

    /// Returns true if all children registered for this job have settled.
    ///
    /// # Errors
    ///
    /// Propagates queue failures.
    pub async fn children_settled(&self) -> Result<bool> {
        self.env.queue().children_settled(&self.job_id).await
    }

    // --- Scratch artifacts ---

    /// Writes `data` to `relative_path` inside the job's scratch directory,
    /// creating intermediate directories as needed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the filesystem write fails.
    pub async fn save_to_text_file(&self, relative_path: &str, data: &str) -> Result<PathBuf> {
        let path = self.working_dir.join(relative_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::storage_with_source(
                    format!("failed to create scratch directory for '{relative_path}'"),
                    e,
                )
            })?;
        }
        tokio::fs::write(&path, data).await.map_err(|e| {
            Error::storage_with_source(format!("failed to write scratch file '{relative_path}'"), e)
        })?;
        Ok(path)
    }

    /// Uploads the job's scratch directory to the storage backend.
    ///
    /// Files land under the job's scratch prefix, keyed by their path
    /// relative to the scratch directory. Returns the number of files
    /// uploaded; without a storage backend this is a no-op returning 0.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a read or upload fails.
    pub async fn sync_scratch_dir(&self) -> Result<usize> {
        let Some(storage) = self.env.storage() else {
            tracing::debug!("no storage backend; skipping scratch sync");
            return Ok(0);
        };
        if !self.working_dir.exists() {
            return Ok(0);
        }

        let mut uploaded = 0;
        let mut pending = vec![self.working_dir.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
                Error::storage_with_source("failed to read scratch directory", e)
            })?;
            while let Some(entry) = entries.next_entry().await.map_err(|e| {
                Error::storage_with_source("failed to read scratch directory entry", e)
            })? {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                let relative = path
                    .strip_prefix(&self.working_dir)
                    .map_err(|e| Error::storage_with_source("scratch file outside root", e))?
                    .to_string_lossy()
                    .replace('\\', "/");
                let bytes = tokio::fs::read(&path).await.map_err(|e| {
                    Error::storage_with_source(format!("failed to read scratch file '{relative}'"), e)
                })?;
                let key = self.env.paths().scratch_blob(&self.job_id, &relative);
                storage.put(&key, bytes.into()).await.map_err(|e| {
                    Error::storage_with_source(format!("failed to upload scratch file '{relative}'"), e)
                })?;
                uploaded += 1;
            }
        }
        Ok(uploaded)
    }

    // --- Externalized value access ---

    /// Lazily materializes an externalized value into the scratch directory.
    ///
    /// On first access the blob is fetched from the storage backend and
    /// cached locally for the remainder of the execution; later calls return
    /// the cached path.
    ///
    /// # Errors
    ///
    /// Returns a storage error if no backend is configured or the fetch
    /// fails.
    pub async fn ensure_local_file(&self, field_path: &str) -> Result<PathBuf> {
        {
            let cache = self.materialized.lock().await;
            if let Some(path) = cache.get(field_path) {
                return Ok(path.clone());
            }
        }

        let storage = self.env.storage().ok_or_else(|| {
            Error::storage("no storage backend configured for externalized values")
        })?;
        let key = self.env.paths().large_value(&self.job_id, field_path);
        let bytes = storage.get(&key).await.map_err(|e| {
            Error::storage_with_source(format!("failed to fetch externalized value '{field_path}'"), e)
        })?;

        let local = self.working_dir.join("large-values").join(field_path);
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::storage_with_source("failed to create large-value cache directory", e)
            })?;
        }
        tokio::fs::write(&local, &bytes).await.map_err(|e| {
            Error::storage_with_source(format!("failed to cache externalized value '{field_path}'"), e)
        })?;

        let mut cache = self.materialized.lock().await;
        cache.insert(field_path.to_string(), local.clone());
        Ok(local)
    }

    /// Resolves a public URL for an externalized field.
    ///
    /// # Errors
    ///
    /// Returns a storage error if no backend is configured or the backend
    /// does not expose public URLs.
    pub fn large_value_public_url(&self, field_path: &str) -> Result<String> {
        let storage = self
            .env
            .storage()
            .ok_or_else(|| Error::storage("no storage backend configured"))?;
        let key = self.env.paths().large_value(&self.job_id, field_path);
        storage
            .public_url(&key)
            .ok_or_else(|| Error::storage("storage backend does not expose public URLs"))
    }
}

/// Handle to a spawned child job.
///
/// Exposes the child's streams: the spawning execution can feed its input
/// and await its eventual output. The output subscription starts at the
/// beginning of the child's output channel, so no message is missed however
/// late the subscription happens.
pub struct SpawnedJob {
    env: Arc<FlowEnv>,
    spec: Arc<JobSpec>,
    job_id: JobId,
    output_cursor: Mutex<Option<Box<dyn StreamCursor>>>,
}

impl std::fmt::Debug for SpawnedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedJob")
            .field("job_id", &self.job_id)
            .field("spec", &self.spec.name())
            .finish_non_exhaustive()
    }
}

impl SpawnedJob {
    /// Returns the child's job id.
    #[must_use]
    pub const fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Awaits the next message on the child's implicit output stream.
    ///
    /// # Errors
    ///
    /// Returns an unknown-stream error if the child spec declares no
    /// resolvable output stream, or a transport error.
    pub async fn next_output(&self) -> Result<Value> {
        let mut slot = self.output_cursor.lock().await;
        if slot.is_none() {
            let (name, _) = self.spec.output_streams().resolve(self.spec.name(), None)?;
            let key = ChannelKey::output(
                self.env.project().clone(),
                self.spec.name().clone(),
                self.job_id.clone(),
                name,
            );
            *slot = Some(self.env.transport().subscribe(&key).await?);
        }
        slot.as_mut().expect("cursor initialized").next().await
    }

    /// Publishes a message to the child's implicit input stream.
    ///
    /// # Errors
    ///
    /// Returns a schema violation if the message does not conform to the
    /// child's declared input schema.
    pub async fn send_input(&self, value: Value) -> Result<()> {
        self.send_input_named(None, value).await
    }

    /// Publishes a message to a named input stream of the child.
    ///
    /// # Errors
    ///
    /// As [`SpawnedJob::send_input`].
    pub async fn send_input_to(&self, stream: &str, value: Value) -> Result<()> {
        self.send_input_named(Some(stream), value).await
    }

    async fn send_input_named(&self, stream: Option<&str>, value: Value) -> Result<()> {
        let (name, schema) = self.spec.input_streams().resolve(self.spec.name(), stream)?;
        schema.validate(&value)?;
        let key = ChannelKey::input(
            self.env.project().clone(),
            self.spec.name().clone(),
            self.job_id.clone(),
            name,
        );
        self.env.transport().publish(&key, value).await?;
        metrics::record_stream_message(StreamDirection::Input);
        Ok(())
    }
}
