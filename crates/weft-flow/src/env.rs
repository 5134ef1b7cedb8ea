//! Shared execution environment for workers and job contexts.
//!
//! [`FlowEnv`] replaces ambient singletons (shared broker connections,
//! implicit loggers) with an explicit environment passed by `Arc` to every
//! [`Worker`](crate::worker::Worker) and
//! [`JobContext`](crate::context::JobContext). It is created once at
//! startup, shared by reference, and dropped last.

use std::sync::Arc;
use std::time::Duration;

use weft_core::{JobPaths, ProjectId, StorageBackend};

use crate::error::{Error, Result};
use crate::externalize::LARGE_VALUE_THRESHOLD;
use crate::log::JobLogStore;
use crate::log::liveness::LivenessStore;
use crate::queue::JobQueue;
use crate::stream::StreamTransport;

/// Tunable intervals and thresholds for the orchestration layer.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// String size above which checkpoint fields are externalized, in bytes.
    pub large_value_threshold: usize,
    /// How often the heartbeat monitor polls the liveness store.
    pub liveness_poll_interval: Duration,
    /// How long a job may go without a liveness signal before it is forcibly
    /// completed.
    pub liveness_timeout: Duration,
    /// Tick interval of the parallel-attempt trigger loop.
    pub attempt_poll_interval: Duration,
    /// Default global timeout for a parallel-attempt orchestration.
    pub attempt_global_timeout: Duration,
    /// How long an idle worker waits before polling the queue again.
    pub dequeue_poll_interval: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            large_value_threshold: LARGE_VALUE_THRESHOLD,
            liveness_poll_interval: Duration::from_secs(60),
            liveness_timeout: Duration::from_secs(10 * 60),
            attempt_poll_interval: Duration::from_millis(200),
            attempt_global_timeout: Duration::from_secs(15 * 60),
            dequeue_poll_interval: Duration::from_millis(100),
        }
    }
}

/// The shared environment: project scope, configuration, and collaborator
/// handles.
///
/// The storage backend is optional; without one, large-value externalization
/// is disabled and checkpoint values stay inline.
pub struct FlowEnv {
    project: ProjectId,
    config: FlowConfig,
    paths: JobPaths,
    job_log: Arc<dyn JobLogStore>,
    queue: Arc<dyn JobQueue>,
    transport: Arc<dyn StreamTransport>,
    liveness: Arc<dyn LivenessStore>,
    storage: Option<Arc<dyn StorageBackend>>,
}

impl std::fmt::Debug for FlowEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEnv")
            .field("project", &self.project)
            .field("config", &self.config)
            .field("storage", &self.storage.is_some())
            .finish_non_exhaustive()
    }
}

impl FlowEnv {
    /// Starts building an environment for `project`.
    #[must_use]
    pub fn builder(project: ProjectId) -> FlowEnvBuilder {
        FlowEnvBuilder {
            project,
            config: FlowConfig::default(),
            scratch_root: None,
            job_log: None,
            queue: None,
            transport: None,
            liveness: None,
            storage: None,
        }
    }

    /// Creates an environment backed entirely by in-memory collaborators.
    ///
    /// Intended for tests and local development.
    #[must_use]
    pub fn in_memory(project: ProjectId) -> Arc<Self> {
        let env = Self::builder(project)
            .job_log(Arc::new(crate::log::memory::InMemoryJobLog::new()))
            .queue(Arc::new(crate::queue::memory::InMemoryJobQueue::new()))
            .transport(Arc::new(crate::stream::memory::InMemoryTransport::new()))
            .liveness(Arc::new(crate::log::liveness::InMemoryLiveness::new()))
            .build()
            .expect("in-memory environment is complete");
        Arc::new(env)
    }

    /// Returns the project scope.
    #[must_use]
    pub const fn project(&self) -> &ProjectId {
        &self.project
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Returns the typed path helpers for this project.
    #[must_use]
    pub const fn paths(&self) -> &JobPaths {
        &self.paths
    }

    /// Returns the job log store.
    #[must_use]
    pub fn job_log(&self) -> &Arc<dyn JobLogStore> {
        &self.job_log
    }

    /// Returns the queue primitive.
    #[must_use]
    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    /// Returns the streaming transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn StreamTransport> {
        &self.transport
    }

    /// Returns the liveness store.
    #[must_use]
    pub fn liveness(&self) -> &Arc<dyn LivenessStore> {
        &self.liveness
    }

    /// Returns the storage backend, if one is configured.
    #[must_use]
    pub fn storage(&self) -> Option<&Arc<dyn StorageBackend>> {
        self.storage.as_ref()
    }
}

/// Builder for [`FlowEnv`].
pub struct FlowEnvBuilder {
    project: ProjectId,
    config: FlowConfig,
    scratch_root: Option<std::path::PathBuf>,
    job_log: Option<Arc<dyn JobLogStore>>,
    queue: Option<Arc<dyn JobQueue>>,
    transport: Option<Arc<dyn StreamTransport>>,
    liveness: Option<Arc<dyn LivenessStore>>,
    storage: Option<Arc<dyn StorageBackend>>,
}

impl FlowEnvBuilder {
    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the local scratch root (defaults to the system temp directory).
    #[must_use]
    pub fn scratch_root(mut self, root: impl Into<std::path::PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    /// Sets the job log store (required).
    #[must_use]
    pub fn job_log(mut self, job_log: Arc<dyn JobLogStore>) -> Self {
        self.job_log = Some(job_log);
        self
    }

    /// Sets the queue primitive (required).
    #[must_use]
    pub fn queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Sets the streaming transport (required).
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn StreamTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the liveness store (required).
    #[must_use]
    pub fn liveness(mut self, liveness: Arc<dyn LivenessStore>) -> Self {
        self.liveness = Some(liveness);
        self
    }

    /// Sets the storage backend (optional; enables large-value
    /// externalization and scratch sync).
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Builds the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a required collaborator is missing.
    pub fn build(self) -> Result<FlowEnv> {
        let missing = |what: &str| Error::InvalidSpec {
            message: format!("environment is missing a {what}"),
        };
        let paths = match self.scratch_root {
            Some(root) => JobPaths::with_scratch_root(self.project.clone(), root),
            None => JobPaths::new(self.project.clone()),
        };
        Ok(FlowEnv {
            project: self.project,
            config: self.config,
            paths,
            job_log: self.job_log.ok_or_else(|| missing("job log store"))?,
            queue: self.queue.ok_or_else(|| missing("queue"))?,
            transport: self.transport.ok_or_else(|| missing("stream transport"))?,
            liveness: self.liveness.ok_or_else(|| missing("liveness store"))?,
            storage: self.storage,
        })
    }
}
