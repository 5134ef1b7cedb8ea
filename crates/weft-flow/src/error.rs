//! Error types for the job-orchestration domain.
//!
//! Two conditions that look like failures are deliberately **not** errors:
//! an idempotent short-circuit on a completed job log entry, and a processor
//! suspending until its children settle. Both are expressed as outcome
//! variants (see [`crate::context::ExecutionOutcome`]) rather than error
//! control flow.

use weft_core::{JobId, SpecName};

/// The result type used throughout weft-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in orchestration operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A payload failed validation against its declared schema.
    #[error("schema violation at '{path}': expected {expected}, found {found}")]
    SchemaViolation {
        /// Slash-joined path of the offending field within the payload.
        path: String,
        /// The declared schema kind.
        expected: String,
        /// A short description of the value that was found.
        found: String,
    },

    /// A stream name is not declared by the job specification.
    #[error("unknown stream '{name}' for spec '{spec}'")]
    UnknownStream {
        /// The stream name that was requested.
        name: String,
        /// The spec that does not declare it.
        spec: SpecName,
    },

    /// The user-supplied processor failed.
    #[error("processor failed for job '{job_id}': {message}")]
    ProcessorFailed {
        /// The job whose processor failed.
        job_id: JobId,
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A job was not found by the queue.
    #[error("job not found: {job_id}")]
    JobNotFound {
        /// The job id that was not found.
        job_id: JobId,
    },

    /// A queue lease was stale or held by another execution.
    ///
    /// Expected under concurrent redelivery; the worker logs this at reduced
    /// severity and does not escalate.
    #[error("lock contention: {message}")]
    LockContention {
        /// Description of the contention.
        message: String,
    },

    /// A job log store operation failed.
    #[error("job log error: {message}")]
    JobLog {
        /// Description of the failure.
        message: String,
    },

    /// A streaming transport operation failed.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// A storage operation for an externalized value failed.
    ///
    /// Always fatal: masking it would silently corrupt persisted data.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A job specification is malformed.
    #[error("invalid spec: {message}")]
    InvalidSpec {
        /// Description of the problem.
        message: String,
    },

    /// A parallel-attempt orchestration produced no usable result.
    #[error("attempts exhausted: {message}")]
    AttemptsExhausted {
        /// Description of how the attempts ended.
        message: String,
    },

    /// An error from weft-core.
    #[error("core error: {0}")]
    Core(#[from] weft_core::Error),
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a processor failure from a plain message.
    #[must_use]
    pub fn processor(job_id: JobId, message: impl Into<String>) -> Self {
        Self::ProcessorFailed {
            job_id,
            message: message.into(),
            source: None,
        }
    }

    /// Returns true if this error is benign lock contention.
    #[must_use]
    pub const fn is_lock_contention(&self) -> bool {
        matches!(self, Self::LockContention { .. })
    }
}
