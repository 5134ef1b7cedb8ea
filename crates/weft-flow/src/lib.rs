//! # weft-flow
//!
//! Distributed job orchestration for pipelines of long-running, streaming
//! computation steps.
//!
//! This crate implements the orchestration domain, providing:
//!
//! - **Job Lifecycle**: Idempotent resume, status transitions, and
//!   heartbeat-based liveness recovery
//! - **Streaming Channels**: Named, ordered, single-producer message
//!   channels for job input/output
//! - **Child Spawning**: Deterministic child-job derivation with dependency
//!   bookkeeping and queue-native waits
//! - **Parallel Attempts**: Racing/staggering redundant attempts against
//!   trigger conditions
//! - **Large-Value Externalization**: Splitting oversized payload fields out
//!   of the control-plane data path
//!
//! ## Core Concepts
//!
//! - **Spec**: A declarative job type — schemas plus a processor
//! - **Job**: A unit of work with a caller-chosen, globally addressable id
//! - **Context**: The per-execution object a processor works through
//! - **Worker**: A consumer bound to one spec, pulling from a shared queue
//!
//! ## Guarantees
//!
//! - **At-most-one logical execution** per job id: completed results are
//!   cached in the job log and redeliveries short-circuit
//! - **Per-channel ordering**: stream messages arrive in emission order
//! - **Merge checkpointing**: incremental updates compose field-wise
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use weft_core::{JobId, ProjectId, SpecName};
//! use weft_flow::env::FlowEnv;
//! use weft_flow::error::Result;
//! use weft_flow::queue::{EnqueueOptions, QueuedJob};
//! use weft_flow::schema::PayloadSchema;
//! use weft_flow::spec::{JobSpec, ProcessorOutcome};
//! use weft_flow::worker::Worker;
//!
//! # async fn example() -> Result<()> {
//! let env = FlowEnv::in_memory(ProjectId::new("acme-media")?);
//!
//! let resize = JobSpec::builder(SpecName::new("resize")?)
//!     .params(PayloadSchema::object([("width", PayloadSchema::Integer)]))
//!     .processor_fn(|ctx| async move {
//!         let width = ctx.params()["width"].clone();
//!         Ok(ProcessorOutcome::Complete(json!({ "width": width, "resized": true })))
//!     })
//!     .build()?;
//!
//! // Enqueue a job and start a worker for the spec.
//! env.queue()
//!     .enqueue(
//!         QueuedJob::new(JobId::new("j1")?, resize.name().clone(), json!({"width": 10})),
//!         EnqueueOptions::new(),
//!     )
//!     .await?;
//! let handle = Worker::new(Arc::clone(&env), resize).start().await?;
//! # handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod attempts;
pub mod context;
pub mod env;
pub mod error;
pub mod externalize;
pub mod heartbeat;
pub mod log;
pub mod metrics;
pub mod queue;
pub mod schema;
pub mod spec;
pub mod stream;
pub mod worker;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::attempts::{
        AttemptOutcome, AttemptPlan, ParallelAttempts, TriggerContext, first_success,
    };
    pub use crate::context::{ExecutionOutcome, JobContext, SpawnedJob};
    pub use crate::env::{FlowConfig, FlowEnv};
    pub use crate::error::{Error, Result};
    pub use crate::externalize::{Externalized, externalize, reinline};
    pub use crate::heartbeat::{HeartbeatGuard, HeartbeatMonitor};
    pub use crate::log::{JobLogEntry, JobLogStore, JobLogUpdate, JobStatus, MergeStrategy};
    pub use crate::queue::{EnqueueOptions, EnqueueResult, JobQueue, QueuedJob};
    pub use crate::schema::{PayloadSchema, StreamSchemaSet};
    pub use crate::spec::{FnProcessor, JobSpec, Processor, ProcessorOutcome};
    pub use crate::stream::{ChannelKey, StreamCursor, StreamTransport};
    pub use crate::worker::{Worker, WorkerEvent, WorkerHandle};
}
