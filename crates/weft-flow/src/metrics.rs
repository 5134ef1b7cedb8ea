//! Observability metrics for the orchestration layer.
//!
//! Metrics are exposed via the `metrics` crate facade and are
//! Prometheus-compatible when an exporter is installed by the host process.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `weft_flow_jobs_dequeued_total` | Counter | `spec` | Jobs picked up by workers |
//! | `weft_flow_jobs_completed_total` | Counter | `spec` | Jobs settled successfully |
//! | `weft_flow_jobs_failed_total` | Counter | `spec` | Jobs settled with failure |
//! | `weft_flow_jobs_skipped_total` | Counter | `spec` | Idempotent short-circuits |
//! | `weft_flow_jobs_deferred_total` | Counter | `spec` | Executions suspended on children |
//! | `weft_flow_stream_messages_total` | Counter | `direction` | Stream messages through contexts |
//! | `weft_flow_heartbeat_expirations_total` | Counter | `spec` | Forced completions by the heartbeat monitor |

use metrics::counter;

use weft_core::SpecName;

use crate::stream::StreamDirection;

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Jobs picked up by workers.
    pub const JOBS_DEQUEUED_TOTAL: &str = "weft_flow_jobs_dequeued_total";
    /// Counter: Jobs settled successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "weft_flow_jobs_completed_total";
    /// Counter: Jobs settled with failure.
    pub const JOBS_FAILED_TOTAL: &str = "weft_flow_jobs_failed_total";
    /// Counter: Idempotent short-circuits on completed log entries.
    pub const JOBS_SKIPPED_TOTAL: &str = "weft_flow_jobs_skipped_total";
    /// Counter: Executions suspended until children settle.
    pub const JOBS_DEFERRED_TOTAL: &str = "weft_flow_jobs_deferred_total";
    /// Counter: Stream messages published or consumed through contexts.
    pub const STREAM_MESSAGES_TOTAL: &str = "weft_flow_stream_messages_total";
    /// Counter: Forced completions by the heartbeat monitor.
    pub const HEARTBEAT_EXPIRATIONS_TOTAL: &str = "weft_flow_heartbeat_expirations_total";
}

/// Records a job dequeue.
pub fn record_job_dequeued(spec: &SpecName) {
    counter!(names::JOBS_DEQUEUED_TOTAL, "spec" => spec.to_string()).increment(1);
}

/// Records a successful settlement.
pub fn record_job_completed(spec: &SpecName) {
    counter!(names::JOBS_COMPLETED_TOTAL, "spec" => spec.to_string()).increment(1);
}

/// Records a failed settlement.
pub fn record_job_failed(spec: &SpecName) {
    counter!(names::JOBS_FAILED_TOTAL, "spec" => spec.to_string()).increment(1);
}

/// Records an idempotent short-circuit.
pub fn record_job_skipped(spec: &SpecName) {
    counter!(names::JOBS_SKIPPED_TOTAL, "spec" => spec.to_string()).increment(1);
}

/// Records an execution suspending on its children.
pub fn record_job_deferred(spec: &SpecName) {
    counter!(names::JOBS_DEFERRED_TOTAL, "spec" => spec.to_string()).increment(1);
}

/// Records a stream message moving through a context.
pub fn record_stream_message(direction: StreamDirection) {
    counter!(names::STREAM_MESSAGES_TOTAL, "direction" => direction.as_str()).increment(1);
}

/// Records a forced completion by the heartbeat monitor.
pub fn record_heartbeat_expiration(spec: &SpecName) {
    counter!(names::HEARTBEAT_EXPIRATIONS_TOTAL, "spec" => spec.to_string()).increment(1);
}
