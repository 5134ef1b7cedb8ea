//! Observability infrastructure for weft.
//!
//! Structured logging with consistent spans. This module provides
//! initialization helpers and span constructors used across the worker and
//! execution-context code paths.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times; subsequent
/// calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `weft_flow=debug`)
///
/// # Example
///
/// ```rust
/// use weft_core::observability::{LogFormat, init_logging};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for a single job execution with standard fields.
///
/// # Example
///
/// ```rust
/// use weft_core::observability::job_span;
///
/// let span = job_span("begin_processing", "acme-media", "resize", "j1");
/// let _guard = span.enter();
/// // ... execute job step
/// ```
#[must_use]
pub fn job_span(operation: &str, project: &str, spec: &str, job_id: &str) -> Span {
    tracing::info_span!(
        "job",
        op = operation,
        project = project,
        spec = spec,
        job_id = job_id,
    )
}

/// Creates a span for worker-level operations.
#[must_use]
pub fn worker_span(operation: &str, project: &str, spec: &str) -> Span {
    tracing::info_span!(
        "worker",
        op = operation,
        project = project,
        spec = spec,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Pretty);
    }

    #[test]
    fn span_helper_creates_span() {
        let span = job_span("begin_processing", "acme-media", "resize", "j1");
        let _guard = span.enter();
        tracing::info!("test message in span");
    }
}
