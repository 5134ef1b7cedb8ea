//! Streaming channel layer for job input/output.
//!
//! Channels are named, ordered, single-producer message sequences keyed by
//! `(project, spec, job id, direction, stream name)`. A job's processor
//! emits outputs and awaits inputs through its execution context; this
//! module defines the transport contract those accessors ride on.
//!
//! ## Ordering
//!
//! Messages from a single producer are delivered to the consumer cursor in
//! emission order, end-to-end. No cross-channel ordering guarantee is made.
//!
//! ## Consumer Cursors
//!
//! Each channel has one logical consumer cursor: repeated `next()` calls
//! drain the channel monotonically and never replay an already-consumed
//! message to the same cursor. Channels are created lazily on first publish
//! or subscribe and garbage-collected by the transport, not by this layer.

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use weft_core::{JobId, ProjectId, SpecName};

use crate::error::Result;

/// Direction of a job stream channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamDirection {
    /// Messages consumed by the job (`next_input`).
    Input,
    /// Messages produced by the job (`emit_output`).
    Output,
}

impl StreamDirection {
    /// Returns the path segment for this direction.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "in",
            Self::Output => "out",
        }
    }
}

/// Identity of a stream channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    /// Project namespace.
    pub project: ProjectId,
    /// The owning job's spec (pipeline name).
    pub spec: SpecName,
    /// The owning job.
    pub job_id: JobId,
    /// Input or output side.
    pub direction: StreamDirection,
    /// Stream name within the job.
    pub stream: String,
}

impl ChannelKey {
    /// Creates the key for an input stream.
    #[must_use]
    pub fn input(
        project: ProjectId,
        spec: SpecName,
        job_id: JobId,
        stream: impl Into<String>,
    ) -> Self {
        Self {
            project,
            spec,
            job_id,
            direction: StreamDirection::Input,
            stream: stream.into(),
        }
    }

    /// Creates the key for an output stream.
    #[must_use]
    pub fn output(
        project: ProjectId,
        spec: SpecName,
        job_id: JobId,
        stream: impl Into<String>,
    ) -> Self {
        Self {
            project,
            spec,
            job_id,
            direction: StreamDirection::Output,
            stream: stream.into(),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.project,
            self.spec,
            self.job_id,
            self.direction.as_str(),
            self.stream
        )
    }
}

/// An ordered consumer cursor over one channel.
///
/// Cursors are stateful: each `next()` advances past the returned message.
#[async_trait]
pub trait StreamCursor: Send {
    /// Suspends until the next message is available, then returns it.
    ///
    /// Messages are returned in strict publish order with no skips or
    /// duplicates relative to this cursor.
    async fn next(&mut self) -> Result<Value>;
}

/// The ordered-log/pub-sub transport channels ride on.
///
/// Implementations are assumed to provide their own internal concurrency
/// safety; this layer treats the transport as an already-safe collaborator.
/// Publishing is durable and bounded by the transport — it never blocks
/// indefinitely on a consumer.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Appends `message` to the channel, creating it if needed.
    async fn publish(&self, key: &ChannelKey, message: Value) -> Result<()>;

    /// Subscribes a cursor positioned at the beginning of the channel,
    /// creating the channel if needed.
    async fn subscribe(&self, key: &ChannelKey) -> Result<Box<dyn StreamCursor>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_key_display_layout() {
        let key = ChannelKey::output(
            ProjectId::new("acme-media").unwrap(),
            SpecName::new("resize").unwrap(),
            JobId::new("j1").unwrap(),
            "default",
        );
        assert_eq!(key.to_string(), "acme-media/resize/j1/out/default");
    }

    #[test]
    fn input_and_output_keys_differ() {
        let project = ProjectId::new("acme-media").unwrap();
        let spec = SpecName::new("resize").unwrap();
        let job = JobId::new("j1").unwrap();

        let input = ChannelKey::input(project.clone(), spec.clone(), job.clone(), "default");
        let output = ChannelKey::output(project, spec, job, "default");
        assert_ne!(input, output);
    }
}
