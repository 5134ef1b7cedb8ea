//! Job specifications: declarative descriptions of job types.
//!
//! A [`JobSpec`] names a job type, bounds its per-worker concurrency,
//! declares schemas for its parameters, output, and streams, and carries the
//! user-supplied processor. Specs are pure data plus validation — immutable
//! after construction, with no runtime side effects of their own.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use weft_core::SpecName;

use crate::context::JobContext;
use crate::error::{Error, Result};
use crate::schema::{PayloadSchema, StreamSchemaSet};

/// Default maximum simultaneous executions per worker.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// The result of a processor invocation.
///
/// Suspension is an explicit variant, not an error: a processor that has
/// spawned children it must wait on returns [`ProcessorOutcome::AwaitChildren`]
/// and the execution is requeued by the queue primitive once they settle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorOutcome {
    /// The job finished with this output value.
    Complete(Value),
    /// The job suspends until the children it spawned have settled.
    AwaitChildren,
}

/// User-supplied business logic for a job type.
///
/// The processor is invoked with the execution context as its sole argument
/// and may read inputs, emit outputs, checkpoint partial state, and spawn
/// children through it.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Processes one unit of work.
    async fn process(&self, ctx: Arc<JobContext>) -> Result<ProcessorOutcome>;
}

/// Adapts a plain async closure into a [`Processor`].
///
/// ## Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use serde_json::json;
/// use weft_flow::context::JobContext;
/// use weft_flow::spec::{FnProcessor, Processor, ProcessorOutcome};
///
/// let processor = FnProcessor::new(|ctx: Arc<JobContext>| async move {
///     let _params = ctx.params().clone();
///     Ok(ProcessorOutcome::Complete(json!({"ok": true})))
/// });
/// # let _: Arc<dyn Processor> = Arc::new(processor);
/// ```
pub struct FnProcessor<F>(F);

impl<F> FnProcessor<F> {
    /// Wraps `f` as a processor.
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(Arc<JobContext>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<ProcessorOutcome>> + Send,
{
    async fn process(&self, ctx: Arc<JobContext>) -> Result<ProcessorOutcome> {
        (self.0)(ctx).await
    }
}

/// A declarative job type definition.
pub struct JobSpec {
    name: SpecName,
    concurrency: usize,
    params: PayloadSchema,
    output: PayloadSchema,
    input_streams: StreamSchemaSet,
    output_streams: StreamSchemaSet,
    processor: Arc<dyn Processor>,
}

impl std::fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSpec")
            .field("name", &self.name)
            .field("concurrency", &self.concurrency)
            .field("params", &self.params)
            .field("output", &self.output)
            .field("input_streams", &self.input_streams)
            .field("output_streams", &self.output_streams)
            .finish_non_exhaustive()
    }
}

impl JobSpec {
    /// Starts building a spec named `name`.
    #[must_use]
    pub fn builder(name: SpecName) -> JobSpecBuilder {
        JobSpecBuilder {
            name,
            concurrency: DEFAULT_CONCURRENCY,
            params: PayloadSchema::Any,
            output: PayloadSchema::Any,
            input_streams: StreamSchemaSet::new(),
            output_streams: StreamSchemaSet::new(),
            processor: None,
        }
    }

    /// Returns the spec name.
    #[must_use]
    pub const fn name(&self) -> &SpecName {
        &self.name
    }

    /// Returns the maximum simultaneous executions per worker.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the parameter schema.
    #[must_use]
    pub const fn params_schema(&self) -> &PayloadSchema {
        &self.params
    }

    /// Returns the output schema.
    #[must_use]
    pub const fn output_schema(&self) -> &PayloadSchema {
        &self.output
    }

    /// Returns the declared input stream schemas.
    #[must_use]
    pub const fn input_streams(&self) -> &StreamSchemaSet {
        &self.input_streams
    }

    /// Returns the declared output stream schemas.
    #[must_use]
    pub const fn output_streams(&self) -> &StreamSchemaSet {
        &self.output_streams
    }

    /// Returns the bound processor.
    #[must_use]
    pub fn processor(&self) -> &Arc<dyn Processor> {
        &self.processor
    }

    /// Validates `params` against the parameter schema.
    ///
    /// # Errors
    ///
    /// Returns a schema violation on mismatch.
    pub fn validate_params(&self, params: &Value) -> Result<()> {
        self.params.validate(params)
    }

    /// Validates `output` against the output schema.
    ///
    /// # Errors
    ///
    /// Returns a schema violation on mismatch.
    pub fn validate_output(&self, output: &Value) -> Result<()> {
        self.output.validate(output)
    }

    /// Derives a variant of this spec with a transformed output schema.
    ///
    /// The derived spec shares this spec's identity, processor wiring,
    /// concurrency, and stream declarations. Used to wrap third-party
    /// adapters whose raw output must be namespaced:
    ///
    /// ```rust,ignore
    /// let wrapped = spec.derive(|raw| PayloadSchema::object([("model_result", raw)]));
    /// ```
    #[must_use]
    pub fn derive<F>(&self, transform: F) -> Self
    where
        F: FnOnce(PayloadSchema) -> PayloadSchema,
    {
        Self {
            name: self.name.clone(),
            concurrency: self.concurrency,
            params: self.params.clone(),
            output: transform(self.output.clone()),
            input_streams: self.input_streams.clone(),
            output_streams: self.output_streams.clone(),
            processor: Arc::clone(&self.processor),
        }
    }
}

/// Builder for [`JobSpec`].
pub struct JobSpecBuilder {
    name: SpecName,
    concurrency: usize,
    params: PayloadSchema,
    output: PayloadSchema,
    input_streams: StreamSchemaSet,
    output_streams: StreamSchemaSet,
    processor: Option<Arc<dyn Processor>>,
}

impl JobSpecBuilder {
    /// Sets the maximum simultaneous executions per worker.
    #[must_use]
    pub const fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the parameter schema (defaults to `Any`).
    #[must_use]
    pub fn params(mut self, schema: PayloadSchema) -> Self {
        self.params = schema;
        self
    }

    /// Sets the output schema (defaults to `Any`).
    #[must_use]
    pub fn output(mut self, schema: PayloadSchema) -> Self {
        self.output = schema;
        self
    }

    /// Declares a named input stream.
    #[must_use]
    pub fn input_stream(mut self, name: impl Into<String>, schema: PayloadSchema) -> Self {
        self.input_streams.insert(name, schema);
        self
    }

    /// Declares a named output stream.
    #[must_use]
    pub fn output_stream(mut self, name: impl Into<String>, schema: PayloadSchema) -> Self {
        self.output_streams.insert(name, schema);
        self
    }

    /// Sets the processor.
    #[must_use]
    pub fn processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Sets the processor from a plain async closure.
    #[must_use]
    pub fn processor_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Arc<JobContext>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<ProcessorOutcome>> + Send + 'static,
    {
        self.processor(Arc::new(FnProcessor::new(f)))
    }

    /// Builds the spec.
    ///
    /// # Errors
    ///
    /// Returns an error if no processor was set or concurrency is zero.
    pub fn build(self) -> Result<Arc<JobSpec>> {
        if self.concurrency == 0 {
            return Err(Error::InvalidSpec {
                message: format!("spec '{}' must allow at least one concurrent execution", self.name),
            });
        }
        let processor = self.processor.ok_or_else(|| Error::InvalidSpec {
            message: format!("spec '{}' has no processor", self.name),
        })?;
        Ok(Arc::new(JobSpec {
            name: self.name,
            concurrency: self.concurrency,
            params: self.params,
            output: self.output,
            input_streams: self.input_streams,
            output_streams: self.output_streams,
            processor,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_spec(name: &str) -> Arc<JobSpec> {
        JobSpec::builder(SpecName::new(name).unwrap())
            .processor_fn(|_ctx| async { Ok(ProcessorOutcome::Complete(json!(null))) })
            .build()
            .unwrap()
    }

    #[test]
    fn builder_defaults() {
        let spec = noop_spec("resize");
        assert_eq!(spec.concurrency(), DEFAULT_CONCURRENCY);
        assert_eq!(spec.params_schema(), &PayloadSchema::Any);
        assert!(spec.input_streams().is_empty());
    }

    #[test]
    fn builder_requires_processor() {
        let result = JobSpec::builder(SpecName::new("resize").unwrap()).build();
        assert!(result.is_err());
    }

    #[test]
    fn zero_concurrency_is_invalid() {
        let result = JobSpec::builder(SpecName::new("resize").unwrap())
            .concurrency(0)
            .processor_fn(|_ctx| async { Ok(ProcessorOutcome::Complete(json!(null))) })
            .build();
        assert!(matches!(result, Err(Error::InvalidSpec { .. })));
    }

    #[test]
    fn params_validation_applies_schema() {
        let spec = JobSpec::builder(SpecName::new("resize").unwrap())
            .params(PayloadSchema::object([("width", PayloadSchema::Integer)]))
            .processor_fn(|_ctx| async { Ok(ProcessorOutcome::Complete(json!(null))) })
            .build()
            .unwrap();

        assert!(spec.validate_params(&json!({"width": 10})).is_ok());
        assert!(spec.validate_params(&json!({"width": "ten"})).is_err());
    }

    #[test]
    fn derive_shares_identity_and_transforms_output() {
        let spec = JobSpec::builder(SpecName::new("infer").unwrap())
            .output(PayloadSchema::String)
            .processor_fn(|_ctx| async { Ok(ProcessorOutcome::Complete(json!("raw"))) })
            .build()
            .unwrap();

        let wrapped = spec.derive(|raw| PayloadSchema::object([("model_result", raw)]));

        assert_eq!(wrapped.name(), spec.name());
        assert!(wrapped.validate_output(&json!({"model_result": "x"})).is_ok());
        assert!(wrapped.validate_output(&json!("x")).is_err());
        // The underlying processor wiring is shared.
        assert!(Arc::ptr_eq(spec.processor(), wrapped.processor()));
    }
}
