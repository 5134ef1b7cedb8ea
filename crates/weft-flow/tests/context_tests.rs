//! Execution-context lifecycle tests: idempotent resume, merge
//! checkpointing, large-value externalization, and failure classification.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use weft_core::{JobId, MemoryBackend, ProjectId, SpecName, StorageBackend};
use weft_flow::context::{ExecutionOutcome, JobContext};
use weft_flow::env::{FlowConfig, FlowEnv};
use weft_flow::error::Error;
use weft_flow::externalize::OBJ_REF_SENTINEL;
use weft_flow::log::liveness::InMemoryLiveness;
use weft_flow::log::memory::InMemoryJobLog;
use weft_flow::log::{JobLogUpdate, JobStatus};
use weft_flow::queue::QueuedJob;
use weft_flow::queue::memory::InMemoryJobQueue;
use weft_flow::schema::PayloadSchema;
use weft_flow::spec::{JobSpec, ProcessorOutcome};
use weft_flow::stream::memory::InMemoryTransport;

fn project() -> ProjectId {
    ProjectId::new("acme-media").unwrap()
}

/// A resize-like spec whose processor counts its invocations.
fn counting_spec(invocations: Arc<AtomicUsize>) -> Arc<JobSpec> {
    JobSpec::builder(SpecName::new("resize").unwrap())
        .params(PayloadSchema::object([("width", PayloadSchema::Integer)]))
        .processor_fn(move |ctx| {
            let invocations = Arc::clone(&invocations);
            async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                let mut output = ctx.params().clone();
                output["result"] = json!("resized");
                Ok(ProcessorOutcome::Complete(output))
            }
        })
        .build()
        .unwrap()
}

fn queued(job_id: &str, spec: &JobSpec, params: serde_json::Value) -> QueuedJob {
    QueuedJob::new(JobId::new(job_id).unwrap(), spec.name().clone(), params)
}

/// First execution runs the processor and persists `completed`; redelivery
/// of the identical job id returns the cached data with zero processor
/// invocations and no new log mutation.
#[tokio::test]
async fn begin_processing_is_idempotent_under_redelivery() {
    let env = FlowEnv::in_memory(project());
    let invocations = Arc::new(AtomicUsize::new(0));
    let spec = counting_spec(Arc::clone(&invocations));
    let job = queued("j1", &spec, json!({"width": 10}));

    let ctx = JobContext::new(Arc::clone(&env), Arc::clone(&spec), job.clone(), None);
    let first = ctx.begin_processing().await.unwrap();
    assert_eq!(
        first,
        ExecutionOutcome::Completed(json!({"width": 10, "result": "resized"}))
    );
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    let job_id = JobId::new("j1").unwrap();
    let entry = env
        .job_log()
        .get(env.project(), spec.name(), &job_id, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, JobStatus::Completed);
    let updated_at = entry.updated_at;

    // Redelivery: a fresh context for the same id short-circuits.
    let ctx = JobContext::new(Arc::clone(&env), Arc::clone(&spec), job, None);
    let second = ctx.begin_processing().await.unwrap();
    assert_eq!(second, first);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    let entry = env
        .job_log()
        .get(env.project(), spec.name(), &job_id, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.updated_at, updated_at);
}

/// Checkpoints with disjoint field paths union into the log entry's data.
#[tokio::test]
async fn update_merges_disjoint_checkpoints() {
    let env = FlowEnv::in_memory(project());
    let spec = counting_spec(Arc::new(AtomicUsize::new(0)));
    let job = queued("j1", &spec, json!({"width": 10}));
    let ctx = JobContext::new(Arc::clone(&env), Arc::clone(&spec), job, None);

    env.job_log()
        .upsert(
            env.project(),
            spec.name(),
            ctx.job_id(),
            JobLogUpdate::status_only(JobStatus::Active),
        )
        .await
        .unwrap();

    ctx.update(json!({"stage": "download", "bytes": 100})).await.unwrap();
    ctx.update(json!({"frames": 24})).await.unwrap();
    ctx.update(json!({"stage": "encode"})).await.unwrap();

    let entry = env
        .job_log()
        .get(env.project(), spec.name(), ctx.job_id(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        entry.data,
        json!({"stage": "encode", "bytes": 100, "frames": 24})
    );
    assert_eq!(entry.status, JobStatus::Active);
}

/// Completion replaces accumulated checkpoint data with the final output.
#[tokio::test]
async fn completion_replaces_checkpoint_data() {
    let env = FlowEnv::in_memory(project());
    let spec = JobSpec::builder(SpecName::new("encode").unwrap())
        .processor_fn(|ctx| async move {
            ctx.update(json!({"progress": 50})).await?;
            Ok(ProcessorOutcome::Complete(json!({"encoded": true})))
        })
        .build()
        .unwrap();

    let ctx = JobContext::new(
        Arc::clone(&env),
        Arc::clone(&spec),
        queued("j1", &spec, json!({})),
        None,
    );
    ctx.begin_processing().await.unwrap();

    let entry = env
        .job_log()
        .get(env.project(), spec.name(), ctx.job_id(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.data, json!({"encoded": true}));
}

fn env_with_storage(threshold: usize) -> (Arc<FlowEnv>, Arc<MemoryBackend>) {
    let storage = Arc::new(MemoryBackend::with_public_base_url("https://cdn.example.com"));
    let scratch = tempfile::tempdir().unwrap();
    let env = FlowEnv::builder(project())
        .config(FlowConfig {
            large_value_threshold: threshold,
            ..FlowConfig::default()
        })
        .scratch_root(scratch.into_path())
        .job_log(Arc::new(InMemoryJobLog::new()))
        .queue(Arc::new(InMemoryJobQueue::new()))
        .transport(Arc::new(InMemoryTransport::new()))
        .liveness(Arc::new(InMemoryLiveness::new()))
        .storage(Arc::clone(&storage) as Arc<dyn StorageBackend>)
        .build()
        .unwrap();
    (Arc::new(env), storage)
}

/// Oversized checkpoint fields are externalized to storage, leaving a
/// sentinel in the persisted residual.
#[tokio::test]
async fn update_externalizes_oversized_fields() {
    let (env, storage) = env_with_storage(10_000);
    let spec = counting_spec(Arc::new(AtomicUsize::new(0)));
    let ctx = JobContext::new(
        Arc::clone(&env),
        Arc::clone(&spec),
        queued("j1", &spec, json!({"width": 10})),
        None,
    );

    env.job_log()
        .upsert(
            env.project(),
            spec.name(),
            ctx.job_id(),
            JobLogUpdate::status_only(JobStatus::Active),
        )
        .await
        .unwrap();

    let big = "x".repeat(20_000);
    ctx.update(json!({"a": big, "b": 5})).await.unwrap();

    let entry = env
        .job_log()
        .get(env.project(), spec.name(), ctx.job_id(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.data, json!({"a": OBJ_REF_SENTINEL, "b": 5}));

    let blob = storage
        .get("acme-media/jobs/j1/large-values/a")
        .await
        .unwrap();
    assert_eq!(blob.len(), 20_000);
}

/// Externalized values materialize lazily into the scratch directory and
/// are cached for the rest of the execution.
#[tokio::test]
async fn ensure_local_file_fetches_and_caches() {
    let (env, _storage) = env_with_storage(16);
    let spec = counting_spec(Arc::new(AtomicUsize::new(0)));
    let ctx = JobContext::new(
        Arc::clone(&env),
        Arc::clone(&spec),
        queued("j1", &spec, json!({"width": 10})),
        None,
    );

    env.job_log()
        .upsert(
            env.project(),
            spec.name(),
            ctx.job_id(),
            JobLogUpdate::status_only(JobStatus::Active),
        )
        .await
        .unwrap();
    ctx.update(json!({"transcript": "y".repeat(64)})).await.unwrap();

    let path = ctx.ensure_local_file("transcript").await.unwrap();
    assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "y".repeat(64));

    let cached = ctx.ensure_local_file("transcript").await.unwrap();
    assert_eq!(cached, path);
}

/// Public URLs resolve through the storage backend's public surface.
#[tokio::test]
async fn large_value_public_url_resolves() {
    let (env, _storage) = env_with_storage(16);
    let spec = counting_spec(Arc::new(AtomicUsize::new(0)));
    let ctx = JobContext::new(
        Arc::clone(&env),
        Arc::clone(&spec),
        queued("j1", &spec, json!({"width": 10})),
        None,
    );

    assert_eq!(
        ctx.large_value_public_url("transcript").unwrap(),
        "https://cdn.example.com/acme-media/jobs/j1/large-values/transcript"
    );
}

/// Without a storage backend, checkpoint values stay inline and
/// externalized-value access fails loudly.
#[tokio::test]
async fn no_storage_backend_keeps_values_inline() {
    let env = FlowEnv::in_memory(project());
    let spec = counting_spec(Arc::new(AtomicUsize::new(0)));
    let ctx = JobContext::new(
        Arc::clone(&env),
        Arc::clone(&spec),
        queued("j1", &spec, json!({"width": 10})),
        None,
    );

    env.job_log()
        .upsert(
            env.project(),
            spec.name(),
            ctx.job_id(),
            JobLogUpdate::status_only(JobStatus::Active),
        )
        .await
        .unwrap();

    let big = "x".repeat(20_000);
    ctx.update(json!({"a": big.clone()})).await.unwrap();

    let entry = env
        .job_log()
        .get(env.project(), spec.name(), ctx.job_id(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.data, json!({"a": big}));

    assert!(matches!(
        ctx.ensure_local_file("a").await.unwrap_err(),
        Error::Storage { .. }
    ));
    assert!(ctx.large_value_public_url("a").is_err());
}

/// A processor failure persists `failed` and re-raises the error.
#[tokio::test]
async fn processor_failure_marks_failed() {
    let env = FlowEnv::in_memory(project());
    let spec = JobSpec::builder(SpecName::new("encode").unwrap())
        .processor_fn(|ctx| async move {
            Err(Error::processor(ctx.job_id().clone(), "codec exploded"))
        })
        .build()
        .unwrap();

    let ctx = JobContext::new(
        Arc::clone(&env),
        Arc::clone(&spec),
        queued("j1", &spec, json!({})),
        None,
    );
    let err = ctx.begin_processing().await.unwrap_err();
    assert!(err.to_string().contains("codec exploded"));

    let entry = env
        .job_log()
        .get(env.project(), spec.name(), ctx.job_id(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, JobStatus::Failed);
}

/// Output that violates the declared schema fails the execution.
#[tokio::test]
async fn invalid_output_is_a_schema_violation() {
    let env = FlowEnv::in_memory(project());
    let spec = JobSpec::builder(SpecName::new("encode").unwrap())
        .output(PayloadSchema::object([("encoded", PayloadSchema::Bool)]))
        .processor_fn(|_ctx| async move {
            Ok(ProcessorOutcome::Complete(json!({"encoded": "yes"})))
        })
        .build()
        .unwrap();

    let ctx = JobContext::new(
        Arc::clone(&env),
        Arc::clone(&spec),
        queued("j1", &spec, json!({})),
        None,
    );
    let err = ctx.begin_processing().await.unwrap_err();
    assert!(matches!(err, Error::SchemaViolation { .. }));

    let entry = env
        .job_log()
        .get(env.project(), spec.name(), ctx.job_id(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, JobStatus::Failed);
}

/// Suspension on children is an outcome, not an error, and persists
/// `waiting_children`.
#[tokio::test]
async fn await_children_is_not_a_failure() {
    let env = FlowEnv::in_memory(project());
    let spec = JobSpec::builder(SpecName::new("gather").unwrap())
        .processor_fn(|_ctx| async move { Ok(ProcessorOutcome::AwaitChildren) })
        .build()
        .unwrap();

    let ctx = JobContext::new(
        Arc::clone(&env),
        Arc::clone(&spec),
        queued("j1", &spec, json!({})),
        None,
    );
    let outcome = ctx.begin_processing().await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::WaitingChildren);

    let entry = env
        .job_log()
        .get(env.project(), spec.name(), ctx.job_id(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, JobStatus::WaitingChildren);
}

/// A declared parent produces a dependency edge when the child runs.
#[tokio::test]
async fn parent_edge_is_recorded_on_execution() {
    let env = FlowEnv::in_memory(project());
    let spec = counting_spec(Arc::new(AtomicUsize::new(0)));

    let parent_id = JobId::new("p1").unwrap();
    let mut job = queued("p1/fetch", &spec, json!({"width": 1}));
    job.parent_id = Some(parent_id.clone());

    let ctx = JobContext::new(Arc::clone(&env), Arc::clone(&spec), job, None);
    ctx.begin_processing().await.unwrap();

    let edges = env
        .job_log()
        .dependencies(env.project(), &parent_id)
        .await
        .unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].child.as_str(), "p1/fetch");
}

/// Scratch files round-trip through the working directory and sync to
/// storage under the job's scratch prefix.
#[tokio::test]
async fn scratch_files_write_and_sync() {
    let (env, storage) = env_with_storage(10_000);
    let spec = counting_spec(Arc::new(AtomicUsize::new(0)));
    let ctx = JobContext::new(
        Arc::clone(&env),
        Arc::clone(&spec),
        queued("j1", &spec, json!({"width": 10})),
        None,
    );

    let path = ctx.save_to_text_file("out/result.txt", "42").await.unwrap();
    assert!(path.ends_with("out/result.txt"));

    let uploaded = ctx.sync_scratch_dir().await.unwrap();
    assert_eq!(uploaded, 1);

    let blob = storage
        .get("acme-media/jobs/j1/scratch/out/result.txt")
        .await
        .unwrap();
    assert_eq!(&blob[..], b"42");
}
