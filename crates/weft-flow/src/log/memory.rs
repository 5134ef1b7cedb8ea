//! In-memory job log implementation for testing.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No durability, no cross-process state
//! - **Single-process only**: Entries are not visible across processes

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use weft_core::{JobId, ProjectId, SpecName};

use super::{DependencyEdge, JobLogEntry, JobLogStore, JobLogUpdate, JobStatus, MergeStrategy};
use super::merge_values;
use crate::error::{Error, Result};

type LogKey = (ProjectId, SpecName, JobId);

/// In-memory job log for testing.
///
/// Thread-safe via `RwLock`.
///
/// ## Example
///
/// ```rust
/// use weft_flow::log::memory::InMemoryJobLog;
///
/// let log = InMemoryJobLog::new();
/// // Use log in tests...
/// ```
#[derive(Debug, Default)]
pub struct InMemoryJobLog {
    entries: RwLock<HashMap<LogKey, JobLogEntry>>,
    edges: RwLock<Vec<DependencyEdge>>,
}

/// Converts a lock poison error to a job log error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::JobLog {
        message: "job log lock poisoned".to_string(),
    }
}

impl InMemoryJobLog {
    /// Creates a new empty job log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn entry_count(&self) -> Result<usize> {
        let count = {
            let entries = self.entries.read().map_err(poison_err)?;
            entries.len()
        };
        Ok(count)
    }

    /// Returns the number of recorded dependency edges.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn edge_count(&self) -> Result<usize> {
        let count = {
            let edges = self.edges.read().map_err(poison_err)?;
            edges.len()
        };
        Ok(count)
    }
}

#[async_trait]
impl JobLogStore for InMemoryJobLog {
    async fn get(
        &self,
        project: &ProjectId,
        spec: &SpecName,
        job_id: &JobId,
        status: Option<JobStatus>,
    ) -> Result<Option<JobLogEntry>> {
        let entries = self.entries.read().map_err(poison_err)?;
        let key = (project.clone(), spec.clone(), job_id.clone());
        let entry = entries
            .get(&key)
            .filter(|entry| status.map_or(true, |wanted| entry.status == wanted))
            .cloned();
        Ok(entry)
    }

    async fn upsert(
        &self,
        project: &ProjectId,
        spec: &SpecName,
        job_id: &JobId,
        update: JobLogUpdate,
    ) -> Result<()> {
        let mut entries = self.entries.write().map_err(poison_err)?;
        let key = (project.clone(), spec.clone(), job_id.clone());
        let now = Utc::now();

        match entries.get_mut(&key) {
            Some(entry) => {
                if let Some(status) = update.status {
                    entry.status = status;
                }
                if let Some(data) = update.data {
                    match update.merge {
                        MergeStrategy::Merge => merge_values(&mut entry.data, data),
                        MergeStrategy::Replace => entry.data = data,
                    }
                }
                entry.updated_at = now;
            }
            None => {
                let status = update.status.ok_or_else(|| Error::JobLog {
                    message: format!("cannot create entry for '{job_id}' without a status"),
                })?;
                entries.insert(
                    key,
                    JobLogEntry {
                        project: project.clone(),
                        spec: spec.clone(),
                        job_id: job_id.clone(),
                        status,
                        data: update.data.unwrap_or_else(|| Value::Object(Default::default())),
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        Ok(())
    }

    async fn record_dependency(
        &self,
        project: &ProjectId,
        parent: &JobId,
        child: &JobId,
    ) -> Result<()> {
        let mut edges = self.edges.write().map_err(poison_err)?;
        let exists = edges
            .iter()
            .any(|e| &e.project == project && &e.parent == parent && &e.child == child);
        if !exists {
            edges.push(DependencyEdge {
                project: project.clone(),
                parent: parent.clone(),
                child: child.clone(),
                recorded_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn dependencies(
        &self,
        project: &ProjectId,
        parent: &JobId,
    ) -> Result<Vec<DependencyEdge>> {
        let edges = self.edges.read().map_err(poison_err)?;
        Ok(edges
            .iter()
            .filter(|e| &e.project == project && &e.parent == parent)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids() -> (ProjectId, SpecName, JobId) {
        (
            ProjectId::new("acme-media").unwrap(),
            SpecName::new("resize").unwrap(),
            JobId::new("j1").unwrap(),
        )
    }

    #[tokio::test]
    async fn upsert_creates_then_updates() {
        let log = InMemoryJobLog::new();
        let (project, spec, job) = ids();

        log.upsert(&project, &spec, &job, JobLogUpdate::status_only(JobStatus::Active))
            .await
            .unwrap();

        let entry = log.get(&project, &spec, &job, None).await.unwrap().unwrap();
        assert_eq!(entry.status, JobStatus::Active);
        assert_eq!(entry.data, json!({}));

        log.upsert(
            &project,
            &spec,
            &job,
            JobLogUpdate::finalize(JobStatus::Completed, json!({"r": 1})),
        )
        .await
        .unwrap();

        let entry = log.get(&project, &spec, &job, None).await.unwrap().unwrap();
        assert_eq!(entry.status, JobStatus::Completed);
        assert_eq!(entry.data, json!({"r": 1}));
    }

    #[tokio::test]
    async fn status_filter_excludes_mismatches() {
        let log = InMemoryJobLog::new();
        let (project, spec, job) = ids();

        log.upsert(&project, &spec, &job, JobLogUpdate::status_only(JobStatus::Active))
            .await
            .unwrap();

        let completed = log
            .get(&project, &spec, &job, Some(JobStatus::Completed))
            .await
            .unwrap();
        assert!(completed.is_none());

        let active = log
            .get(&project, &spec, &job, Some(JobStatus::Active))
            .await
            .unwrap();
        assert!(active.is_some());
    }

    #[tokio::test]
    async fn checkpoints_merge_disjoint_fields() {
        let log = InMemoryJobLog::new();
        let (project, spec, job) = ids();

        log.upsert(&project, &spec, &job, JobLogUpdate::status_only(JobStatus::Active))
            .await
            .unwrap();
        log.upsert(&project, &spec, &job, JobLogUpdate::merge_data(json!({"a": 1})))
            .await
            .unwrap();
        log.upsert(&project, &spec, &job, JobLogUpdate::merge_data(json!({"b": 2})))
            .await
            .unwrap();

        let entry = log.get(&project, &spec, &job, None).await.unwrap().unwrap();
        assert_eq!(entry.data, json!({"a": 1, "b": 2}));
        assert_eq!(entry.status, JobStatus::Active);
    }

    #[tokio::test]
    async fn data_only_upsert_on_missing_entry_fails() {
        let log = InMemoryJobLog::new();
        let (project, spec, job) = ids();

        let err = log
            .upsert(&project, &spec, &job, JobLogUpdate::merge_data(json!({"a": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::JobLog { .. }));
    }

    #[tokio::test]
    async fn dependency_edges_are_idempotent() {
        let log = InMemoryJobLog::new();
        let (project, _, parent) = ids();
        let child = parent.child("fetch").unwrap();

        log.record_dependency(&project, &parent, &child).await.unwrap();
        log.record_dependency(&project, &parent, &child).await.unwrap();

        let edges = log.dependencies(&project, &parent).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].child, child);
    }
}
