//! Typed path helpers for persisted job artifacts.
//!
//! All job-scoped artifacts live under a project-rooted layout:
//!
//! ```text
//! {project}/jobs/{job_id}/large-values/{field_path}   externalized values
//! {project}/jobs/{job_id}/scratch/{relative}          synced scratch files
//! ```
//!
//! Local scratch directories mirror the same identity with the job id's `/`
//! separators flattened to `_`, so a derived child id never escapes its
//! parent's directory tree.

use std::path::PathBuf;

use crate::id::{JobId, ProjectId};

/// Typed storage and scratch paths for jobs in one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    project: ProjectId,
    scratch_root: PathBuf,
}

impl JobPaths {
    /// Creates typed paths for `project`, with scratch directories under the
    /// system temp directory.
    #[must_use]
    pub fn new(project: ProjectId) -> Self {
        let scratch_root = std::env::temp_dir().join("weft");
        Self {
            project,
            scratch_root,
        }
    }

    /// Creates typed paths with an explicit scratch root.
    #[must_use]
    pub fn with_scratch_root(project: ProjectId, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            project,
            scratch_root: scratch_root.into(),
        }
    }

    /// Returns the project these paths are rooted at.
    #[must_use]
    pub const fn project(&self) -> &ProjectId {
        &self.project
    }

    /// Returns the storage key for an externalized value field.
    #[must_use]
    pub fn large_value(&self, job_id: &JobId, field_path: &str) -> String {
        format!("{}/{field_path}", self.large_value_prefix(job_id))
    }

    /// Returns the storage key prefix for a job's externalized values.
    #[must_use]
    pub fn large_value_prefix(&self, job_id: &JobId) -> String {
        format!("{}/jobs/{}/large-values", self.project, job_id)
    }

    /// Returns the storage key for a synced scratch file.
    #[must_use]
    pub fn scratch_blob(&self, job_id: &JobId, relative: &str) -> String {
        format!("{}/jobs/{}/scratch/{relative}", self.project, job_id)
    }

    /// Returns the local scratch directory for a job.
    ///
    /// The job id's `/` separators are flattened to `_` so the directory name
    /// is a single path component.
    #[must_use]
    pub fn scratch_dir(&self, job_id: &JobId) -> PathBuf {
        let flat = job_id.as_str().replace('/', "_");
        self.scratch_root.join(self.project.as_str()).join(flat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> JobPaths {
        JobPaths::with_scratch_root(ProjectId::new("acme-media").unwrap(), "/tmp/weft-test")
    }

    #[test]
    fn large_value_layout() {
        let job = JobId::new("j1").unwrap();
        assert_eq!(
            paths().large_value(&job, "a/b"),
            "acme-media/jobs/j1/large-values/a/b"
        );
    }

    #[test]
    fn scratch_blob_layout() {
        let job = JobId::new("j1").unwrap();
        assert_eq!(
            paths().scratch_blob(&job, "out.txt"),
            "acme-media/jobs/j1/scratch/out.txt"
        );
    }

    #[test]
    fn scratch_dir_flattens_child_ids() {
        let job = JobId::new("j1").unwrap().child("fetch").unwrap();
        let dir = paths().scratch_dir(&job);
        assert!(dir.ends_with("acme-media/j1_fetch"));
    }
}
