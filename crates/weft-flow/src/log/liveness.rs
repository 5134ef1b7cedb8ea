//! Liveness key-value store for heartbeat-based recovery.
//!
//! The execution environment updates a per-job liveness timestamp
//! out-of-band while a job is making progress. The heartbeat monitor
//! (see [`crate::heartbeat`]) polls this store and forces completion of
//! jobs whose timestamps go stale.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use weft_core::{JobId, ProjectId};

use crate::error::{Error, Result};

/// Read access to per-job liveness timestamps.
///
/// Production implementations back onto the shared key-value transport; the
/// in-memory implementation supports tests.
#[async_trait]
pub trait LivenessStore: Send + Sync {
    /// Returns the last time `job_id` signalled liveness, if ever.
    async fn last_alive(
        &self,
        project: &ProjectId,
        job_id: &JobId,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Records a liveness signal for `job_id` at `at`.
    async fn touch(&self, project: &ProjectId, job_id: &JobId, at: DateTime<Utc>) -> Result<()>;
}

/// In-memory liveness store for testing.
#[derive(Debug, Default)]
pub struct InMemoryLiveness {
    timestamps: RwLock<HashMap<(ProjectId, JobId), DateTime<Utc>>>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::JobLog {
        message: "liveness lock poisoned".to_string(),
    }
}

impl InMemoryLiveness {
    /// Creates a new empty liveness store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LivenessStore for InMemoryLiveness {
    async fn last_alive(
        &self,
        project: &ProjectId,
        job_id: &JobId,
    ) -> Result<Option<DateTime<Utc>>> {
        let timestamps = self.timestamps.read().map_err(poison_err)?;
        Ok(timestamps.get(&(project.clone(), job_id.clone())).copied())
    }

    async fn touch(&self, project: &ProjectId, job_id: &JobId, at: DateTime<Utc>) -> Result<()> {
        let mut timestamps = self.timestamps.write().map_err(poison_err)?;
        timestamps.insert((project.clone(), job_id.clone()), at);
        Ok(())
    }
}
