//! Heartbeat-based liveness recovery for stuck jobs.
//!
//! A job whose owning process died, or whose completion signal was lost,
//! would otherwise block its dependents forever. The [`HeartbeatMonitor`]
//! polls the liveness store at a fixed interval; once no liveness update has
//! been observed within the configured bound, it forcibly marks the queue
//! entry completed with a caller-supplied fallback value.
//!
//! This is a safety valve, not the primary completion path: the forced
//! completion races the real one, and whichever settles second observes
//! benign lock contention.
//!
//! The monitor runs as an explicit task whose lifetime is bound to the
//! owning execution: dropping the [`HeartbeatGuard`] aborts the loop, so
//! process shutdown terminates it deterministically.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::context::JobContext;
use crate::error::{Error, Result};
use crate::metrics;

/// Polls a job's liveness timestamp and forces completion when it goes
/// stale.
///
/// Intervals come from the environment's
/// [`FlowConfig`](crate::env::FlowConfig): `liveness_poll_interval` between
/// polls (default one minute) and `liveness_timeout` as the staleness bound
/// (default ten minutes).
pub struct HeartbeatMonitor {
    ctx: Arc<JobContext>,
    fallback: Value,
}

impl HeartbeatMonitor {
    /// Creates a monitor for `ctx` that completes with `fallback` on expiry.
    #[must_use]
    pub const fn new(ctx: Arc<JobContext>, fallback: Value) -> Self {
        Self { ctx, fallback }
    }

    /// Runs the liveness loop to completion.
    ///
    /// Resolves with the fallback value once the job's liveness timestamp
    /// has gone stale and the queue entry has been forcibly completed. A job
    /// that keeps signalling liveness keeps this future pending.
    ///
    /// # Errors
    ///
    /// Returns lock contention if the execution holds no queue lease (or
    /// lost it to a redelivery), and propagates liveness store failures.
    pub async fn run(self) -> Result<Value> {
        let ctx = &self.ctx;
        let lease = *ctx.lease().ok_or_else(|| Error::LockContention {
            message: format!("heartbeat monitor for '{}' requires a queue lease", ctx.job_id()),
        })?;

        let config = ctx.env().config();
        let started = Utc::now();
        let mut ticker = tokio::time::interval(config.liveness_poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let last = ctx
                .env()
                .liveness()
                .last_alive(ctx.env().project(), ctx.job_id())
                .await?
                .unwrap_or(started);

            let idle_ms = Utc::now()
                .signed_duration_since(last)
                .num_milliseconds()
                .max(0);
            if u128::try_from(idle_ms).unwrap_or(0) >= config.liveness_timeout.as_millis() {
                break;
            }
        }

        tracing::info!(
            job_id = %ctx.job_id(),
            "job liveness expired; marking queue entry completed with fallback value"
        );
        metrics::record_heartbeat_expiration(ctx.spec().name());
        ctx.env()
            .queue()
            .mark_completed(ctx.job_id(), self.fallback.clone(), &lease)
            .await?;
        Ok(self.fallback)
    }

    /// Spawns the liveness loop as a background task.
    ///
    /// The returned guard aborts the loop when dropped, tying the monitor's
    /// lifetime to the owning execution. Errors inside the spawned loop are
    /// logged, not propagated.
    #[must_use]
    pub fn spawn(self) -> HeartbeatGuard {
        let job_id = self.ctx.job_id().clone();
        let handle = tokio::spawn(async move {
            if let Err(error) = self.run().await {
                if error.is_lock_contention() {
                    tracing::debug!(job_id = %job_id, error = %error, "heartbeat settlement contended");
                } else {
                    tracing::error!(job_id = %job_id, error = %error, "heartbeat monitor failed");
                }
            }
        });
        HeartbeatGuard { handle }
    }
}

/// Aborts the heartbeat loop when dropped.
#[derive(Debug)]
pub struct HeartbeatGuard {
    handle: JoinHandle<()>,
}

impl HeartbeatGuard {
    /// Aborts the monitor immediately.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Returns true if the monitor has finished (expired or aborted).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
