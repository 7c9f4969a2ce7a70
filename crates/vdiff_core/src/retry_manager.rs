//! Background retry of ephemerally-failed shards.
//!
//! A run that hits a deadlock, a connection reset or a restarting tablet
//! lands in `error` with the failure text in `last_error`. This sweeper
//! periodically re-reads those rows and drives the retryable ones back to
//! `started`, resuming from the last checkpoint. Permanent failures stay put
//! until an operator resumes or deletes the run.

use std::sync::Arc;
use std::time::Duration;

use crate::controller::spawn_differ;
use crate::error::{is_ephemeral_error_text, VdiffError};
use crate::store::RunState;
use crate::Engine;

/// Configuration for the background retry sweeper.
#[derive(Clone, Copy, Debug)]
pub struct RetryManagerConfig {
    /// Scan for retryable failures at this interval.
    pub interval: Duration,
}

impl Default for RetryManagerConfig {
    fn default() -> Self {
        RetryManagerConfig {
            interval: Duration::from_secs(30),
        }
    }
}

/// Spawn the sweeper for one engine.
pub fn spawn(engine: Arc<Engine>, cfg: RetryManagerConfig) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cfg.interval);
        loop {
            ticker.tick().await;
            if let Err(err) = retry_once(&engine) {
                tracing::warn!(error = ?err, "vdiff retry sweep failed");
            }
        }
    });
}

/// One sweep: restart every errored (shard, run) whose stored failure is
/// retryable and which has no differ still attached.
pub fn retry_once(engine: &Arc<Engine>) -> Result<(), VdiffError> {
    let workflow = engine.workflow().workflow.clone();
    for shard in engine.target_shards() {
        for run in engine.sidecar(shard).runs_in_state(&workflow, RunState::Error)? {
            let Some(last_error) = run.last_error.as_deref() else {
                continue;
            };
            if !is_ephemeral_error_text(last_error) {
                continue;
            }
            if engine.differ_active(shard, &run.uuid) {
                continue;
            }
            tracing::info!(
                uuid = %run.uuid,
                shard = %shard,
                last_error,
                "retrying vdiff after ephemeral error"
            );
            engine.sidecar(shard).resume_reset(run.id)?;
            spawn_differ(engine, shard, &run)?;
        }
    }
    Ok(())
}
