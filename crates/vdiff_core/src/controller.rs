//! Workflow-level run lifecycle: create, resume, stop, show, delete, and the
//! purge that runs when the surrounding workflow completes.
//!
//! Every operation fans out over the target shards and mutates only that
//! shard's sidecar rows; there is no cross-shard transaction anywhere. The
//! run-level view callers see is recomputed from the per-shard rows on every
//! `show`, which is what lets shards fail, retry and resume independently.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use uuid::Uuid;

use crate::differ::{self, DifferContext};
use crate::error::VdiffError;
use crate::report::{DeleteReport, RunReport};
use crate::store::{RunRecord, RunState, TableRecord};
use crate::{Engine, VdiffOptions};

/// Scope argument of `show`.
#[derive(Debug, Clone)]
pub enum ShowTarget {
    Uuid(String),
    Last,
    All,
}

/// Scope argument of `delete`.
#[derive(Debug, Clone)]
pub enum DeleteTarget {
    Uuid(String),
    All,
}

async fn with_deadline<T>(
    engine: &Engine,
    what: &str,
    fut: impl Future<Output = Result<T, VdiffError>>,
) -> Result<T, VdiffError> {
    match tokio::time::timeout(engine.config().op_deadline, fut).await {
        Ok(out) => out,
        Err(_) => Err(VdiffError::DeadlineExceeded(what.to_string())),
    }
}

/// Start a new run across every target shard and return its UUID. A caller
/// may supply a UUID only to probe for duplicates; minting is the normal
/// path.
pub async fn create(
    engine: &Arc<Engine>,
    requested_uuid: Option<&str>,
    options: VdiffOptions,
) -> Result<String, VdiffError> {
    let uuid = match requested_uuid {
        Some(raw) => {
            let parsed = Uuid::parse_str(raw)
                .map_err(|_| VdiffError::InvalidUuid(raw.to_string()))?
                .to_string();
            for shard in engine.target_shards() {
                if engine.sidecar(shard).run_by_uuid(&parsed)?.is_some() {
                    return Err(VdiffError::AlreadyExists {
                        uuid: parsed,
                        shard: shard.clone(),
                    });
                }
            }
            parsed
        }
        None => Uuid::new_v4().to_string(),
    };

    let options_json = serde_json::to_string(&options)?;
    with_deadline(engine, "creating vdiff", async {
        for shard in engine.target_shards() {
            let id = engine
                .sidecar(shard)
                .create_run(&uuid, &engine.workflow().target_keyspace, &engine.workflow().workflow, &options_json)?;
            let run = engine
                .sidecar(shard)
                .run_by_uuid(&uuid)?
                .ok_or_else(|| VdiffError::NotFound(uuid.clone()))?;
            debug_assert_eq!(run.id, id);
            spawn_differ(engine, shard, &run)?;
        }
        tracing::info!(uuid = %uuid, workflow = %engine.workflow().workflow, "vdiff created");
        Ok(uuid.clone())
    })
    .await
}

/// Resume a stopped, failed or completed run from its checkpoints.
pub async fn resume(engine: &Arc<Engine>, raw_uuid: &str) -> Result<(), VdiffError> {
    let uuid = Uuid::parse_str(raw_uuid)
        .map_err(|_| VdiffError::InvalidUuid(raw_uuid.to_string()))?
        .to_string();

    with_deadline(engine, "resuming vdiff", async {
        let mut found = false;
        for shard in engine.target_shards() {
            let Some(run) = engine.sidecar(shard).run_by_uuid(&uuid)? else {
                continue;
            };
            found = true;
            match run.state {
                RunState::Stopped | RunState::Error | RunState::Completed => {}
                state => {
                    return Err(VdiffError::InvalidArgument(format!(
                        "vdiff {uuid} is {state} on shard {shard}, not resumable"
                    )));
                }
            }
            engine.sidecar(shard).resume_reset(run.id)?;
            spawn_differ(engine, shard, &run)?;
        }
        if !found {
            return Err(VdiffError::NotFound(uuid.clone()));
        }
        tracing::info!(uuid = %uuid, "vdiff resumed");
        Ok(())
    })
    .await
}

/// Cooperatively stop a run. Each shard's differ halts at its next
/// checkpoint boundary; whatever error a cancellation left behind is wiped
/// so `show` reports a clean `stopped`.
pub async fn stop(engine: &Arc<Engine>, raw_uuid: &str) -> Result<(), VdiffError> {
    let uuid = Uuid::parse_str(raw_uuid)
        .map_err(|_| VdiffError::InvalidUuid(raw_uuid.to_string()))?
        .to_string();

    with_deadline(engine, "stopping vdiff", async {
        cancel_differs(engine, &uuid).await;

        let mut found = false;
        for shard in engine.target_shards() {
            if let Some(run) = engine.sidecar(shard).run_by_uuid(&uuid)? {
                found = true;
                engine.sidecar(shard).stop_run(run.id)?;
            }
        }
        if !found {
            return Err(VdiffError::NotFound(uuid));
        }
        Ok(())
    })
    .await
}

/// Assemble run reports for a UUID, the latest run, or every known run.
pub async fn show(
    engine: &Arc<Engine>,
    target: ShowTarget,
    verbose: bool,
) -> Result<Vec<RunReport>, VdiffError> {
    with_deadline(engine, "assembling vdiff status", show_inner(engine, target, verbose)).await
}

async fn show_inner(
    engine: &Arc<Engine>,
    target: ShowTarget,
    verbose: bool,
) -> Result<Vec<RunReport>, VdiffError> {
    let uuids: Vec<String> = match &target {
        ShowTarget::Uuid(uuid) => vec![uuid.clone()],
        ShowTarget::Last => {
            let first_shard = engine
                .target_shards()
                .first()
                .ok_or_else(|| VdiffError::InvalidArgument("workflow has no target shards".into()))?;
            let run = engine
                .sidecar(first_shard)
                .latest_run(&engine.workflow().workflow)?
                .ok_or_else(|| VdiffError::NotFound("no vdiffs exist for this workflow".into()))?;
            vec![run.uuid]
        }
        ShowTarget::All => {
            // Creation order, first shard wins ties; every shard is scanned
            // so a partially-created run still shows up.
            let mut order: Vec<String> = Vec::new();
            for shard in engine.target_shards() {
                for run in engine.sidecar(shard).runs_for_workflow(&engine.workflow().workflow)? {
                    if !order.contains(&run.uuid) {
                        order.push(run.uuid);
                    }
                }
            }
            order
        }
    };

    let mut reports = Vec::with_capacity(uuids.len());
    for uuid in uuids {
        let mut per_shard: Vec<(String, RunRecord)> = Vec::new();
        let mut tables: Vec<(String, TableRecord)> = Vec::new();
        for shard in engine.target_shards() {
            let Some(run) = engine.sidecar(shard).run_by_uuid(&uuid)? else {
                continue;
            };
            for rec in engine.sidecar(shard).table_records(run.id)? {
                tables.push((shard.clone(), rec));
            }
            per_shard.push((shard.clone(), run));
        }
        if per_shard.is_empty() {
            return Err(VdiffError::NotFound(uuid));
        }
        reports.push(RunReport::assemble(&uuid, &per_shard, &tables, verbose));
    }
    Ok(reports)
}

/// Delete one run or every run of the workflow, across all shards and all
/// three sidecar tables. Succeeds on empty scopes.
pub async fn delete(
    engine: &Arc<Engine>,
    target: DeleteTarget,
) -> Result<DeleteReport, VdiffError> {
    with_deadline(engine, "deleting vdiffs", async {
        match target {
            DeleteTarget::Uuid(uuid) => {
                cancel_differs(engine, &uuid).await;
                for shard in engine.target_shards() {
                    engine.sidecar(shard).delete_run_by_uuid(&uuid)?;
                }
            }
            DeleteTarget::All => {
                cancel_all_differs(engine).await;
                for shard in engine.target_shards() {
                    engine
                        .sidecar(shard)
                        .delete_workflow(&engine.workflow().target_keyspace, &engine.workflow().workflow)?;
                }
            }
        }
        Ok(DeleteReport::completed())
    })
    .await
}

/// The sweep run when the surrounding workflow is completed: no `vdiff*`
/// row for the workflow survives on any shard.
pub async fn purge_workflow(engine: &Arc<Engine>) -> Result<(), VdiffError> {
    cancel_all_differs(engine).await;
    for shard in engine.target_shards() {
        engine
            .sidecar(shard)
            .delete_workflow(&engine.workflow().target_keyspace, &engine.workflow().workflow)?;
    }
    tracing::info!(workflow = %engine.workflow().workflow, "vdiff data purged for completed workflow");
    Ok(())
}

/// Pick runs left `pending`/`started` by a previous process back up. Called
/// once when an engine opens.
pub fn start(engine: &Arc<Engine>) -> Result<(), VdiffError> {
    for shard in engine.target_shards() {
        for run in engine.sidecar(shard).resumable_runs(&engine.workflow().workflow)? {
            tracing::info!(uuid = %run.uuid, shard = %shard, "resuming vdiff after restart");
            spawn_differ(engine, shard, &run)?;
        }
    }
    Ok(())
}

/// Launch a differ for one (shard, run) unless one is already active.
pub(crate) fn spawn_differ(
    engine: &Arc<Engine>,
    shard: &str,
    run: &RunRecord,
) -> Result<(), VdiffError> {
    let options: VdiffOptions = serde_json::from_str(&run.options_json)?;
    let workflow = engine.workflow();
    let ctx = DifferContext {
        shard: shard.to_string(),
        vdiff_id: run.id,
        uuid: run.uuid.clone(),
        source_keyspace: workflow.source_keyspace.clone(),
        target_keyspace: workflow.target_keyspace.clone(),
        source_shards: workflow.source_shards.clone(),
        tables: engine.run_tables(&options),
        target_range: engine.target_range(shard),
        sidecar: engine.sidecar(shard),
        data: engine.data(),
        options,
        packet_pause: engine.config().packet_pause,
    };
    engine.register_differ_if_idle(shard, &run.uuid, || differ::spawn(ctx));
    Ok(())
}

/// Signal and await the differs of one run.
async fn cancel_differs(engine: &Arc<Engine>, uuid: &str) {
    let mut joins = FuturesUnordered::new();
    for shard in engine.target_shards() {
        if let Some(handle) = engine.take_differ(shard, uuid) {
            handle.request_stop();
            joins.push(handle.join());
        }
    }
    while joins.next().await.is_some() {}
}

async fn cancel_all_differs(engine: &Arc<Engine>) {
    let mut uuids = BTreeSet::new();
    for shard in engine.target_shards() {
        if let Ok(runs) = engine.sidecar(shard).runs_for_workflow(&engine.workflow().workflow) {
            for run in runs {
                uuids.insert(run.uuid);
            }
        }
    }
    for uuid in uuids {
        cancel_differs(engine, &uuid).await;
    }
}
