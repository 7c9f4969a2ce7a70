//! Shared helpers for the vdiff integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use vdiff_core::controller::{self, ShowTarget};
use vdiff_core::local::LocalCluster;
use vdiff_core::report::RunReport;
use vdiff_core::{
    ColumnSpec, ColumnType, Engine, EngineConfig, RunState, TableSpec, VdiffOptions, WorkflowSpec,
};
use vdiff_eval::Value;

/// Timeout for a run to reach a terminal state.
pub const VDIFF_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TestCluster {
    pub cluster: LocalCluster,
    pub engine: Arc<Engine>,
    _dir: TempDir,
}

pub fn customer_table() -> TableSpec {
    TableSpec {
        name: "customer".into(),
        columns: vec![
            ColumnSpec {
                name: "cid".into(),
                col_type: ColumnType::Int64,
            },
            ColumnSpec {
                name: "name".into(),
                col_type: ColumnType::Text,
            },
            ColumnSpec {
                name: "typ".into(),
                col_type: ColumnType::Text,
            },
            // Enum-backed column: an empty enum value arrives as '' and must
            // stay distinct from NULL through the diff.
            ColumnSpec {
                name: "sport".into(),
                col_type: ColumnType::TextBinary,
            },
        ],
        pk: vec![0],
    }
}

/// MoveTables-shaped workflow: unsharded source into two target shards.
pub fn unsharded_to_two_shards() -> WorkflowSpec {
    WorkflowSpec {
        workflow: "p1c2".into(),
        source_keyspace: "product".into(),
        target_keyspace: "customer".into(),
        source_shards: vec!["0".into()],
        target_shards: vec!["-80".into(), "80-".into()],
        tables: vec![customer_table()],
    }
}

/// Reshard-shaped workflow: two source shards into three target shards.
pub fn two_shards_to_three() -> WorkflowSpec {
    WorkflowSpec {
        workflow: "c2c3".into(),
        source_keyspace: "customer".into(),
        target_keyspace: "customer2".into(),
        source_shards: vec!["-80".into(), "80-".into()],
        target_shards: vec!["-40".into(), "40-a0".into(), "a0-".into()],
        tables: vec![customer_table()],
    }
}

pub fn start_cluster(workflow: WorkflowSpec, config: EngineConfig) -> TestCluster {
    let dir = TempDir::new().expect("create temp dir");
    let cluster = LocalCluster::create(dir.path(), workflow, config).expect("create cluster");
    let engine = cluster.engine();
    TestCluster {
        cluster,
        engine,
        _dir: dir,
    }
}

/// Slow every packet down enough that stop lands before completion.
pub fn paced_config() -> EngineConfig {
    EngineConfig {
        packet_pause: Duration::from_millis(25),
        ..Default::default()
    }
}

/// Force one-row packets; diff state must never depend on packet size.
pub fn tiny_packet_options() -> VdiffOptions {
    VdiffOptions {
        packet_rows: 1,
        checkpoint_rows: 7,
        ..Default::default()
    }
}

pub fn customer_row(cid: i64, name: Option<&str>, typ: &str, sport: &str) -> Vec<Value> {
    vec![
        Value::Int64(cid),
        name.map(Value::text).unwrap_or(Value::Null),
        Value::text(typ),
        Value::Text(vdiff_eval::Collation::Binary, sport.to_string()),
    ]
}

/// Insert `count` well-formed customers starting at `start_cid`, replicated
/// to both sides of the workflow.
pub fn seed_customers(tc: &TestCluster, start_cid: i64, count: i64) {
    let table = customer_table();
    for cid in start_cid..start_cid + count {
        tc.cluster
            .insert_replicated(
                &table,
                &customer_row(cid, Some(&format!("customer-{cid}")), "soho", "football"),
            )
            .expect("insert row");
    }
}

pub async fn show_run(tc: &TestCluster, uuid: &str) -> RunReport {
    let reports = controller::show(&tc.engine, ShowTarget::Uuid(uuid.to_string()), true)
        .await
        .expect("show");
    reports.into_iter().next().expect("one report")
}

/// Poll until the run's derived state reaches `want`, or panic on timeout.
pub async fn wait_for_state(tc: &TestCluster, uuid: &str, want: RunState) -> RunReport {
    let deadline = Instant::now() + VDIFF_TIMEOUT;
    loop {
        let report = show_run(tc, uuid).await;
        if report.state == want {
            return report;
        }
        // An `error` state is not final here: the retry sweeper may still
        // pick the run back up, so only the deadline decides failure.
        if Instant::now() >= deadline {
            panic!("timeout waiting for vdiff {uuid} to reach {want}: {report:?}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

pub async fn wait_for_completion(tc: &TestCluster, uuid: &str) -> RunReport {
    wait_for_state(tc, uuid, RunState::Completed).await
}

/// Distinct UUID count in `show all`, the per-run view clients aggregate.
pub async fn distinct_uuid_count(tc: &TestCluster) -> usize {
    controller::show(&tc.engine, ShowTarget::All, false)
        .await
        .expect("show all")
        .len()
}
