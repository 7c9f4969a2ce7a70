//! Client-facing lifecycle actions: stop, delete, the workflow-completion
//! sweep, create-and-wait, and the stable CLI diagnostics.

mod common;

use std::time::Duration;

use common::*;

use vdiff_core::controller::{self, DeleteTarget, ShowTarget};
use vdiff_core::facade::{self, ActionRequest};
use vdiff_core::EngineConfig;

fn action(action: &str, arg: Option<&str>) -> ActionRequest {
    ActionRequest {
        action: action.into(),
        arg: arg.map(String::from),
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_reports_stopped_with_no_errors_field() {
    let tc = start_cluster(unsharded_to_two_shards(), paced_config());
    seed_customers(&tc, 1, 80);

    let uuid = controller::create(&tc.engine, None, tiny_packet_options())
        .await
        .expect("create");
    controller::stop(&tc.engine, &uuid).await.expect("stop");

    let output = facade::perform_action(&tc.engine, action("show", Some(uuid.as_str())))
        .await
        .expect("show");
    assert!(output.contains("\"State\": \"stopped\""));
    // The cancellation artifact must not masquerade as a failure.
    assert!(!output.contains("\"Errors\":"));

    // Stop is idempotent.
    controller::stop(&tc.engine, &uuid).await.expect("stop again");

    // A stopped run resumes from its checkpoint and still reaches the full
    // row count, never more.
    controller::resume(&tc.engine, &uuid).await.expect("resume");
    let report = wait_for_completion(&tc, &uuid).await;
    assert_eq!(report.rows_compared, 80);
    assert!(!report.has_mismatch);
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_one_then_all() {
    let tc = start_cluster(unsharded_to_two_shards(), EngineConfig::default());
    seed_customers(&tc, 1, 5);

    while distinct_uuid_count(&tc).await < 3 {
        let uuid = controller::create(&tc.engine, None, Default::default())
            .await
            .expect("create");
        wait_for_completion(&tc, &uuid).await;
    }
    let initial = distinct_uuid_count(&tc).await;
    assert!(initial >= 3);

    let last = controller::show(&tc.engine, ShowTarget::Last, true)
        .await
        .expect("show last")
        .remove(0);
    assert!(last.table_summary.is_some());

    let report = controller::delete(&tc.engine, DeleteTarget::Uuid(last.uuid.clone()))
        .await
        .expect("delete");
    assert_eq!(report.status, "completed");
    assert_eq!(distinct_uuid_count(&tc).await, initial - 1);

    // The deleted UUID is gone from `show all` entirely.
    let remaining = controller::show(&tc.engine, ShowTarget::All, false)
        .await
        .expect("show all");
    assert!(remaining.iter().all(|r| r.uuid != last.uuid));

    let report = controller::delete(&tc.engine, DeleteTarget::All)
        .await
        .expect("delete all");
    assert_eq!(report.status, "completed");
    assert_eq!(distinct_uuid_count(&tc).await, 0);

    // Deleting an empty scope still reports completed.
    let report = controller::delete(&tc.engine, DeleteTarget::All)
        .await
        .expect("delete empty");
    assert_eq!(report.status, "completed");
}

#[tokio::test(flavor = "multi_thread")]
async fn workflow_completion_sweeps_every_sidecar_row() {
    let tc = start_cluster(unsharded_to_two_shards(), EngineConfig::default());
    seed_customers(&tc, 1, 10);

    for _ in 0..2 {
        let uuid = controller::create(&tc.engine, None, Default::default())
            .await
            .expect("create");
        wait_for_completion(&tc, &uuid).await;
    }

    controller::purge_workflow(&tc.engine).await.expect("purge");

    for shard in ["-80", "80-"] {
        let sidecar = tc.engine.sidecar(shard);
        for table in ["vdiff", "vdiff_table", "vdiff_log"] {
            assert_eq!(
                sidecar
                    .count(&format!("SELECT COUNT(*) FROM {table}"))
                    .unwrap(),
                0,
                "{table} on {shard}"
            );
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn create_with_wait_streams_until_completed() {
    let tc = start_cluster(unsharded_to_two_shards(), EngineConfig::default());
    seed_customers(&tc, 1, 10);

    let request = ActionRequest {
        action: "create".into(),
        wait: true,
        wait_update_interval: Duration::from_millis(50),
        options: tiny_packet_options(),
        ..Default::default()
    };
    let output = facade::perform_action(&tc.engine, request)
        .await
        .expect("create --wait");
    // The output is a concatenation of JSON objects, not one document; at
    // least one record reports completion.
    assert!(output.contains("\"State\": \"completed\""));
}

#[tokio::test(flavor = "multi_thread")]
async fn cli_error_handling() {
    let tc = start_cluster(unsharded_to_two_shards(), EngineConfig::default());
    seed_customers(&tc, 1, 3);

    let err = facade::perform_action(&tc.engine, action("badcmd", None))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Usage:"));

    let err = facade::perform_action(&tc.engine, action("create", Some("invalid_uuid")))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid UUID provided"));

    let err = facade::perform_action(&tc.engine, action("resume", Some("invalid_uuid")))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid UUID provided"));

    let err = facade::perform_action(&tc.engine, action("delete", Some("invalid_uuid")))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid argument provided"));

    let err = facade::perform_action(&tc.engine, action("show", Some("invalid_uuid")))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid argument provided"));

    // A create that names an existing UUID is rejected.
    let uuid = controller::create(&tc.engine, None, Default::default())
        .await
        .expect("create");
    wait_for_completion(&tc, &uuid).await;
    let err = facade::perform_action(&tc.engine, action("create", Some(uuid.as_str())))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already exists"));
}
