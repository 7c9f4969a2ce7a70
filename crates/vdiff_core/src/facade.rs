//! Client action surface: argument validation, dispatch and the JSON output
//! shape shared by the CLI and RPC entry points.
//!
//! Diagnostics here are load-bearing: clients match on the `Usage:` banner
//! and the `invalid UUID provided` / `invalid argument provided` /
//! `already exists` fragments.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::controller::{self, DeleteTarget, ShowTarget};
use crate::error::VdiffError;
use crate::report::RunReport;
use crate::store::RunState;
use crate::{Engine, VdiffOptions};

pub const USAGE: &str = "Usage: VDiff <keyspace>.<workflow> \
                         <create|resume|stop|show|delete> [<uuid>|last|all] \
                         [--verbose] [--wait] [--wait-update-interval=<duration>]";

/// One client invocation.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub action: String,
    pub arg: Option<String>,
    pub verbose: bool,
    pub wait: bool,
    pub wait_update_interval: Duration,
    pub options: VdiffOptions,
}

impl Default for ActionRequest {
    fn default() -> Self {
        ActionRequest {
            action: String::new(),
            arg: None,
            verbose: false,
            wait: false,
            wait_update_interval: Duration::from_secs(1),
            options: VdiffOptions::default(),
        }
    }
}

/// Validate and execute one action, returning the JSON the client prints.
pub async fn perform_action(
    engine: &Arc<Engine>,
    req: ActionRequest,
) -> Result<String, VdiffError> {
    match req.action.as_str() {
        "create" => {
            let uuid =
                controller::create(engine, req.arg.as_deref(), req.options.clone()).await?;
            if req.wait {
                wait_until_done(engine, &uuid, req.verbose, req.wait_update_interval).await
            } else {
                render_run(engine, &uuid, req.verbose).await
            }
        }
        "resume" => {
            let uuid = require_uuid_arg(req.arg.as_deref())?;
            controller::resume(engine, &uuid).await?;
            render_run(engine, &uuid, req.verbose).await
        }
        "stop" => {
            let uuid = require_uuid_arg(req.arg.as_deref())?;
            controller::stop(engine, &uuid).await?;
            render_run(engine, &uuid, req.verbose).await
        }
        "show" => {
            let target = parse_show_target(req.arg.as_deref())?;
            let all = matches!(target, ShowTarget::All);
            let reports = controller::show(engine, target, req.verbose).await?;
            if all {
                Ok(to_json(&reports)?)
            } else {
                Ok(to_json(&reports[0])?)
            }
        }
        "delete" => {
            let target = parse_delete_target(req.arg.as_deref())?;
            let report = controller::delete(engine, target).await?;
            Ok(to_json(&report)?)
        }
        _ => Err(VdiffError::InvalidArgument(format!(
            "unknown action {:?}\n{USAGE}",
            req.action
        ))),
    }
}

/// Stream intermediate run records until the derived state is terminal. The
/// output is a concatenation of JSON objects, one per interval, not a single
/// document.
async fn wait_until_done(
    engine: &Arc<Engine>,
    uuid: &str,
    verbose: bool,
    interval: Duration,
) -> Result<String, VdiffError> {
    let mut output = String::new();
    loop {
        tokio::time::sleep(interval).await;
        let reports =
            controller::show(engine, ShowTarget::Uuid(uuid.to_string()), verbose).await?;
        let report = &reports[0];
        output.push_str(&to_json(report)?);
        output.push('\n');
        if matches!(report.state, RunState::Completed | RunState::Error) {
            return Ok(output);
        }
    }
}

async fn render_run(
    engine: &Arc<Engine>,
    uuid: &str,
    verbose: bool,
) -> Result<String, VdiffError> {
    let reports = controller::show(engine, ShowTarget::Uuid(uuid.to_string()), verbose).await?;
    to_json::<RunReport>(&reports[0]).map_err(Into::into)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}

fn require_uuid_arg(arg: Option<&str>) -> Result<String, VdiffError> {
    let raw = arg.ok_or_else(|| VdiffError::InvalidUuid("none".into()))?;
    Uuid::parse_str(raw)
        .map(|u| u.to_string())
        .map_err(|_| VdiffError::InvalidUuid(raw.to_string()))
}

fn parse_show_target(arg: Option<&str>) -> Result<ShowTarget, VdiffError> {
    match arg {
        Some("last") => Ok(ShowTarget::Last),
        Some("all") => Ok(ShowTarget::All),
        Some(raw) => Uuid::parse_str(raw)
            .map(|u| ShowTarget::Uuid(u.to_string()))
            .map_err(|_| VdiffError::InvalidArgument(raw.to_string())),
        None => Ok(ShowTarget::All),
    }
}

fn parse_delete_target(arg: Option<&str>) -> Result<DeleteTarget, VdiffError> {
    match arg {
        Some("all") => Ok(DeleteTarget::All),
        Some(raw) => Uuid::parse_str(raw)
            .map(|u| DeleteTarget::Uuid(u.to_string()))
            .map_err(|_| VdiffError::InvalidArgument(raw.to_string())),
        None => Err(VdiffError::InvalidArgument("delete needs <uuid>|all".into())),
    }
}
