//! Client-facing output shapes for `show`, `create --wait` and `delete`.
//!
//! Field names are part of the wire contract with existing tooling; they are
//! renamed to the historical capitalized form rather than following Rust
//! casing.

use std::collections::BTreeMap;

use serde::Serialize;

use vdiff_eval::Value;

use crate::store::{RunRecord, RunState, TableRecord};

/// Per-(run, shard) record inside a [`RunReport`].
#[derive(Debug, Clone, Serialize)]
pub struct ShardReport {
    #[serde(rename = "State")]
    pub state: RunState,
    #[serde(rename = "RowsCompared")]
    pub rows_compared: i64,
    #[serde(rename = "HasMismatch")]
    pub has_mismatch: bool,
    #[serde(rename = "StartedAt", skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(rename = "CompletedAt", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    /// Only present while a failure is pending retry or operator action; a
    /// stop wipes it so cancellations never read as failures.
    #[serde(rename = "Errors", skip_serializing_if = "Option::is_none")]
    pub errors: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    #[serde(rename = "State")]
    pub state: RunState,
    #[serde(rename = "RowsCompared")]
    pub rows_compared: i64,
    #[serde(rename = "MismatchedRows")]
    pub mismatched_rows: i64,
    #[serde(rename = "ExtraRowsSource")]
    pub extra_rows_source: i64,
    #[serde(rename = "ExtraRowsTarget")]
    pub extra_rows_target: i64,
}

/// Workflow-level view of one run, derived from the per-shard rows.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "State")]
    pub state: RunState,
    #[serde(rename = "RowsCompared")]
    pub rows_compared: i64,
    #[serde(rename = "HasMismatch")]
    pub has_mismatch: bool,
    #[serde(rename = "StartedAt", skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(rename = "CompletedAt", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(rename = "Shards")]
    pub shards: BTreeMap<String, ShardReport>,
    #[serde(rename = "TableSummary", skip_serializing_if = "Option::is_none")]
    pub table_summary: Option<BTreeMap<String, TableSummary>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    #[serde(rename = "Status")]
    pub status: String,
}

impl DeleteReport {
    pub fn completed() -> DeleteReport {
        DeleteReport {
            status: "completed".into(),
        }
    }
}

/// Run state as a pure function of the per-shard states: complete only when
/// every shard is, live while any shard runs, failed only when a failure is
/// not being driven anywhere.
pub fn derive_state(states: &[RunState]) -> RunState {
    if !states.is_empty() && states.iter().all(|s| *s == RunState::Completed) {
        return RunState::Completed;
    }
    if states.contains(&RunState::Started) {
        return RunState::Started;
    }
    if states.contains(&RunState::Error) {
        return RunState::Error;
    }
    if states.contains(&RunState::Stopped) {
        return RunState::Stopped;
    }
    RunState::Pending
}

impl RunReport {
    /// Aggregate the per-shard rows of one UUID into the workflow view.
    /// Table records always feed the mismatch flag; the per-table summary is
    /// only rendered when `verbose` is set.
    pub fn assemble(
        uuid: &str,
        per_shard: &[(String, RunRecord)],
        tables: &[(String, TableRecord)],
        verbose: bool,
    ) -> RunReport {
        let mut shards = BTreeMap::new();
        let mut states = Vec::new();
        let mut rows_compared = 0;
        let mut has_mismatch = false;
        let mut started_at: Option<String> = None;
        let mut completed_at: Option<String> = None;

        for (shard, run) in per_shard {
            states.push(run.state);
            rows_compared += run.rows_compared;
            if let Some(s) = &run.started_at {
                if started_at.as_ref().map_or(true, |cur| s < cur) {
                    started_at = Some(s.clone());
                }
            }
            if let Some(c) = &run.completed_at {
                if completed_at.as_ref().map_or(true, |cur| c > cur) {
                    completed_at = Some(c.clone());
                }
            }
            shards.insert(
                shard.clone(),
                ShardReport {
                    state: run.state,
                    rows_compared: run.rows_compared,
                    has_mismatch: false,
                    started_at: run.started_at.clone(),
                    completed_at: run.completed_at.clone(),
                    errors: run.last_error.clone(),
                },
            );
        }

        let mut summary: BTreeMap<String, TableSummary> = BTreeMap::new();
        for (shard, rec) in tables {
            if rec.has_mismatch() {
                has_mismatch = true;
                if let Some(report) = shards.get_mut(shard) {
                    report.has_mismatch = true;
                }
            }
            let entry = summary.entry(rec.table_name.clone()).or_insert(TableSummary {
                state: RunState::Pending,
                rows_compared: 0,
                mismatched_rows: 0,
                extra_rows_source: 0,
                extra_rows_target: 0,
            });
            entry.rows_compared += rec.rows_compared;
            entry.mismatched_rows += rec.mismatched_rows;
            entry.extra_rows_source += rec.extra_rows_source;
            entry.extra_rows_target += rec.extra_rows_target;
        }
        // A table's summary state derives the same way a run's does.
        for (name, entry) in summary.iter_mut() {
            let states: Vec<RunState> = tables
                .iter()
                .filter(|(_, rec)| &rec.table_name == name)
                .map(|(_, rec)| rec.state)
                .collect();
            entry.state = derive_state(&states);
        }
        let table_summary = verbose.then_some(summary);

        let state = derive_state(&states);
        if state != RunState::Completed {
            completed_at = None;
        }

        RunReport {
            uuid: uuid.to_string(),
            state,
            rows_compared,
            has_mismatch,
            started_at,
            completed_at,
            shards,
            table_summary,
        }
    }
}

/// Render a row value for a mismatch sample in `report_json`.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Int64(i) => serde_json::json!(i),
        Value::Uint64(u) => serde_json::json!(u),
        Value::Float64(f) => serde_json::json!(f),
        Value::Decimal(d) => serde_json::json!(d.to_string()),
        Value::Text(_, s) => serde_json::json!(s),
        Value::Binary(b) => serde_json::json!(String::from_utf8_lossy(b)),
        Value::Date(d) => serde_json::json!(d.to_string()),
        Value::Time(t) => serde_json::json!(t.to_string()),
        Value::Tuple(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use super::RunState::*;

    #[test]
    fn derived_state_matrix() {
        assert_eq!(derive_state(&[Completed, Completed]), Completed);
        assert_eq!(derive_state(&[Completed, Started]), Started);
        assert_eq!(derive_state(&[Error, Started]), Started);
        assert_eq!(derive_state(&[Error, Completed]), Error);
        assert_eq!(derive_state(&[Stopped, Completed]), Stopped);
        assert_eq!(derive_state(&[Pending, Pending]), Pending);
        assert_eq!(derive_state(&[]), Pending);
    }

    fn run(state: RunState, rows: i64, last_error: Option<&str>) -> RunRecord {
        RunRecord {
            id: 1,
            uuid: "u".into(),
            keyspace: "customer".into(),
            workflow: "p1c2".into(),
            state,
            created_at: "2024-01-01 00:00:00".into(),
            started_at: Some("2024-01-01 00:00:01".into()),
            completed_at: (state == Completed).then(|| "2024-01-01 00:00:02".into()),
            last_error: last_error.map(String::from),
            options_json: "{}".into(),
            rows_compared: rows,
        }
    }

    #[test]
    fn rows_compared_sums_across_shards() {
        let report = RunReport::assemble(
            "u",
            &[
                ("-80".into(), run(Completed, 60, None)),
                ("80-".into(), run(Completed, 41, None)),
            ],
            &[],
            false,
        );
        assert_eq!(report.rows_compared, 101);
        assert_eq!(report.state, Completed);
        assert!(!report.has_mismatch);
    }

    #[test]
    fn errors_field_is_omitted_when_clear() {
        let report =
            RunReport::assemble("u", &[("-80".into(), run(Stopped, 0, None))], &[], false);
        let json = serde_json::to_string_pretty(&report).unwrap();
        assert!(!json.contains("\"Errors\":"));
        assert!(json.contains("\"State\": \"stopped\""));

        let report =
            RunReport::assemble("u", &[("-80".into(), run(Error, 0, Some("boom")))], &[], false);
        let json = serde_json::to_string_pretty(&report).unwrap();
        assert!(json.contains("\"Errors\":"));
    }
}
