//! Per-shard diff execution.
//!
//! One differ task runs one vdiff on one target shard. It merges the source
//! shards covering this target's key range into a single primary-key-ordered
//! stream, walks it against the target's own stream, and compares aligned
//! rows through the `vdiff_eval` kernel. Progress is checkpointed every N
//! rows; cancellation is observed at row reads and checkpoint boundaries,
//! never mid-row.
//!
//! The differ deliberately receives only capability handles (the sidecar
//! store and the row-access seam) and no reference back to the controller.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use vdiff_eval::{null_safe_equal, row_key_cmp, Collation, Value};

use crate::error::VdiffError;
use crate::report::value_to_json;
use crate::store::{RunState, SidecarDb, TableProgress};
use crate::{key_hash, ColumnType, KeyRange, Row, ShardDataAccess, TableSpec, VdiffOptions};

/// Everything a differ task may touch.
pub(crate) struct DifferContext {
    pub shard: String,
    pub vdiff_id: i64,
    pub uuid: String,
    pub source_keyspace: String,
    pub target_keyspace: String,
    pub source_shards: Vec<String>,
    pub tables: Vec<TableSpec>,
    pub target_range: KeyRange,
    pub sidecar: Arc<SidecarDb>,
    pub data: Arc<dyn ShardDataAccess>,
    pub options: VdiffOptions,
    pub packet_pause: Duration,
}

pub(crate) struct DifferHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DifferHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn request_stop(&self) {
        let _ = self.cancel.send(true);
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}

pub(crate) fn spawn(ctx: DifferContext) -> DifferHandle {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let task = tokio::spawn(run(ctx, cancel_rx));
    DifferHandle {
        cancel: cancel_tx,
        task,
    }
}

async fn run(ctx: DifferContext, cancel: watch::Receiver<bool>) {
    let shard = ctx.shard.clone();
    let uuid = ctx.uuid.clone();
    match diff_shard(&ctx, &cancel).await {
        Ok(Outcome::Completed) => {
            tracing::info!(shard = %shard, uuid = %uuid, "vdiff shard completed");
        }
        Ok(Outcome::Stopped) => {
            tracing::info!(shard = %shard, uuid = %uuid, "vdiff shard stopped at checkpoint");
        }
        Err(err) => {
            tracing::warn!(shard = %shard, uuid = %uuid, error = %err, "vdiff shard failed");
            if let Err(store_err) = ctx.sidecar.mark_error(ctx.vdiff_id, &err.to_string()) {
                tracing::error!(error = ?store_err, "failed to persist vdiff error state");
            }
        }
    }
}

enum Outcome {
    Completed,
    Stopped,
}

enum TableOutcome {
    Completed,
    Stopped,
}

async fn diff_shard(
    ctx: &DifferContext,
    cancel: &watch::Receiver<bool>,
) -> Result<Outcome, VdiffError> {
    ctx.sidecar.transition_started(ctx.vdiff_id)?;

    for table in &ctx.tables {
        if *cancel.borrow() {
            ctx.sidecar.stop_run(ctx.vdiff_id)?;
            return Ok(Outcome::Stopped);
        }
        ctx.sidecar.init_table(ctx.vdiff_id, &table.name)?;
        let record = ctx.sidecar.table_record(ctx.vdiff_id, &table.name)?;
        if record.state == RunState::Completed {
            continue;
        }
        ctx.sidecar.table_started(ctx.vdiff_id, &table.name)?;

        match diff_table(ctx, table, record.lastpk_json.as_deref(), cancel).await? {
            TableOutcome::Stopped => {
                ctx.sidecar.stop_run(ctx.vdiff_id)?;
                return Ok(Outcome::Stopped);
            }
            TableOutcome::Completed => {
                ctx.sidecar.complete_table(ctx.vdiff_id, &table.name)?;
            }
        }
    }

    ctx.sidecar.complete_run(ctx.vdiff_id)?;
    Ok(Outcome::Completed)
}

async fn diff_table(
    ctx: &DifferContext,
    table: &TableSpec,
    lastpk_json: Option<&str>,
    cancel: &watch::Receiver<bool>,
) -> Result<TableOutcome, VdiffError> {
    let start_pk = lastpk_json
        .map(|json| decode_lastpk(table, json))
        .transpose()?;

    let mut source = SourceMerger::open(ctx, table, start_pk.clone());
    let mut target = ShardStream::open(
        ctx,
        &ctx.target_keyspace,
        &ctx.shard,
        table,
        start_pk,
        None,
    );

    let non_pk = table.non_pk_indices();
    let mut progress = new_progress(ctx);
    let mut since_checkpoint = 0usize;
    let mut last_pk: Option<Vec<Value>> = None;

    let mut src = source.next().await?;
    let mut tgt = target.next().await?;

    loop {
        // Cancellation is only honored between rows; whatever was already
        // counted gets checkpointed so a resume continues exactly here.
        if *cancel.borrow() {
            flush(ctx, table, &mut progress, &last_pk)?;
            return Ok(TableOutcome::Stopped);
        }

        match (src.take(), tgt.take()) {
            (None, None) => break,
            (Some(s), None) => {
                record_extra_source(table, &s, &mut progress);
                last_pk = Some(table.pk_of(&s));
                src = source.next().await?;
            }
            (None, Some(t)) => {
                record_extra_target(table, &t, &mut progress);
                last_pk = Some(table.pk_of(&t));
                tgt = target.next().await?;
            }
            (Some(s), Some(t)) => {
                let s_pk = table.pk_of(&s);
                let t_pk = table.pk_of(&t);
                match row_key_cmp(&s_pk, &t_pk) {
                    std::cmp::Ordering::Less => {
                        record_extra_source(table, &s, &mut progress);
                        last_pk = Some(s_pk);
                        src = source.next().await?;
                        tgt = Some(t);
                    }
                    std::cmp::Ordering::Greater => {
                        record_extra_target(table, &t, &mut progress);
                        last_pk = Some(t_pk);
                        tgt = target.next().await?;
                        src = Some(s);
                    }
                    std::cmp::Ordering::Equal => {
                        compare_aligned(&non_pk, table, &s, &t, &s_pk, &mut progress)?;
                        last_pk = Some(s_pk);
                        src = source.next().await?;
                        tgt = target.next().await?;
                    }
                }
            }
        }

        since_checkpoint += 1;
        if since_checkpoint >= ctx.options.checkpoint_rows.max(1) {
            flush(ctx, table, &mut progress, &last_pk)?;
            since_checkpoint = 0;
        }
    }

    flush(ctx, table, &mut progress, &last_pk)?;
    Ok(TableOutcome::Completed)
}

fn new_progress(ctx: &DifferContext) -> TableProgress {
    TableProgress {
        sample_cap: ctx.options.sample_rows,
        ..Default::default()
    }
}

/// Compare the non-key columns of a key-aligned pair. NULL equals NULL here;
/// an empty string never equals either.
fn compare_aligned(
    non_pk: &[usize],
    table: &TableSpec,
    source: &Row,
    target: &Row,
    pk: &[Value],
    progress: &mut TableProgress,
) -> Result<(), VdiffError> {
    progress.rows_delta += 1;
    for &i in non_pk {
        if !null_safe_equal(&source[i], &target[i])? {
            progress.mismatched_delta += 1;
            if progress.samples.len() < progress.sample_cap {
                progress.samples.push(serde_json::json!({
                    "table": table.name,
                    "pk": pk.iter().map(value_to_json).collect::<Vec<_>>(),
                    "source": source.iter().map(value_to_json).collect::<Vec<_>>(),
                    "target": target.iter().map(value_to_json).collect::<Vec<_>>(),
                }));
            }
            break;
        }
    }
    Ok(())
}

fn record_extra_source(table: &TableSpec, row: &Row, progress: &mut TableProgress) {
    progress.rows_delta += 1;
    progress.extra_source_delta += 1;
    if progress.samples.len() < progress.sample_cap {
        progress.samples.push(serde_json::json!({
            "table": table.name,
            "pk": table.pk_of(row).iter().map(value_to_json).collect::<Vec<_>>(),
            "source": row.iter().map(value_to_json).collect::<Vec<_>>(),
        }));
    }
}

fn record_extra_target(table: &TableSpec, row: &Row, progress: &mut TableProgress) {
    progress.rows_delta += 1;
    progress.extra_target_delta += 1;
    if progress.samples.len() < progress.sample_cap {
        progress.samples.push(serde_json::json!({
            "table": table.name,
            "pk": table.pk_of(row).iter().map(value_to_json).collect::<Vec<_>>(),
            "target": row.iter().map(value_to_json).collect::<Vec<_>>(),
        }));
    }
}

fn flush(
    ctx: &DifferContext,
    table: &TableSpec,
    progress: &mut TableProgress,
    last_pk: &Option<Vec<Value>>,
) -> Result<(), VdiffError> {
    let lastpk_json = last_pk.as_ref().map(|pk| {
        serde_json::Value::Array(pk.iter().map(value_to_json).collect()).to_string()
    });
    let dirty = progress.rows_delta != 0
        || progress.mismatched_delta != 0
        || progress.extra_source_delta != 0
        || progress.extra_target_delta != 0
        || !progress.samples.is_empty()
        || lastpk_json.is_some();
    if !dirty {
        return Ok(());
    }
    let fresh = TableProgress {
        sample_cap: progress.sample_cap,
        ..Default::default()
    };
    let mut to_save = std::mem::replace(progress, fresh);
    to_save.lastpk_json = lastpk_json;
    ctx.sidecar.save_progress(ctx.vdiff_id, &table.name, &to_save)
}

/// Ordered packet reader over one table on one shard. The packet budget is
/// a transport bound, not a correctness bound: no diff state lives in a
/// packet-sized buffer, so a one-row packet size only costs round trips.
struct ShardStream<'a> {
    data: Arc<dyn ShardDataAccess>,
    keyspace: String,
    shard: String,
    table: &'a TableSpec,
    /// Last fetched key, pre-filter, so filtered-out rows still advance.
    cursor: Option<Vec<Value>>,
    buffer: VecDeque<Row>,
    exhausted: bool,
    packet_rows: usize,
    packet_pause: Duration,
    /// Source streams only surface rows owned by the target's key range.
    filter: Option<KeyRange>,
}

impl<'a> ShardStream<'a> {
    fn open(
        ctx: &DifferContext,
        keyspace: &str,
        shard: &str,
        table: &'a TableSpec,
        start_pk: Option<Vec<Value>>,
        filter: Option<KeyRange>,
    ) -> ShardStream<'a> {
        ShardStream {
            data: ctx.data.clone(),
            keyspace: keyspace.to_string(),
            shard: shard.to_string(),
            table,
            cursor: start_pk,
            buffer: VecDeque::new(),
            exhausted: false,
            packet_rows: ctx.options.packet_rows.max(1),
            packet_pause: ctx.packet_pause,
            filter,
        }
    }

    async fn next(&mut self) -> Result<Option<Row>, VdiffError> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(row));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fill().await?;
        }
    }

    async fn fill(&mut self) -> Result<(), VdiffError> {
        if self.packet_pause > Duration::ZERO {
            tokio::time::sleep(self.packet_pause).await;
        }
        let rows = self
            .data
            .fetch_rows(
                &self.keyspace,
                &self.shard,
                self.table,
                self.cursor.as_deref(),
                self.packet_rows,
            )
            .await?;
        if rows.len() < self.packet_rows {
            self.exhausted = true;
        }
        for row in rows {
            let pk = self.table.pk_of(&row);
            let owned = self
                .filter
                .map_or(true, |range| range.contains(key_hash(&pk)));
            self.cursor = Some(pk);
            if owned {
                self.buffer.push_back(row);
            }
        }
        Ok(())
    }
}

/// K-way merge of the source shards covering this target, by primary key.
struct SourceMerger<'a> {
    streams: Vec<ShardStream<'a>>,
    heads: Vec<Option<Row>>,
    primed: bool,
}

impl<'a> SourceMerger<'a> {
    fn open(ctx: &DifferContext, table: &'a TableSpec, start_pk: Option<Vec<Value>>) -> SourceMerger<'a> {
        let streams = ctx
            .source_shards
            .iter()
            .map(|shard| {
                ShardStream::open(
                    ctx,
                    &ctx.source_keyspace,
                    shard,
                    table,
                    start_pk.clone(),
                    Some(ctx.target_range),
                )
            })
            .collect::<Vec<_>>();
        let heads = streams.iter().map(|_| None).collect();
        SourceMerger {
            streams,
            heads,
            primed: false,
        }
    }

    async fn next(&mut self) -> Result<Option<Row>, VdiffError> {
        if !self.primed {
            for i in 0..self.streams.len() {
                self.heads[i] = self.streams[i].next().await?;
            }
            self.primed = true;
        }

        let mut min_idx: Option<usize> = None;
        for (i, head) in self.heads.iter().enumerate() {
            let Some(row) = head else { continue };
            let better = match min_idx {
                None => true,
                Some(j) => {
                    let min_row = self.heads[j].as_ref().unwrap();
                    let table = self.streams[i].table;
                    row_key_cmp(&table.pk_of(row), &table.pk_of(min_row))
                        == std::cmp::Ordering::Less
                }
            };
            if better {
                min_idx = Some(i);
            }
        }

        let Some(idx) = min_idx else {
            return Ok(None);
        };
        let row = self.heads[idx].take();
        self.heads[idx] = self.streams[idx].next().await?;
        Ok(row)
    }
}

/// Decode a checkpointed primary key back into typed values using the
/// table's key column types.
fn decode_lastpk(table: &TableSpec, json: &str) -> Result<Vec<Value>, VdiffError> {
    let raw: Vec<serde_json::Value> = serde_json::from_str(json)?;
    if raw.len() != table.pk.len() {
        return Err(VdiffError::Permanent(format!(
            "checkpoint key for {} has {} columns, expected {}",
            table.name,
            raw.len(),
            table.pk.len()
        )));
    }
    raw.iter()
        .zip(&table.pk)
        .map(|(value, &col)| json_to_value(table.columns[col].col_type, value))
        .collect()
}

fn json_to_value(
    col_type: ColumnType,
    value: &serde_json::Value,
) -> Result<Value, VdiffError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let bad = || VdiffError::Permanent(format!("cannot decode {value} as {col_type:?}"));
    match col_type {
        ColumnType::Int64 => value.as_i64().map(Value::Int64).ok_or_else(bad),
        ColumnType::Uint64 => value.as_u64().map(Value::Uint64).ok_or_else(bad),
        ColumnType::Float64 => value.as_f64().map(Value::Float64).ok_or_else(bad),
        ColumnType::Decimal => {
            let text = value.as_str().ok_or_else(bad)?;
            BigDecimal::from_str(text)
                .map(Value::Decimal)
                .map_err(|_| bad())
        }
        ColumnType::Text => value
            .as_str()
            .map(|s| Value::Text(Collation::Utf8GeneralCi, s.to_string()))
            .ok_or_else(bad),
        ColumnType::TextBinary => value
            .as_str()
            .map(|s| Value::Text(Collation::Binary, s.to_string()))
            .ok_or_else(bad),
        ColumnType::Binary => value
            .as_str()
            .map(|s| Value::Binary(s.as_bytes().to_vec()))
            .ok_or_else(bad),
        ColumnType::Date => {
            let text = value.as_str().ok_or_else(bad)?;
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| bad())
        }
        ColumnType::Time => {
            let text = value.as_str().ok_or_else(bad)?;
            NaiveTime::parse_from_str(text, "%H:%M:%S")
                .map(Value::Time)
                .map_err(|_| bad())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lastpk_round_trips_through_json() {
        let table = TableSpec {
            name: "customer".into(),
            columns: vec![
                crate::ColumnSpec {
                    name: "cid".into(),
                    col_type: ColumnType::Int64,
                },
                crate::ColumnSpec {
                    name: "name".into(),
                    col_type: ColumnType::Text,
                },
            ],
            pk: vec![0],
        };
        let pk = vec![Value::Int64(1001)];
        let json =
            serde_json::Value::Array(pk.iter().map(value_to_json).collect()).to_string();
        assert_eq!(decode_lastpk(&table, &json).unwrap(), pk);

        assert!(decode_lastpk(&table, "[1, 2]").is_err());
    }
}
