//! Online, resumable data-consistency checking for sharded replication
//! workflows.
//!
//! A workflow copies tables from a source keyspace into a (differently
//! sharded) target keyspace. The engine here runs consistency checks, called
//! runs, against such a workflow without pausing it: a controller fans out to
//! every target shard, a per-shard differ aligns source and target row
//! streams in primary-key order and compares them through the `vdiff_eval`
//! kernel, and a retry manager re-drives shards that failed ephemerally.
//! All durable state lives in three sidecar tables per target shard; the
//! run-level view is a pure function of the per-shard rows.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod controller;
mod differ;
pub mod error;
pub mod facade;
pub mod local;
pub mod report;
pub mod retry_manager;
pub mod store;

pub use error::VdiffError;
pub use store::{RunState, SidecarDb};

use differ::DifferHandle;
use vdiff_eval::Value;

/// One fetched table row: every column value in declared column order.
pub type Row = Vec<Value>;

/// Declared type of a table column, used to decode fetched rows into typed
/// values. Character columns carry their collation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Int64,
    Uint64,
    Float64,
    Decimal,
    Text,
    TextBinary,
    Binary,
    Date,
    Time,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub col_type: ColumnType,
}

/// Table layout shared by source and target. `pk` holds indices into
/// `columns`, in key order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub pk: Vec<usize>,
}

impl TableSpec {
    pub fn pk_of<'a>(&self, row: &'a [Value]) -> Vec<Value> {
        self.pk.iter().map(|&i| row[i].clone()).collect()
    }

    pub fn non_pk_indices(&self) -> Vec<usize> {
        (0..self.columns.len())
            .filter(|i| !self.pk.contains(i))
            .collect()
    }
}

/// The replication workflow a run checks: keyspaces, shard sets and the
/// shared table layouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub workflow: String,
    pub source_keyspace: String,
    pub target_keyspace: String,
    pub source_shards: Vec<String>,
    pub target_shards: Vec<String>,
    pub tables: Vec<TableSpec>,
}

/// Key-hash range owned by a shard. Shard names use the `start-end` hex
/// prefix notation (`-80`, `40-a0`, `a0-`); `0` and `-` cover the full ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    pub start: u64,
    /// Exclusive upper bound; `None` is unbounded.
    pub end: Option<u64>,
}

impl KeyRange {
    pub fn full() -> KeyRange {
        KeyRange { start: 0, end: None }
    }

    pub fn contains(&self, hash: u64) -> bool {
        hash >= self.start && self.end.map_or(true, |end| hash < end)
    }

    pub fn parse(shard: &str) -> Result<KeyRange, VdiffError> {
        if shard == "0" || shard == "-" {
            return Ok(KeyRange::full());
        }
        let Some((start, end)) = shard.split_once('-') else {
            return Err(VdiffError::InvalidArgument(format!(
                "malformed shard range {shard:?}"
            )));
        };
        let parse_bound = |s: &str| -> Result<u64, VdiffError> {
            if s.len() > 16 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(VdiffError::InvalidArgument(format!(
                    "malformed shard range bound {s:?}"
                )));
            }
            // Left-aligned prefix: "80" means 0x8000_0000_0000_0000.
            let padded = format!("{s:0<16}");
            u64::from_str_radix(&padded, 16).map_err(|_| {
                VdiffError::InvalidArgument(format!("malformed shard range bound {s:?}"))
            })
        };
        let start = if start.is_empty() { 0 } else { parse_bound(start)? };
        let end = if end.is_empty() {
            None
        } else {
            Some(parse_bound(end)?)
        };
        Ok(KeyRange { start, end })
    }
}

/// Hash a primary-key tuple for shard routing. Both sides of a workflow must
/// agree on this, so it folds the canonical form of each value rather than
/// its storage encoding.
pub fn key_hash(pk: &[Value]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for value in pk {
        match value {
            Value::Null => 0u8.hash(&mut hasher),
            Value::Int64(i) => {
                1u8.hash(&mut hasher);
                i.hash(&mut hasher);
            }
            Value::Uint64(u) => {
                1u8.hash(&mut hasher);
                (*u as i64).hash(&mut hasher);
            }
            Value::Float64(f) => {
                2u8.hash(&mut hasher);
                f.to_bits().hash(&mut hasher);
            }
            Value::Decimal(d) => {
                3u8.hash(&mut hasher);
                d.to_string().hash(&mut hasher);
            }
            Value::Text(_, s) => {
                4u8.hash(&mut hasher);
                s.hash(&mut hasher);
            }
            Value::Binary(b) => {
                4u8.hash(&mut hasher);
                b.hash(&mut hasher);
            }
            Value::Date(d) => {
                5u8.hash(&mut hasher);
                d.to_string().hash(&mut hasher);
            }
            Value::Time(t) => {
                6u8.hash(&mut hasher);
                t.to_string().hash(&mut hasher);
            }
            Value::Tuple(items) => {
                7u8.hash(&mut hasher);
                key_hash(items).hash(&mut hasher);
            }
        }
    }
    hasher.finish()
}

/// Row access the engine assumes from the surrounding cluster: a way to read
/// a table from one shard in primary-key order, in bounded packets, starting
/// strictly after a given key. Implementations must tolerate being re-opened
/// at any checkpointed position.
#[async_trait]
pub trait ShardDataAccess: Send + Sync + 'static {
    async fn fetch_rows(
        &self,
        keyspace: &str,
        shard: &str,
        table: &TableSpec,
        after_pk: Option<&[Value]>,
        limit: usize,
    ) -> Result<Vec<Row>, VdiffError>;
}

/// Per-run options, persisted as `options_json` so resumes and automatic
/// retries re-run with what the operator originally asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VdiffOptions {
    /// Tables to check; empty means every table in the workflow.
    pub tables: Vec<String>,
    /// Cells the run may read source data from. Recorded for operators; the
    /// data-access layer does its own cell routing.
    pub source_cells: Vec<String>,
    /// Rows per stream packet.
    pub packet_rows: usize,
    /// Persist progress every this many rows.
    pub checkpoint_rows: usize,
    /// Cap on sampled rows kept in a table's diff report.
    pub sample_rows: usize,
}

impl Default for VdiffOptions {
    fn default() -> Self {
        VdiffOptions {
            tables: Vec::new(),
            source_cells: Vec::new(),
            packet_rows: 64,
            checkpoint_rows: 100,
            sample_rows: 10,
        }
    }
}

/// Engine-level tuning, independent of any single run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pause between stream packets; gives the row copy a stable pace and
    /// keeps load on serving shards bounded.
    pub packet_pause: Duration,
    /// Default deadline for controller operations.
    pub op_deadline: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            packet_pause: Duration::ZERO,
            op_deadline: Duration::from_secs(30),
        }
    }
}

/// One engine instance checks one workflow. It owns the sidecar handle and
/// the set of running differ tasks for every target shard; all cross-task
/// shared state is in the sidecar tables.
pub struct Engine {
    workflow: WorkflowSpec,
    data: Arc<dyn ShardDataAccess>,
    sidecars: BTreeMap<String, Arc<SidecarDb>>,
    target_ranges: BTreeMap<String, KeyRange>,
    differs: Mutex<HashMap<(String, String), DifferHandle>>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        workflow: WorkflowSpec,
        data: Arc<dyn ShardDataAccess>,
        sidecars: BTreeMap<String, Arc<SidecarDb>>,
        config: EngineConfig,
    ) -> Result<Arc<Engine>, VdiffError> {
        let mut target_ranges = BTreeMap::new();
        for shard in &workflow.target_shards {
            if !sidecars.contains_key(shard) {
                return Err(VdiffError::InvalidArgument(format!(
                    "target shard {shard} has no sidecar database"
                )));
            }
            target_ranges.insert(shard.clone(), KeyRange::parse(shard)?);
        }
        Ok(Arc::new(Engine {
            workflow,
            data,
            sidecars,
            target_ranges,
            differs: Mutex::new(HashMap::new()),
            config,
        }))
    }

    pub fn workflow(&self) -> &WorkflowSpec {
        &self.workflow
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn target_shards(&self) -> &[String] {
        &self.workflow.target_shards
    }

    pub fn sidecar(&self, shard: &str) -> Arc<SidecarDb> {
        self.sidecars[shard].clone()
    }

    pub(crate) fn data(&self) -> Arc<dyn ShardDataAccess> {
        self.data.clone()
    }

    pub(crate) fn target_range(&self, shard: &str) -> KeyRange {
        self.target_ranges[shard]
    }

    /// Tables a run covers, honoring its table filter.
    pub(crate) fn run_tables(&self, options: &VdiffOptions) -> Vec<TableSpec> {
        if options.tables.is_empty() {
            return self.workflow.tables.clone();
        }
        self.workflow
            .tables
            .iter()
            .filter(|t| options.tables.iter().any(|name| name == &t.name))
            .cloned()
            .collect()
    }

    pub(crate) fn differ_active(&self, shard: &str, uuid: &str) -> bool {
        let differs = self.differs.lock().unwrap();
        differs
            .get(&(shard.to_string(), uuid.to_string()))
            .is_some_and(|h| !h.is_finished())
    }

    /// Check-and-spawn under one lock so a concurrent resume and retry
    /// sweep cannot attach two differs to the same (shard, run).
    pub(crate) fn register_differ_if_idle(
        &self,
        shard: &str,
        uuid: &str,
        spawn: impl FnOnce() -> DifferHandle,
    ) -> bool {
        let mut differs = self.differs.lock().unwrap();
        differs.retain(|_, h| !h.is_finished());
        let key = (shard.to_string(), uuid.to_string());
        if differs.contains_key(&key) {
            return false;
        }
        differs.insert(key, spawn());
        true
    }

    pub(crate) fn take_differ(&self, shard: &str, uuid: &str) -> Option<DifferHandle> {
        let mut differs = self.differs.lock().unwrap();
        differs.remove(&(shard.to_string(), uuid.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_range_parsing_covers_the_standard_shard_names() {
        assert_eq!(KeyRange::parse("0").unwrap(), KeyRange::full());
        assert_eq!(KeyRange::parse("-").unwrap(), KeyRange::full());

        let low = KeyRange::parse("-80").unwrap();
        assert_eq!(low.start, 0);
        assert_eq!(low.end, Some(0x8000_0000_0000_0000));

        let high = KeyRange::parse("80-").unwrap();
        assert_eq!(high.start, 0x8000_0000_0000_0000);
        assert_eq!(high.end, None);

        let mid = KeyRange::parse("40-a0").unwrap();
        assert!(mid.contains(0x4000_0000_0000_0000));
        assert!(mid.contains(0x9fff_ffff_ffff_ffff));
        assert!(!mid.contains(0xa000_0000_0000_0000));

        assert!(KeyRange::parse("xyz").is_err());
    }

    #[test]
    fn two_way_split_partitions_every_key() {
        let low = KeyRange::parse("-80").unwrap();
        let high = KeyRange::parse("80-").unwrap();
        for cid in 0..500i64 {
            let h = key_hash(&[Value::Int64(cid)]);
            assert!(low.contains(h) ^ high.contains(h), "cid {cid}");
        }
    }

    #[test]
    fn key_hash_ignores_integer_signedness_tag() {
        // The same logical key read as signed on one side and unsigned on
        // the other must route identically.
        assert_eq!(
            key_hash(&[Value::Int64(42)]),
            key_hash(&[Value::Uint64(42)])
        );
    }
}
