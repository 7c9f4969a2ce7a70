//! File-backed local cluster: a workflow topology, one sqlite database per
//! (keyspace, shard) for table data, and one sidecar database per target
//! shard.
//!
//! This is the data plane the `vdiffctl` binary and the integration tests
//! run against. It implements the same row-access seam a production cluster
//! provides, including hash routing of rows to shards, so the engine code
//! path is identical.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveTime};
use rusqlite::types::ValueRef;
use rusqlite::Connection;

use vdiff_eval::{Collation, Value};

use crate::error::VdiffError;
use crate::store::SidecarDb;
use crate::{
    key_hash, ColumnType, Engine, EngineConfig, KeyRange, Row, ShardDataAccess, TableSpec,
    WorkflowSpec,
};

const CLUSTER_FILE: &str = "cluster.json";

/// Sqlite-backed implementation of the row-access seam.
pub struct SqliteDataAccess {
    conns: Mutex<BTreeMap<(String, String), Connection>>,
    ranges: BTreeMap<(String, String), KeyRange>,
}

impl SqliteDataAccess {
    fn open(dir: &Path, workflow: &WorkflowSpec) -> Result<SqliteDataAccess, VdiffError> {
        let mut conns = BTreeMap::new();
        let mut ranges = BTreeMap::new();
        let mut open_side = |keyspace: &str, shards: &[String]| -> Result<(), VdiffError> {
            for shard in shards {
                let path = dir.join(format!("data_{keyspace}_{shard}.db"));
                let conn = Connection::open(path)?;
                for table in &workflow.tables {
                    conn.execute_batch(&create_table_sql(table))?;
                }
                ranges.insert(
                    (keyspace.to_string(), shard.clone()),
                    KeyRange::parse(shard)?,
                );
                conns.insert((keyspace.to_string(), shard.clone()), conn);
            }
            Ok(())
        };
        open_side(&workflow.source_keyspace, &workflow.source_shards)?;
        open_side(&workflow.target_keyspace, &workflow.target_shards)?;
        Ok(SqliteDataAccess {
            conns: Mutex::new(conns),
            ranges,
        })
    }

    /// Insert a row into a keyspace, routed to the shard owning its key hash.
    /// Returns the shard the row landed on.
    pub fn insert(
        &self,
        keyspace: &str,
        table: &TableSpec,
        row: &[Value],
    ) -> Result<String, VdiffError> {
        let hash = key_hash(&table.pk_of(row));
        let shard = self
            .ranges
            .iter()
            .find(|((ks, _), range)| ks == keyspace && range.contains(hash))
            .map(|((_, shard), _)| shard.clone())
            .ok_or_else(|| {
                VdiffError::InvalidArgument(format!("no shard in {keyspace} owns the row"))
            })?;

        let placeholders = (1..=row.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let columns = table
            .columns
            .iter()
            .map(|c| c.name.clone())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({columns}) VALUES ({placeholders})",
            table.name
        );

        let conns = self.conns.lock().unwrap();
        let conn = &conns[&(keyspace.to_string(), shard.clone())];
        let params: Vec<rusqlite::types::Value> = row.iter().map(to_sql_value).collect();
        conn.execute(&sql, rusqlite::params_from_iter(params))?;
        Ok(shard)
    }

    /// Raw statement against one shard's data database; the integration
    /// tests use it to manufacture divergence.
    pub fn execute(&self, keyspace: &str, shard: &str, sql: &str) -> Result<usize, VdiffError> {
        let conns = self.conns.lock().unwrap();
        let conn = &conns[&(keyspace.to_string(), shard.to_string())];
        Ok(conn.execute(sql, [])?)
    }
}

#[async_trait]
impl ShardDataAccess for SqliteDataAccess {
    async fn fetch_rows(
        &self,
        keyspace: &str,
        shard: &str,
        table: &TableSpec,
        after_pk: Option<&[Value]>,
        limit: usize,
    ) -> Result<Vec<Row>, VdiffError> {
        let columns = table
            .columns
            .iter()
            .map(|c| c.name.clone())
            .collect::<Vec<_>>()
            .join(", ");
        let pk_cols = table
            .pk
            .iter()
            .map(|&i| table.columns[i].name.clone())
            .collect::<Vec<_>>();
        let order_by = pk_cols.join(", ");

        let mut sql = format!("SELECT {columns} FROM {}", table.name);
        if after_pk.is_some() {
            let lhs = if pk_cols.len() == 1 {
                pk_cols[0].clone()
            } else {
                format!("({})", pk_cols.join(", "))
            };
            let rhs = if pk_cols.len() == 1 {
                "?1".to_string()
            } else {
                format!(
                    "({})",
                    (1..=pk_cols.len())
                        .map(|i| format!("?{i}"))
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            };
            sql.push_str(&format!(" WHERE {lhs} > {rhs}"));
        }
        sql.push_str(&format!(" ORDER BY {order_by} LIMIT {limit}"));

        let conns = self.conns.lock().unwrap();
        let conn = conns
            .get(&(keyspace.to_string(), shard.to_string()))
            .ok_or_else(|| {
                VdiffError::Unavailable(format!("no data store for {keyspace}/{shard}"))
            })?;
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<rusqlite::types::Value> = after_pk
            .map(|pk| pk.iter().map(to_sql_value).collect())
            .unwrap_or_default();
        let mut rows = stmt.query(rusqlite::params_from_iter(params))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(table.columns.len());
            for (i, col) in table.columns.iter().enumerate() {
                values.push(decode_column(col.col_type, row.get_ref(i)?)?);
            }
            out.push(values);
        }
        Ok(out)
    }
}

fn create_table_sql(table: &TableSpec) -> String {
    let cols = table
        .columns
        .iter()
        .map(|c| {
            let sql_type = match c.col_type {
                ColumnType::Int64 | ColumnType::Uint64 => "INTEGER",
                ColumnType::Float64 => "REAL",
                ColumnType::Binary => "BLOB",
                _ => "TEXT",
            };
            format!("{} {sql_type}", c.name)
        })
        .collect::<Vec<_>>()
        .join(", ");
    let pk = table
        .pk
        .iter()
        .map(|&i| table.columns[i].name.clone())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({cols}, PRIMARY KEY ({pk}));",
        table.name
    )
}

fn to_sql_value(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Int64(i) => Sql::Integer(*i),
        // Demo-cluster storage keeps unsigned values in sqlite's signed
        // integer column; decode restores the declared signedness.
        Value::Uint64(u) => Sql::Integer(*u as i64),
        Value::Float64(f) => Sql::Real(*f),
        Value::Decimal(d) => Sql::Text(d.to_string()),
        Value::Text(_, s) => Sql::Text(s.clone()),
        Value::Binary(b) => Sql::Blob(b.clone()),
        Value::Date(d) => Sql::Text(d.to_string()),
        Value::Time(t) => Sql::Text(t.format("%H:%M:%S").to_string()),
        Value::Tuple(_) => Sql::Null,
    }
}

fn decode_column(col_type: ColumnType, value: ValueRef<'_>) -> Result<Value, VdiffError> {
    if matches!(value, ValueRef::Null) {
        return Ok(Value::Null);
    }
    let bad = |what: &str| VdiffError::Permanent(format!("cannot decode column as {what}"));
    let out = match col_type {
        ColumnType::Int64 => Value::Int64(value.as_i64().map_err(|_| bad("int64"))?),
        ColumnType::Uint64 => Value::Uint64(value.as_i64().map_err(|_| bad("uint64"))? as u64),
        ColumnType::Float64 => Value::Float64(value.as_f64().map_err(|_| bad("float64"))?),
        ColumnType::Decimal => {
            let text = value.as_str().map_err(|_| bad("decimal"))?;
            Value::Decimal(BigDecimal::from_str(text).map_err(|_| bad("decimal"))?)
        }
        ColumnType::Text => Value::Text(
            Collation::Utf8GeneralCi,
            value.as_str().map_err(|_| bad("text"))?.to_string(),
        ),
        ColumnType::TextBinary => Value::Text(
            Collation::Binary,
            value.as_str().map_err(|_| bad("text"))?.to_string(),
        ),
        ColumnType::Binary => Value::Binary(value.as_blob().map_err(|_| bad("binary"))?.to_vec()),
        ColumnType::Date => {
            let text = value.as_str().map_err(|_| bad("date"))?;
            Value::Date(NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| bad("date"))?)
        }
        ColumnType::Time => {
            let text = value.as_str().map_err(|_| bad("time"))?;
            Value::Time(NaiveTime::parse_from_str(text, "%H:%M:%S").map_err(|_| bad("time"))?)
        }
    };
    Ok(out)
}

/// A workflow plus its data and sidecar stores under one directory.
pub struct LocalCluster {
    dir: PathBuf,
    workflow: WorkflowSpec,
    data: Arc<SqliteDataAccess>,
    engine: Arc<Engine>,
}

impl LocalCluster {
    /// Create the on-disk layout for a workflow and open it.
    pub fn create(
        dir: impl AsRef<Path>,
        workflow: WorkflowSpec,
        config: EngineConfig,
    ) -> Result<LocalCluster, VdiffError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .map_err(|e| VdiffError::Unavailable(format!("create {}: {e}", dir.display())))?;
        let json = serde_json::to_string_pretty(&workflow)?;
        fs::write(dir.join(CLUSTER_FILE), json)
            .map_err(|e| VdiffError::Unavailable(format!("write cluster spec: {e}")))?;
        Self::open(dir, config)
    }

    /// Open an existing cluster directory.
    pub fn open(dir: impl AsRef<Path>, config: EngineConfig) -> Result<LocalCluster, VdiffError> {
        let dir = dir.as_ref().to_path_buf();
        let raw = fs::read_to_string(dir.join(CLUSTER_FILE))
            .map_err(|e| VdiffError::Unavailable(format!("read cluster spec: {e}")))?;
        let workflow: WorkflowSpec = serde_json::from_str(&raw)?;

        let data = Arc::new(SqliteDataAccess::open(&dir, &workflow)?);
        let mut sidecars = BTreeMap::new();
        for shard in &workflow.target_shards {
            let sidecar = SidecarDb::open(dir.join(format!("sidecar_{shard}.db")))?;
            sidecars.insert(shard.clone(), sidecar);
        }
        let engine = Engine::new(workflow.clone(), data.clone(), sidecars, config)?;

        Ok(LocalCluster {
            dir,
            workflow,
            data,
            engine,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn workflow(&self) -> &WorkflowSpec {
        &self.workflow
    }

    pub fn engine(&self) -> Arc<Engine> {
        self.engine.clone()
    }

    pub fn data(&self) -> Arc<SqliteDataAccess> {
        self.data.clone()
    }

    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.workflow.tables.iter().find(|t| t.name == name)
    }

    /// Write one row to the source keyspace and mirror it into the target
    /// keyspace, the state a caught-up replication workflow converges to.
    pub fn insert_replicated(&self, table: &TableSpec, row: &[Value]) -> Result<(), VdiffError> {
        self.data.insert(&self.workflow.source_keyspace, table, row)?;
        self.data.insert(&self.workflow.target_keyspace, table, row)?;
        Ok(())
    }
}
