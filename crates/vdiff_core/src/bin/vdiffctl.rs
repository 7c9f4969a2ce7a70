//! Admin client for vdiff runs against a local cluster directory.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use vdiff_core::controller;
use vdiff_core::facade::{self, ActionRequest};
use vdiff_core::local::LocalCluster;
use vdiff_core::retry_manager::{self, RetryManagerConfig};
use vdiff_core::{ColumnSpec, ColumnType, EngineConfig, TableSpec, WorkflowSpec};

use vdiff_eval::Value;

#[derive(Parser)]
#[command(name = "vdiffctl")]
#[command(about = "Data-consistency checks for replication workflows", long_about = None)]
struct Args {
    /// Cluster directory holding cluster.json plus the data and sidecar stores.
    #[arg(long, env = "VDIFF_DATA_DIR", default_value = "./vdiff-cluster")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a demo workflow cluster: product/0 moving to customer/-80,80-.
    Init,
    /// Insert demo customer rows into the source and target keyspaces.
    Seed {
        #[arg(long, default_value_t = 100)]
        rows: u32,
    },
    /// Run a vdiff action against the cluster's workflow.
    Vdiff {
        /// `<target_keyspace>.<workflow>`
        target: String,
        /// One of create, resume, stop, show, delete.
        action: String,
        /// UUID argument, or `last` / `all` where the action accepts them.
        arg: Option<String>,
        /// Comma-separated cells the run may read source data from.
        #[arg(long)]
        cells: Option<String>,
        /// Comma-separated table filter; defaults to every workflow table.
        #[arg(long)]
        tables: Option<String>,
        /// Include a per-table summary in show output.
        #[arg(long)]
        verbose: bool,
        /// Block until the created vdiff completes or fails.
        #[arg(long)]
        wait: bool,
        /// Progress reporting interval while waiting.
        #[arg(long, value_parser = parse_duration, default_value = "1s")]
        wait_update_interval: Duration,
    },
}

fn demo_workflow() -> WorkflowSpec {
    WorkflowSpec {
        workflow: "p1c2".into(),
        source_keyspace: "product".into(),
        target_keyspace: "customer".into(),
        source_shards: vec!["0".into()],
        target_shards: vec!["-80".into(), "80-".into()],
        tables: vec![TableSpec {
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
                ColumnSpec {
                    name: "sport".into(),
                    col_type: ColumnType::TextBinary,
                },
            ],
            pk: vec![0],
        }],
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Init => {
            let cluster =
                LocalCluster::create(&args.data_dir, demo_workflow(), EngineConfig::default())?;
            println!(
                "initialized {}.{} in {}",
                cluster.workflow().target_keyspace,
                cluster.workflow().workflow,
                cluster.dir().display()
            );
        }
        Command::Seed { rows } => {
            let cluster = LocalCluster::open(&args.data_dir, EngineConfig::default())?;
            let table = cluster
                .table("customer")
                .ok_or_else(|| anyhow::anyhow!("workflow has no customer table"))?
                .clone();
            for cid in 1..=i64::from(rows) {
                cluster.insert_replicated(
                    &table,
                    &[
                        Value::Int64(cid),
                        Value::text(format!("customer-{cid}")),
                        Value::text(if cid % 2 == 0 { "soho" } else { "enterprise" }),
                        Value::text("football"),
                    ],
                )?;
            }
            println!("seeded {rows} rows");
        }
        Command::Vdiff {
            target,
            action,
            arg,
            cells,
            tables,
            verbose,
            wait,
            wait_update_interval,
        } => {
            let cluster = LocalCluster::open(&args.data_dir, EngineConfig::default())?;
            let expected = format!(
                "{}.{}",
                cluster.workflow().target_keyspace,
                cluster.workflow().workflow
            );
            if target != expected {
                eprintln!("unknown workflow {target}; this cluster serves {expected}");
                std::process::exit(1);
            }

            let engine = cluster.engine();
            controller::start(&engine)?;
            retry_manager::spawn(engine.clone(), RetryManagerConfig::default());

            let mut request = ActionRequest {
                action,
                arg,
                verbose,
                wait,
                wait_update_interval,
                ..Default::default()
            };
            if let Some(cells) = cells {
                request.options.source_cells =
                    cells.split(',').map(str::to_string).collect();
            }
            if let Some(tables) = tables {
                request.options.tables = tables.split(',').map(str::to_string).collect();
            }
            match facade::perform_action(&engine, request).await {
                Ok(output) => println!("{output}"),
                Err(err) => {
                    eprintln!("{err}");
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let (number, unit) = raw
        .find(|c: char| !c.is_ascii_digit())
        .map(|idx| raw.split_at(idx))
        .unwrap_or((raw, "s"));
    let number: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration {raw:?}"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(number)),
        "s" | "" => Ok(Duration::from_secs(number)),
        "m" => Ok(Duration::from_secs(number * 60)),
        other => Err(format!("unknown duration unit {other:?}")),
    }
}
