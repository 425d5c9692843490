//! `gid`: the G_ID service binary.
//!
//! Reads `gid.toml` (or the path given with `--config`), opens the SQLite
//! store and either serves the JSON API or runs one operator command.
//!
//! ```text
//! gid serve
//! gid sync-source
//! gid sync-upload people.json --preview
//! gid sequence reset --year 26 --confirm
//! ```

mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use gid_core::{
  allocator::Allocator,
  identity::Candidate,
  integrity,
  reconcile::{Reconciler, Snapshot},
  store::IdentityStore,
};
use gid_store_sqlite::SqliteStore;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "G_ID allocation and reconciliation service")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "gid.toml", global = true)]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Serve the JSON API over HTTP.
  Serve,
  /// Reconcile the authoritative source table once.
  SyncSource,
  /// Reconcile an uploaded snapshot: a JSON array of records.
  SyncUpload {
    file: PathBuf,
    /// Report what would change without writing anything.
    #[arg(long)]
    preview: bool,
  },
  /// Inspect or administer the id sequence.
  #[command(subcommand)]
  Sequence(SequenceCommand),
  /// Check the identity table for drift and collisions.
  Integrity,
}

#[derive(Subcommand)]
enum SequenceCommand {
  /// Print the persisted state and the next id.
  Show,
  /// Allocate ids outside of any reconciliation pass.
  Allocate {
    #[arg(long, default_value_t = 1)]
    count: usize,
  },
  /// Rewind the counter. Refused without `--confirm`.
  Reset {
    /// Two-digit year; defaults to the current year.
    #[arg(long)]
    year:    Option<u8>,
    #[arg(long, default_value_t = 0)]
    digit:   u8,
    #[arg(long)]
    confirm: bool,
  },
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = ServerConfig::load(&cli.config)?;

  let store = SqliteStore::open(&cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))?
    .with_allocation_retries(cfg.allocation_retries);
  let store = Arc::new(store);
  let allocator = Allocator::new(Arc::clone(&store), Arc::clone(&store));
  let reconciler = Reconciler::new(Arc::clone(&store), Arc::clone(&store), cfg.policy.clone());

  match cli.command {
    Command::Serve => serve(store, &cfg).await,
    Command::SyncSource => {
      let summary = reconciler
        .reconcile(Snapshot::Source)
        .await
        .context("source reconciliation failed")?;
      print_json(&summary)
    }
    Command::SyncUpload { file, preview } => {
      let raw = std::fs::read_to_string(&file)
        .with_context(|| format!("reading {}", file.display()))?;
      let records: Vec<Candidate> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;
      let snapshot = Snapshot::Upload(records);
      let result = if preview {
        reconciler.preview(snapshot).await
      } else {
        reconciler.reconcile(snapshot).await
      };
      let summary = result.context("upload reconciliation failed")?;
      print_json(&summary)
    }
    Command::Sequence(SequenceCommand::Show) => {
      print_json(&allocator.info().await.context("reading sequence")?)
    }
    Command::Sequence(SequenceCommand::Allocate { count }) => {
      let ids = allocator.allocate_batch(count).await.context("allocation failed")?;
      print_json(&ids)
    }
    Command::Sequence(SequenceCommand::Reset { year, digit, confirm }) => {
      let state = allocator
        .reset(year, digit, confirm)
        .await
        .context("sequence reset refused")?;
      print_json(&state)
    }
    Command::Integrity => {
      let records = store.list_identities(None).await.context("listing identities")?;
      let next = allocator.info().await.context("reading sequence")?.next;
      let report = integrity::check(&records, next.as_ref());
      if !report.is_clean() {
        tracing::warn!(
          drifted = report.drifted.len(),
          shared_national = report.shared_national.len(),
          ahead_of_sequence = report.ahead_of_sequence.len(),
          "integrity problems found"
        );
      }
      print_json(&report)
    }
  }
}

async fn serve(store: Arc<SqliteStore>, cfg: &ServerConfig) -> anyhow::Result<()> {
  let app = gid_api::api_router(store, cfg.policy.clone()).layer(TraceLayer::new_for_http());
  let address = format!("{}:{}", cfg.host, cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;
  Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
