use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use confdrift_analysis::{compute_drift, export_drift, parse_snapshot};
use confdrift_config::ConfdriftConfig;
use confdrift_core::{DriftEvent, DriftOrderKey, Snapshot, TenantScope, result_set_hash};
use confdrift_store::{DriftStore, SqliteDriftStore, StoreSummary, clamp_limit};
use serde::Serialize;

use crate::cli::{Commands, ComputeArgs, ExportArgs, ListArgs, PruneArgs, ScopeArgs, ShowArgs};

#[derive(Debug, Serialize)]
pub struct ComputeReport {
    pub tenant_id: String,
    pub cloud_id: String,
    pub from_snapshot_id: String,
    pub to_snapshot_id: String,
    pub event_count: usize,
    pub result_set_hash: String,
    pub store_summary: Option<StoreSummary>,
    pub events: Vec<DriftEvent>,
}

#[derive(Debug, Serialize)]
pub struct ListReport {
    pub page: u32,
    pub limit: u32,
    pub has_more: bool,
    pub next_cursor: Option<DriftOrderKey>,
    pub events: Vec<DriftEvent>,
}

#[derive(Debug, Serialize)]
pub struct SnapshotReport {
    pub snapshot_id: String,
    pub events: Vec<DriftEvent>,
}

#[derive(Debug, Serialize)]
pub struct ExportReceipt {
    pub out: PathBuf,
    pub event_count: usize,
    pub integrity_hash: String,
}

#[derive(Debug, Serialize)]
pub struct PruneReport {
    pub before: DateTime<Utc>,
    pub deleted: u64,
}

/// Runs one subcommand against the workspace store, writing its JSON result
/// to `out`.
pub fn run_command(
    workspace: &Path,
    config: &ConfdriftConfig,
    command: &Commands,
    out: &mut dyn Write,
) -> Result<()> {
    match command {
        Commands::Compute(args) => run_compute(workspace, config, args, out),
        Commands::List(args) => run_list(workspace, config, args, out),
        Commands::Show(args) => run_show(workspace, config, args, out),
        Commands::Export(args) => run_export(workspace, config, args, Utc::now(), out),
        Commands::Prune(args) => run_prune(workspace, config, args, out),
    }
}

pub fn run_compute(
    workspace: &Path,
    config: &ConfdriftConfig,
    args: &ComputeArgs,
    out: &mut dyn Write,
) -> Result<()> {
    let scope = tenant_scope(&args.scope)?;
    let older = read_snapshot(&args.from)?;
    let newer = read_snapshot(&args.to)?;

    let events = compute_drift(&scope, &older, &newer).with_context(|| {
        format!(
            "failed to compute drift from {} to {}",
            args.from.display(),
            args.to.display()
        )
    })?;
    let hash = result_set_hash(&events).context("failed to hash drift result set")?;

    let store_summary = if args.persist {
        let store = open_store(workspace, config)?;
        let summary = store
            .store_all(&events)
            .context("failed to persist drift events")?;
        tracing::info!(
            tenant_id = scope.tenant_id(),
            cloud_id = scope.cloud_id(),
            written = summary.written,
            unchanged = summary.unchanged,
            "persisted drift events"
        );
        Some(summary)
    } else {
        None
    };

    write_json(
        out,
        &ComputeReport {
            tenant_id: scope.tenant_id().to_owned(),
            cloud_id: scope.cloud_id().to_owned(),
            from_snapshot_id: older.snapshot_id,
            to_snapshot_id: newer.snapshot_id,
            event_count: events.len(),
            result_set_hash: hash,
            store_summary,
            events,
        },
    )
}

pub fn run_list(
    workspace: &Path,
    config: &ConfdriftConfig,
    args: &ListArgs,
    out: &mut dyn Write,
) -> Result<()> {
    let scope = tenant_scope(&args.scope)?;
    let store = open_store(workspace, config)?;
    let filters = args.filters.to_filters();

    if let Some(snapshot_id) = &args.snapshot {
        let events = store
            .list_by_snapshot(&scope, snapshot_id)
            .with_context(|| format!("failed to list events for snapshot '{snapshot_id}'"))?
            .into_iter()
            .filter(|event| filters.matches(event))
            .collect();
        return write_json(
            out,
            &SnapshotReport {
                snapshot_id: snapshot_id.clone(),
                events,
            },
        );
    }

    let limit = clamp_limit(
        args.limit
            .unwrap_or_else(|| config.list.effective_default_limit()),
    );
    let page = args.page.max(1);
    let result = store
        .list(&scope, &filters, page, limit)
        .context("failed to list drift events")?;

    write_json(
        out,
        &ListReport {
            page,
            limit,
            has_more: result.has_more,
            next_cursor: result.next_cursor,
            events: result.events,
        },
    )
}

pub fn run_show(
    workspace: &Path,
    config: &ConfdriftConfig,
    args: &ShowArgs,
    out: &mut dyn Write,
) -> Result<()> {
    let scope = tenant_scope(&args.scope)?;
    let store = open_store(workspace, config)?;

    let Some(event) = store
        .get_by_id(&scope, &args.event_id)
        .with_context(|| format!("failed to read drift event '{}'", args.event_id))?
    else {
        bail!(
            "drift event '{}' not found for tenant '{}' cloud '{}'",
            args.event_id,
            scope.tenant_id(),
            scope.cloud_id()
        );
    };
    write_json(out, &event)
}

pub fn run_export(
    workspace: &Path,
    config: &ConfdriftConfig,
    args: &ExportArgs,
    now: DateTime<Utc>,
    out: &mut dyn Write,
) -> Result<()> {
    let scope = tenant_scope(&args.scope)?;
    let store = open_store(workspace, config)?;
    let page_size = clamp_limit(
        args.page_size
            .unwrap_or_else(|| config.export.effective_page_size()),
    );

    let document = export_drift(&store, &scope, &args.filters.to_filters(), page_size, now)
        .context("failed to export drift events")?;

    let Some(path) = &args.out else {
        return write_json(out, &document);
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let rendered =
        serde_json::to_string_pretty(&document).context("failed to serialize export")?;
    fs::write(path, rendered)
        .with_context(|| format!("failed to write export to {}", path.display()))?;

    write_json(
        out,
        &ExportReceipt {
            out: path.clone(),
            event_count: document.events.len(),
            integrity_hash: document.integrity_hash,
        },
    )
}

pub fn run_prune(
    workspace: &Path,
    config: &ConfdriftConfig,
    args: &PruneArgs,
    out: &mut dyn Write,
) -> Result<()> {
    let scope = tenant_scope(&args.scope)?;
    let store = open_store(workspace, config)?;
    let deleted = store
        .delete_before(&scope, args.before)
        .context("failed to delete old drift events")?;

    write_json(
        out,
        &PruneReport {
            before: args.before,
            deleted,
        },
    )
}

fn tenant_scope(args: &ScopeArgs) -> Result<TenantScope> {
    TenantScope::new(&args.tenant, &args.cloud).with_context(|| {
        format!(
            "invalid tenant scope tenant='{}' cloud='{}'",
            args.tenant, args.cloud
        )
    })
}

fn open_store(workspace: &Path, config: &ConfdriftConfig) -> Result<SqliteDriftStore> {
    SqliteDriftStore::open_workspace(workspace, &config.store).with_context(|| {
        format!("failed to open drift store under {}", workspace.display())
    })
}

fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    let document: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("snapshot {} is not valid JSON", path.display()))?;
    parse_snapshot(&document)
        .with_context(|| format!("snapshot {} is malformed", path.display()))
}

fn write_json<T: Serialize>(out: &mut dyn Write, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value).context("failed to serialize output")?;
    writeln!(out).context("failed to write output")?;
    Ok(())
}
