use std::ffi::OsStr;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use confdrift_config::LogFormat;
use confdrift_core::{Classification, DriftFilters, ObjectType};

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ScopeArgs {
    #[arg(long, help = "Tenant identifier")]
    pub tenant: String,

    #[arg(long, help = "Cloud (site) identifier within the tenant")]
    pub cloud: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct FilterArgs {
    #[arg(
        long,
        value_parser = parse_object_type,
        help = "Only events for this object type: field, workflow, automation_rule, project, scope"
    )]
    pub object_type: Option<ObjectType>,

    #[arg(
        long,
        value_parser = parse_classification,
        help = "Only events with this classification, e.g. CONFIG_CHANGE"
    )]
    pub classification: Option<Classification>,
}

impl FilterArgs {
    pub fn to_filters(&self) -> DriftFilters {
        DriftFilters {
            object_type: self.object_type,
            classification: self.classification,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ComputeArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    #[arg(long, help = "Older snapshot document (JSON file)")]
    pub from: PathBuf,

    #[arg(long, help = "Newer snapshot document (JSON file)")]
    pub to: PathBuf,

    #[arg(long, help = "Write the computed events to the workspace store")]
    pub persist: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    #[command(flatten)]
    pub filters: FilterArgs,

    #[arg(long, default_value_t = 1, help = "1-based page number")]
    pub page: u32,

    #[arg(
        long,
        help = "Page size (defaults to [list].default_limit, clamped to 1..500)"
    )]
    pub limit: Option<u32>,

    #[arg(
        long,
        conflicts_with_all = ["page", "limit"],
        help = "List every event whose time window references this snapshot"
    )]
    pub snapshot: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ShowArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    #[arg(help = "Event id, e.g. drift_0123...")]
    pub event_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    #[command(flatten)]
    pub filters: FilterArgs,

    #[arg(
        long,
        help = "Events fetched per store read (defaults to [export].page_size)"
    )]
    pub page_size: Option<u32>,

    #[arg(long, help = "Write the export document here instead of stdout")]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct PruneArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    #[arg(
        long,
        value_parser = parse_timestamp,
        help = "Delete events whose window ends before this RFC 3339 instant"
    )]
    pub before: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Compute drift between two snapshot documents
    Compute(ComputeArgs),
    /// List stored drift events in listing order
    List(ListArgs),
    /// Print one stored drift event
    Show(ShowArgs),
    /// Export every matching event as one document
    Export(ExportArgs),
    /// Delete events older than a cutoff
    Prune(PruneArgs),
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "Configuration drift engine")]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = ".",
        help = "Workspace root holding .confdrift/"
    )]
    pub workspace: PathBuf,

    #[arg(
        long,
        global = true,
        value_parser = parse_log_format,
        help = "Log format: human or json (defaults to [logging].format)"
    )]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

pub fn parse_cli() -> Cli {
    let mut args: Vec<_> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == OsStr::new("--")) {
        args.remove(1);
    }

    Cli::parse_from(args)
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse()
}

fn parse_object_type(value: &str) -> Result<ObjectType, String> {
    value.parse()
}

fn parse_classification(value: &str) -> Result<Classification, String> {
    value.parse()
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| format!("invalid RFC 3339 timestamp '{value}': {err}"))
}
