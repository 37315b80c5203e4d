use chrono::{DateTime, Utc};
use confdrift_canon::CanonicalError;
use confdrift_core::{DriftEvent, DriftFilters, DriftOrderKey, ScopeError, TenantScope};
use serde::Serialize;
use thiserror::Error;

mod memory;
mod sqlite;

pub use confdrift_config::MAX_PAGE_LIMIT;
pub use memory::MemoryDriftStore;
pub use sqlite::SqliteDriftStore;

pub const RECORD_KEY_PREFIX: &str = "drift";
pub const INDEX_KEY_PREFIX: &str = "drift_index";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("canonicalization failed: {0}")]
    Canonical(#[from] CanonicalError),
    #[error("invalid tenant scope: {0}")]
    Scope(#[from] ScopeError),
    #[error("hash mismatch for drift event {event_id}: stored {stored}, recomputed {recomputed}")]
    HashMismatch {
        event_id: String,
        stored: String,
        recomputed: String,
    },
    #[error("drift event {event_id} already exists with different content")]
    ConflictingWrite { event_id: String },
    #[error("invalid drift record: {0}")]
    InvalidRecord(String),
    #[error("store lock poisoned: {0}")]
    LockPoisoned(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    Written,
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub written: usize,
    pub unchanged: usize,
}

impl StoreSummary {
    fn record(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Written => self.written += 1,
            WriteOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// One page of events in listing order. `next_cursor` is the order key of the
/// last event and is only set when more rows follow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftPage {
    pub events: Vec<DriftEvent>,
    pub has_more: bool,
    pub next_cursor: Option<DriftOrderKey>,
}

impl DriftPage {
    /// Builds a page from up to `limit + 1` rows already in listing order.
    fn from_rows(mut rows: Vec<DriftEvent>, limit: usize) -> Self {
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let next_cursor = if has_more {
            rows.last().map(DriftEvent::order_key)
        } else {
            None
        };

        Self {
            events: rows,
            has_more,
            next_cursor,
        }
    }
}

/// Persistent, tenant-isolated drift event storage. Events are immutable once
/// written; the only removal path is `delete_before`.
pub trait DriftStore: Send + Sync {
    fn store(&self, event: &DriftEvent) -> Result<WriteOutcome, StoreError>;

    /// Writes every event or none of them.
    fn store_all(&self, events: &[DriftEvent]) -> Result<StoreSummary, StoreError>;

    fn get_by_id(
        &self,
        scope: &TenantScope,
        event_id: &str,
    ) -> Result<Option<DriftEvent>, StoreError>;

    /// Offset pagination. `page` is 1-based and 0 reads as 1.
    fn list(
        &self,
        scope: &TenantScope,
        filters: &DriftFilters,
        page: u32,
        limit: u32,
    ) -> Result<DriftPage, StoreError>;

    /// Keyset pagination: events strictly after `cursor` in listing order, or
    /// from the start when `cursor` is `None`.
    fn list_after(
        &self,
        scope: &TenantScope,
        filters: &DriftFilters,
        cursor: Option<&DriftOrderKey>,
        limit: u32,
    ) -> Result<DriftPage, StoreError>;

    /// Events whose window starts or ends at `snapshot_id`.
    fn list_by_snapshot(
        &self,
        scope: &TenantScope,
        snapshot_id: &str,
    ) -> Result<Vec<DriftEvent>, StoreError>;

    /// Removes events whose `to_captured_at` is strictly before `cutoff`.
    fn delete_before(&self, scope: &TenantScope, cutoff: DateTime<Utc>)
    -> Result<u64, StoreError>;
}

pub fn scope_prefix(scope: &TenantScope) -> String {
    format!(
        "{RECORD_KEY_PREFIX}:{}:{}:",
        scope.tenant_id(),
        scope.cloud_id()
    )
}

pub fn record_key(scope: &TenantScope, event_id: &str) -> String {
    format!("{}{event_id}", scope_prefix(scope))
}

pub fn index_key(scope: &TenantScope, snapshot_id: &str) -> String {
    format!(
        "{INDEX_KEY_PREFIX}:{}:{}:{snapshot_id}",
        scope.tenant_id(),
        scope.cloud_id()
    )
}

pub fn clamp_limit(limit: u32) -> u32 {
    limit.clamp(1, MAX_PAGE_LIMIT)
}

fn page_offset(page: u32, limit: u32) -> u64 {
    u64::from(page.max(1) - 1) * u64::from(limit)
}

fn event_scope(event: &DriftEvent) -> Result<TenantScope, StoreError> {
    let scope = TenantScope::new(event.tenant_id.as_str(), event.cloud_id.as_str())?;
    if !event.belongs_to(&scope) {
        return Err(StoreError::InvalidRecord(format!(
            "drift event {} carries untrimmed tenant or cloud id",
            event.event_id
        )));
    }
    Ok(scope)
}

fn verify_event(event: &DriftEvent) -> Result<(), StoreError> {
    let recomputed = event.compute_hash()?;
    if recomputed != event.canonical_hash {
        tracing::warn!(
            event_id = %event.event_id,
            stored = %event.canonical_hash,
            recomputed = %recomputed,
            "drift event hash mismatch"
        );
        return Err(StoreError::HashMismatch {
            event_id: event.event_id.clone(),
            stored: event.canonical_hash.clone(),
            recomputed,
        });
    }
    Ok(())
}

/// Outcome of writing `incoming` where `existing` may already hold the key.
fn resolve_write(
    existing: Option<&DriftEvent>,
    incoming: &DriftEvent,
) -> Result<WriteOutcome, StoreError> {
    match existing {
        None => Ok(WriteOutcome::Written),
        Some(existing) if existing.canonical_hash == incoming.canonical_hash => {
            Ok(WriteOutcome::Unchanged)
        }
        Some(_) => {
            tracing::warn!(
                event_id = %incoming.event_id,
                "rejected conflicting drift event write"
            );
            Err(StoreError::ConflictingWrite {
                event_id: incoming.event_id.clone(),
            })
        }
    }
}
