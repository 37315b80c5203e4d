use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use confdrift_config::{StoreConfig, resolve_store_path};
use confdrift_core::{DriftEvent, DriftFilters, DriftOrderKey, TenantScope, timestamp_sort_key};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use super::{
    DriftPage, DriftStore, StoreError, StoreSummary, WriteOutcome, clamp_limit, event_scope,
    index_key, page_offset, record_key, resolve_write, verify_event,
};

const SELECT_EVENT: &str = "SELECT event_id, canonical_hash, content FROM drift_events";
const LISTING_ORDER: &str = "ORDER BY to_captured_at DESC, object_type ASC, object_id ASC, \
     change_type ASC, classification ASC, event_id ASC";

/// SQLite-backed store. Holds only the database path; every operation opens
/// its own connection.
pub struct SqliteDriftStore {
    sqlite_path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteDriftStore {
    pub fn open(sqlite_path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StoreError> {
        let sqlite_path = sqlite_path.as_ref().to_path_buf();
        if let Some(parent) = sqlite_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&sqlite_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(busy_timeout)?;
        run_migrations(&conn)?;
        drop(conn);

        Ok(Self {
            sqlite_path,
            busy_timeout,
        })
    }

    pub fn open_workspace(
        workspace_root: impl AsRef<Path>,
        config: &StoreConfig,
    ) -> Result<Self, StoreError> {
        Self::open(
            resolve_store_path(workspace_root, config),
            Duration::from_millis(config.busy_timeout_ms),
        )
    }

    pub fn sqlite_path(&self) -> &Path {
        &self.sqlite_path
    }

    fn connection(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.sqlite_path)?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    fn query_page(
        &self,
        scope: &TenantScope,
        filters: &DriftFilters,
        cursor: Option<&DriftOrderKey>,
        limit: u32,
        offset: u64,
    ) -> Result<DriftPage, StoreError> {
        let conn = self.connection()?;
        let sql = format!(
            r#"
            {SELECT_EVENT}
            WHERE tenant_id = ?1
              AND cloud_id = ?2
              AND (?3 IS NULL OR object_type = ?3)
              AND (?4 IS NULL OR classification = ?4)
              AND (?5 IS NULL
                   OR to_captured_at < ?5
                   OR (to_captured_at = ?5 AND (
                       object_type > ?6 OR (object_type = ?6 AND (
                       object_id > ?7 OR (object_id = ?7 AND (
                       change_type > ?8 OR (change_type = ?8 AND (
                       classification > ?9 OR (classification = ?9 AND event_id > ?10)
                   )))))))))
            {LISTING_ORDER}
            LIMIT ?11 OFFSET ?12
            "#
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                scope.tenant_id(),
                scope.cloud_id(),
                filters.object_type.map(|object_type| object_type.as_str()),
                filters
                    .classification
                    .map(|classification| classification.as_str()),
                cursor.map(|key| timestamp_sort_key(&key.to_captured_at)),
                cursor.map(|key| key.object_type.as_str()),
                cursor.map(|key| key.object_id.as_str()),
                cursor.map(|key| key.change_type.as_str()),
                cursor.map(|key| key.classification.as_str()),
                cursor.map(|key| key.event_id.as_str()),
                i64::from(limit) + 1,
                i64::try_from(offset).unwrap_or(i64::MAX),
            ],
            read_raw_row,
        )?;
        let raw = rows.collect::<Result<Vec<_>, _>>()?;
        let events = decode_rows(raw)?;

        Ok(DriftPage::from_rows(events, limit as usize))
    }
}

impl DriftStore for SqliteDriftStore {
    fn store(&self, event: &DriftEvent) -> Result<WriteOutcome, StoreError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = write_event(&tx, event)?;
        tx.commit()?;
        Ok(outcome)
    }

    fn store_all(&self, events: &[DriftEvent]) -> Result<StoreSummary, StoreError> {
        let mut summary = StoreSummary::default();
        if events.is_empty() {
            return Ok(summary);
        }

        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for event in events {
            summary.record(write_event(&tx, event)?);
        }
        tx.commit()?;

        tracing::debug!(
            written = summary.written,
            unchanged = summary.unchanged,
            "stored drift events"
        );
        Ok(summary)
    }

    fn get_by_id(
        &self,
        scope: &TenantScope,
        event_id: &str,
    ) -> Result<Option<DriftEvent>, StoreError> {
        let conn = self.connection()?;
        load_record(&conn, &record_key(scope, event_id.trim()))
    }

    fn list(
        &self,
        scope: &TenantScope,
        filters: &DriftFilters,
        page: u32,
        limit: u32,
    ) -> Result<DriftPage, StoreError> {
        let limit = clamp_limit(limit);
        self.query_page(scope, filters, None, limit, page_offset(page, limit))
    }

    fn list_after(
        &self,
        scope: &TenantScope,
        filters: &DriftFilters,
        cursor: Option<&DriftOrderKey>,
        limit: u32,
    ) -> Result<DriftPage, StoreError> {
        self.query_page(scope, filters, cursor, clamp_limit(limit), 0)
    }

    fn list_by_snapshot(
        &self,
        scope: &TenantScope,
        snapshot_id: &str,
    ) -> Result<Vec<DriftEvent>, StoreError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT e.event_id, e.canonical_hash, e.content
            FROM drift_index i
            JOIN drift_events e ON e.record_key = i.record_key
            WHERE i.index_key = ?1
              AND e.tenant_id = ?2
              AND e.cloud_id = ?3
            ORDER BY e.to_captured_at DESC, e.object_type ASC, e.object_id ASC,
                     e.change_type ASC, e.classification ASC, e.event_id ASC
            "#,
        )?;
        let rows = stmt.query_map(
            params![
                index_key(scope, snapshot_id.trim()),
                scope.tenant_id(),
                scope.cloud_id()
            ],
            read_raw_row,
        )?;
        let raw = rows.collect::<Result<Vec<_>, _>>()?;
        decode_rows(raw)
    }

    fn delete_before(
        &self,
        scope: &TenantScope,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let cutoff_key = timestamp_sort_key(&cutoff);
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            r#"
            DELETE FROM drift_index
            WHERE record_key IN (
                SELECT record_key
                FROM drift_events
                WHERE tenant_id = ?1 AND cloud_id = ?2 AND to_captured_at < ?3
            )
            "#,
            params![scope.tenant_id(), scope.cloud_id(), cutoff_key],
        )?;
        let deleted = tx.execute(
            "DELETE FROM drift_events WHERE tenant_id = ?1 AND cloud_id = ?2 AND to_captured_at < ?3",
            params![scope.tenant_id(), scope.cloud_id(), cutoff_key],
        )?;
        tx.commit()?;

        tracing::info!(
            tenant_id = scope.tenant_id(),
            cloud_id = scope.cloud_id(),
            cutoff = %cutoff_key,
            deleted,
            "deleted drift events before cutoff"
        );
        Ok(deleted as u64)
    }
}

type RawRow = (String, String, String);

fn read_raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn decode_rows(rows: Vec<RawRow>) -> Result<Vec<DriftEvent>, StoreError> {
    rows.into_iter()
        .map(|(event_id, stored_hash, content)| decode_record(&event_id, &stored_hash, &content))
        .collect()
}

/// Parses a stored row and checks it against the hash recorded at write time.
fn decode_record(
    event_id: &str,
    stored_hash: &str,
    content: &str,
) -> Result<DriftEvent, StoreError> {
    let event: DriftEvent = serde_json::from_str(content)?;
    if event.event_id != event_id {
        return Err(StoreError::InvalidRecord(format!(
            "row {event_id} holds content for {}",
            event.event_id
        )));
    }

    let recomputed = event.compute_hash()?;
    if recomputed != stored_hash || event.canonical_hash != stored_hash {
        tracing::warn!(
            event_id,
            stored = stored_hash,
            recomputed = %recomputed,
            "stored drift event failed hash verification"
        );
        return Err(StoreError::HashMismatch {
            event_id: event_id.to_owned(),
            stored: stored_hash.to_owned(),
            recomputed,
        });
    }

    Ok(event)
}

fn load_record(conn: &Connection, key: &str) -> Result<Option<DriftEvent>, StoreError> {
    let raw = conn
        .query_row(
            &format!("{SELECT_EVENT} WHERE record_key = ?1"),
            params![key],
            read_raw_row,
        )
        .optional()?;

    raw.map(|(event_id, stored_hash, content)| decode_record(&event_id, &stored_hash, &content))
        .transpose()
}

fn write_event(conn: &Connection, event: &DriftEvent) -> Result<WriteOutcome, StoreError> {
    verify_event(event)?;
    let scope = event_scope(event)?;
    let key = record_key(&scope, &event.event_id);

    let existing = load_record(conn, &key)?;
    let outcome = resolve_write(existing.as_ref(), event)?;
    if outcome == WriteOutcome::Unchanged {
        return Ok(outcome);
    }

    let window = &event.time_window;
    conn.execute(
        r#"
        INSERT INTO drift_events (
            record_key, tenant_id, cloud_id, event_id, object_type, object_id, change_type,
            classification, from_snapshot_id, to_snapshot_id, to_captured_at, canonical_hash, content
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
        params![
            key,
            scope.tenant_id(),
            scope.cloud_id(),
            event.event_id,
            event.object_type.as_str(),
            event.object_id,
            event.change_type.as_str(),
            event.classification.as_str(),
            window.from_snapshot_id,
            window.to_snapshot_id,
            timestamp_sort_key(&window.to_captured_at),
            event.canonical_hash,
            serde_json::to_string(event)?,
        ],
    )?;

    for snapshot_id in [&window.from_snapshot_id, &window.to_snapshot_id] {
        conn.execute(
            "INSERT OR IGNORE INTO drift_index (index_key, record_key) VALUES (?1, ?2)",
            params![index_key(&scope, snapshot_id), key],
        )?;
    }

    Ok(outcome)
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS drift_events (
            record_key TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            cloud_id TEXT NOT NULL,
            event_id TEXT NOT NULL,
            object_type TEXT NOT NULL,
            object_id TEXT NOT NULL,
            change_type TEXT NOT NULL,
            classification TEXT NOT NULL,
            from_snapshot_id TEXT NOT NULL,
            to_snapshot_id TEXT NOT NULL,
            to_captured_at TEXT NOT NULL,
            canonical_hash TEXT NOT NULL,
            content TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_drift_events_listing
            ON drift_events(
                tenant_id, cloud_id, to_captured_at DESC, object_type, object_id,
                change_type, classification, event_id
            );

        CREATE TABLE IF NOT EXISTS drift_index (
            index_key TEXT NOT NULL,
            record_key TEXT NOT NULL,
            PRIMARY KEY (index_key, record_key)
        );

        CREATE INDEX IF NOT EXISTS idx_drift_index_record ON drift_index(record_key);
        "#,
    )?;

    Ok(())
}
