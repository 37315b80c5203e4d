use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use confdrift_core::{DriftEvent, DriftFilters, DriftOrderKey, TenantScope};

use super::{
    DriftPage, DriftStore, StoreError, StoreSummary, WriteOutcome, clamp_limit, event_scope,
    index_key, page_offset, record_key, resolve_write, verify_event,
};

/// In-process store with the same contract as `SqliteDriftStore`. Each
/// tenant scope owns an independent shard.
#[derive(Default)]
pub struct MemoryDriftStore {
    shards: RwLock<HashMap<TenantScope, Shard>>,
}

#[derive(Default)]
struct Shard {
    records: HashMap<String, DriftEvent>,
    order: BTreeMap<DriftOrderKey, String>,
    snapshot_index: HashMap<String, BTreeSet<String>>,
}

impl Shard {
    fn insert(&mut self, scope: &TenantScope, event: DriftEvent) {
        let key = record_key(scope, &event.event_id);
        let window = &event.time_window;
        for snapshot_id in [&window.from_snapshot_id, &window.to_snapshot_id] {
            self.snapshot_index
                .entry(index_key(scope, snapshot_id))
                .or_default()
                .insert(key.clone());
        }
        self.order.insert(event.order_key(), key.clone());
        self.records.insert(key, event);
    }

    fn remove(&mut self, scope: &TenantScope, key: &str) {
        let Some(event) = self.records.remove(key) else {
            return;
        };
        self.order.remove(&event.order_key());

        let window = &event.time_window;
        for snapshot_id in [&window.from_snapshot_id, &window.to_snapshot_id] {
            let index = index_key(scope, snapshot_id);
            if let Some(keys) = self.snapshot_index.get_mut(&index) {
                keys.remove(key);
                if keys.is_empty() {
                    self.snapshot_index.remove(&index);
                }
            }
        }
    }

    fn collect_page<'a>(
        &self,
        keys: impl Iterator<Item = &'a String>,
        filters: &DriftFilters,
        skip: u64,
        limit: u32,
    ) -> DriftPage {
        let skip = usize::try_from(skip).unwrap_or(usize::MAX);
        let limit = limit as usize;
        let rows = keys
            .filter_map(|key| self.records.get(key))
            .filter(|event| filters.matches(event))
            .skip(skip)
            .take(limit + 1)
            .cloned()
            .collect::<Vec<_>>();

        DriftPage::from_rows(rows, limit)
    }
}

impl MemoryDriftStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<TenantScope, Shard>>, StoreError> {
        self.shards.read().map_err(poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<TenantScope, Shard>>, StoreError> {
        self.shards.write().map_err(poisoned)
    }
}

fn poisoned<T>(err: PoisonError<T>) -> StoreError {
    StoreError::LockPoisoned(err.to_string())
}

fn stored_event<'a>(
    shards: &'a HashMap<TenantScope, Shard>,
    scope: &TenantScope,
    key: &str,
) -> Option<&'a DriftEvent> {
    shards.get(scope).and_then(|shard| shard.records.get(key))
}

impl DriftStore for MemoryDriftStore {
    fn store(&self, event: &DriftEvent) -> Result<WriteOutcome, StoreError> {
        self.store_all(std::slice::from_ref(event)).map(|summary| {
            if summary.written > 0 {
                WriteOutcome::Written
            } else {
                WriteOutcome::Unchanged
            }
        })
    }

    fn store_all(&self, events: &[DriftEvent]) -> Result<StoreSummary, StoreError> {
        let mut shards = self.write()?;

        // Validate the whole batch before touching any shard.
        let mut pending: Vec<(TenantScope, &DriftEvent)> = Vec::new();
        let mut staged: HashMap<String, &DriftEvent> = HashMap::new();
        let mut summary = StoreSummary::default();
        for event in events {
            verify_event(event)?;
            let scope = event_scope(event)?;
            let key = record_key(&scope, &event.event_id);

            let existing = staged
                .get(&key)
                .copied()
                .or_else(|| stored_event(&shards, &scope, &key));
            let outcome = resolve_write(existing, event)?;
            summary.record(outcome);
            if outcome == WriteOutcome::Written {
                staged.insert(key, event);
                pending.push((scope, event));
            }
        }

        for (scope, event) in pending {
            shards
                .entry(scope.clone())
                .or_default()
                .insert(&scope, event.clone());
        }

        Ok(summary)
    }

    fn get_by_id(
        &self,
        scope: &TenantScope,
        event_id: &str,
    ) -> Result<Option<DriftEvent>, StoreError> {
        let shards = self.read()?;
        let Some(event) = stored_event(&shards, scope, &record_key(scope, event_id.trim())) else {
            return Ok(None);
        };
        verify_event(event)?;
        Ok(Some(event.clone()))
    }

    fn list(
        &self,
        scope: &TenantScope,
        filters: &DriftFilters,
        page: u32,
        limit: u32,
    ) -> Result<DriftPage, StoreError> {
        let limit = clamp_limit(limit);
        let shards = self.read()?;
        let Some(shard) = shards.get(scope) else {
            return Ok(DriftPage::from_rows(Vec::new(), limit as usize));
        };

        Ok(shard.collect_page(
            shard.order.values(),
            filters,
            page_offset(page, limit),
            limit,
        ))
    }

    fn list_after(
        &self,
        scope: &TenantScope,
        filters: &DriftFilters,
        cursor: Option<&DriftOrderKey>,
        limit: u32,
    ) -> Result<DriftPage, StoreError> {
        let limit = clamp_limit(limit);
        let shards = self.read()?;
        let Some(shard) = shards.get(scope) else {
            return Ok(DriftPage::from_rows(Vec::new(), limit as usize));
        };

        let page = match cursor {
            Some(cursor) => shard.collect_page(
                shard
                    .order
                    .range((Bound::Excluded(cursor), Bound::Unbounded))
                    .map(|(_, key)| key),
                filters,
                0,
                limit,
            ),
            None => shard.collect_page(shard.order.values(), filters, 0, limit),
        };
        Ok(page)
    }

    fn list_by_snapshot(
        &self,
        scope: &TenantScope,
        snapshot_id: &str,
    ) -> Result<Vec<DriftEvent>, StoreError> {
        let shards = self.read()?;
        let Some(shard) = shards.get(scope) else {
            return Ok(Vec::new());
        };
        let Some(keys) = shard.snapshot_index.get(&index_key(scope, snapshot_id.trim())) else {
            return Ok(Vec::new());
        };

        let mut events = keys
            .iter()
            .filter_map(|key| shard.records.get(key))
            .cloned()
            .collect::<Vec<_>>();
        confdrift_core::sort_events(&mut events);
        Ok(events)
    }

    fn delete_before(
        &self,
        scope: &TenantScope,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut shards = self.write()?;
        let Some(shard) = shards.get_mut(scope) else {
            return Ok(0);
        };

        let expired = shard
            .records
            .iter()
            .filter(|(_, event)| event.time_window.to_captured_at < cutoff)
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();
        for key in &expired {
            shard.remove(scope, key);
        }

        tracing::info!(
            tenant_id = scope.tenant_id(),
            cloud_id = scope.cloud_id(),
            cutoff = %cutoff,
            deleted = expired.len(),
            "deleted drift events before cutoff"
        );
        Ok(expired.len() as u64)
    }
}
