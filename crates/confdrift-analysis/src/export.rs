use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use confdrift_canon::CanonicalError;
use confdrift_core::{
    DRIFT_SCHEMA_VERSION, DriftEvent, DriftFilters, MissingDataReference, TenantScope,
    result_set_hash,
};
use confdrift_store::{DriftStore, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub events: Vec<DriftEvent>,
    pub export_timestamp: DateTime<Utc>,
    pub schema_version: String,
    pub filters_used: DriftFilters,
    pub missing_data_disclosure: String,
    /// `result_set_hash` of `events`, in the order given.
    pub integrity_hash: String,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("canonicalization failed: {0}")]
    Canonical(#[from] CanonicalError),
}

/// Collects every event matching `filters`, in list order, by walking the
/// store with keyset pages of `page_size`.
pub fn export_drift(
    store: &dyn DriftStore,
    scope: &TenantScope,
    filters: &DriftFilters,
    page_size: u32,
    now: DateTime<Utc>,
) -> Result<ExportDocument, ExportError> {
    let mut events = Vec::new();
    let mut cursor = None;
    let mut pages = 0usize;
    loop {
        let page = store.list_after(scope, filters, cursor.as_ref(), page_size)?;
        pages += 1;
        events.extend(page.events);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    let integrity_hash = result_set_hash(&events)?;
    let missing_data_disclosure = disclosure(&events);
    tracing::debug!(
        tenant_id = scope.tenant_id(),
        cloud_id = scope.cloud_id(),
        events = events.len(),
        pages,
        "exported drift events"
    );

    Ok(ExportDocument {
        events,
        export_timestamp: now,
        schema_version: DRIFT_SCHEMA_VERSION.to_owned(),
        filters_used: filters.clone(),
        missing_data_disclosure,
        integrity_hash,
    })
}

fn disclosure(events: &[DriftEvent]) -> String {
    let references = events
        .iter()
        .filter_map(|event| event.missing_data_reference.as_deref())
        .flatten()
        .collect::<BTreeSet<&MissingDataReference>>();

    if references.is_empty() {
        return "No dataset was declared unavailable for the exported events. Actor and source \
                are never inferred and are reported as unknown."
            .to_owned();
    }

    let listed = references
        .iter()
        .map(|reference| format!("{} ({})", reference.dataset, reference.reason_code))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Some exported events were computed while datasets were declared unavailable: {listed}. \
         Their completeness_percent reflects the gap. Actor and source are never inferred and \
         are reported as unknown."
    )
}
