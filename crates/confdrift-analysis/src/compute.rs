use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDateTime, Utc};
use confdrift_canon::{CanonicalError, canonicalize};
use confdrift_core::{
    ChangeType, DriftEvent, DriftEventDraft, EventError, MissingDataReference, ObjectType,
    Snapshot, TenantScope, TimeWindow, classify, score_completeness, sort_events,
};
use serde_json::{Value, json};
use thiserror::Error;

use crate::extract::{ExtractError, MissingDataEntry, extract, extract_missing_data};
use crate::patch::diff_states;

#[derive(Debug, Error)]
pub enum DriftComputationError {
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

impl DriftComputationError {
    fn invalid(snapshot_id: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidSnapshot(format!("snapshot '{snapshot_id}': {reason}"))
    }
}

/// Reads a snapshot document `{snapshot_id, captured_at, payload}`.
///
/// `captured_at` is RFC 3339; a timestamp without offset is taken as UTC.
pub fn parse_snapshot(document: &Value) -> Result<Snapshot, DriftComputationError> {
    let Some(object) = document.as_object() else {
        return Err(DriftComputationError::InvalidSnapshot(
            "snapshot document must be a JSON object".to_owned(),
        ));
    };

    let snapshot_id = object
        .get("snapshot_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            DriftComputationError::InvalidSnapshot(
                "snapshot_id must be a non-empty string".to_owned(),
            )
        })?
        .to_owned();

    let captured_at = object
        .get("captured_at")
        .and_then(Value::as_str)
        .ok_or_else(|| DriftComputationError::invalid(&snapshot_id, "captured_at is missing"))?;
    let captured_at = parse_timestamp(captured_at).ok_or_else(|| {
        DriftComputationError::invalid(
            &snapshot_id,
            format!("captured_at '{captured_at}' is not an ISO-8601 timestamp"),
        )
    })?;

    let payload = match object.get("payload") {
        Some(payload @ Value::Object(_)) => payload.clone(),
        _ => {
            return Err(DriftComputationError::invalid(
                &snapshot_id,
                "payload must be a JSON object",
            ));
        }
    };

    Ok(Snapshot {
        snapshot_id,
        captured_at,
        payload,
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Every difference between `older` and `newer` for one tenant scope, sealed
/// and in listing order. Either the full list is returned or nothing.
pub fn compute_drift(
    scope: &TenantScope,
    older: &Snapshot,
    newer: &Snapshot,
) -> Result<Vec<DriftEvent>, DriftComputationError> {
    check_snapshot(older)?;
    check_snapshot(newer)?;

    let window = TimeWindow::between(older, newer);
    let missing_older = extract_missing_data(&older.payload)
        .map_err(|err| extract_failure(older, err))?;
    let missing_newer = extract_missing_data(&newer.payload)
        .map_err(|err| extract_failure(newer, err))?;

    let mut events = Vec::new();
    for object_type in ObjectType::EXTRACTED {
        let before = extract(&older.payload, object_type)
            .map_err(|err| extract_failure(older, err))?;
        let after = extract(&newer.payload, object_type)
            .map_err(|err| extract_failure(newer, err))?;
        let references = object_type
            .dataset()
            .map(|dataset| missing_references(dataset, &missing_older, &missing_newer))
            .unwrap_or_default();

        let keys = before.keys().chain(after.keys()).collect::<BTreeSet<_>>();
        for key in keys {
            let draft = match (before.get(key), after.get(key)) {
                (None, Some(after_state)) => {
                    object_draft(object_type, key, None, Some(after_state), &window, &references)
                }
                (Some(before_state), None) => {
                    object_draft(object_type, key, Some(before_state), None, &window, &references)
                }
                (Some(before_state), Some(after_state)) => {
                    if canonicalize(before_state).map_err(hash_failure)?
                        == canonicalize(after_state).map_err(hash_failure)?
                    {
                        continue;
                    }
                    object_draft(
                        object_type,
                        key,
                        Some(before_state),
                        Some(after_state),
                        &window,
                        &references,
                    )
                }
                (None, None) => continue,
            }
            .map_err(hash_failure)?;
            events.push(seal(scope, draft)?);
        }
    }

    let visibility = visibility_events(scope, &window, &missing_older, &missing_newer)?;
    let visibility_count = visibility.len();
    events.extend(visibility);

    sort_events(&mut events);
    tracing::debug!(
        tenant_id = scope.tenant_id(),
        cloud_id = scope.cloud_id(),
        from_snapshot_id = %window.from_snapshot_id,
        to_snapshot_id = %window.to_snapshot_id,
        events = events.len(),
        visibility_events = visibility_count,
        "computed drift"
    );
    Ok(events)
}

fn check_snapshot(snapshot: &Snapshot) -> Result<(), DriftComputationError> {
    if snapshot.snapshot_id.trim().is_empty() {
        return Err(DriftComputationError::InvalidSnapshot(
            "snapshot_id must be non-empty".to_owned(),
        ));
    }
    if !snapshot.payload.is_object() {
        return Err(DriftComputationError::invalid(
            &snapshot.snapshot_id,
            "payload must be a JSON object",
        ));
    }
    Ok(())
}

fn extract_failure(snapshot: &Snapshot, err: ExtractError) -> DriftComputationError {
    DriftComputationError::invalid(&snapshot.snapshot_id, err)
}

fn hash_failure(err: CanonicalError) -> DriftComputationError {
    DriftComputationError::InvalidSnapshot(format!("canonicalization failed: {err}"))
}

fn seal(scope: &TenantScope, draft: DriftEventDraft) -> Result<DriftEvent, DriftComputationError> {
    DriftEvent::seal(scope, draft).map_err(|err| match err {
        EventError::Canonical(err) => hash_failure(err),
        other => DriftComputationError::InvalidSnapshot(other.to_string()),
    })
}

fn object_draft(
    object_type: ObjectType,
    object_id: &str,
    before_state: Option<&Value>,
    after_state: Option<&Value>,
    window: &TimeWindow,
    references: &[MissingDataReference],
) -> Result<DriftEventDraft, CanonicalError> {
    let change_type = match (before_state, after_state) {
        (None, _) => ChangeType::Added,
        (_, None) => ChangeType::Removed,
        _ => ChangeType::Modified,
    };
    let change_patch = match (before_state, after_state) {
        (Some(before), Some(after)) => Some(diff_states(before, after)?),
        _ => None,
    };

    Ok(DriftEventDraft {
        object_type,
        object_id: object_id.to_owned(),
        change_type,
        classification: classify(object_type, change_type),
        before_state: before_state.cloned(),
        after_state: after_state.cloned(),
        change_patch,
        time_window: window.clone(),
        completeness_percent: score_completeness(
            before_state.is_some(),
            after_state.is_some(),
            references.len(),
        ),
        missing_data_reference: (!references.is_empty()).then(|| references.to_vec()),
    })
}

/// Declared entries from either snapshot for `dataset`, deduplicated.
fn missing_references(
    dataset: &str,
    older: &[MissingDataEntry],
    newer: &[MissingDataEntry],
) -> Vec<MissingDataReference> {
    older
        .iter()
        .chain(newer)
        .filter(|entry| entry.dataset == dataset)
        .map(MissingDataReference::from)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// One `scope` event per dataset whose declared availability flipped.
fn visibility_events(
    scope: &TenantScope,
    window: &TimeWindow,
    older: &[MissingDataEntry],
    newer: &[MissingDataEntry],
) -> Result<Vec<DriftEvent>, DriftComputationError> {
    let older_reasons = reasons_by_dataset(older);
    let newer_reasons = reasons_by_dataset(newer);
    let datasets = older_reasons
        .keys()
        .chain(newer_reasons.keys())
        .collect::<BTreeSet<_>>();

    let mut events = Vec::new();
    for dataset in datasets {
        let was_missing = older_reasons.get(dataset);
        let is_missing = newer_reasons.get(dataset);
        if was_missing.is_some() == is_missing.is_some() {
            continue;
        }

        let before_state = availability_state(dataset, was_missing);
        let after_state = availability_state(dataset, is_missing);
        let change_patch = diff_states(&before_state, &after_state).map_err(hash_failure)?;
        let references = missing_references(dataset, older, newer);

        let draft = DriftEventDraft {
            object_type: ObjectType::Scope,
            object_id: (*dataset).to_owned(),
            change_type: ChangeType::Modified,
            classification: classify(ObjectType::Scope, ChangeType::Modified),
            before_state: Some(before_state),
            after_state: Some(after_state),
            change_patch: Some(change_patch),
            time_window: window.clone(),
            completeness_percent: score_completeness(true, true, references.len()),
            missing_data_reference: Some(references),
        };
        events.push(seal(scope, draft)?);
    }

    Ok(events)
}

fn reasons_by_dataset(entries: &[MissingDataEntry]) -> BTreeMap<&str, Vec<&str>> {
    let mut reasons: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for entry in entries {
        reasons
            .entry(entry.dataset.as_str())
            .or_default()
            .push(entry.reason_code.as_str());
    }
    reasons
}

fn availability_state(dataset: &str, missing_reasons: Option<&Vec<&str>>) -> Value {
    match missing_reasons {
        Some(reasons) => json!({
            "dataset": dataset,
            "available": false,
            "reason_codes": reasons,
        }),
        None => json!({
            "dataset": dataset,
            "available": true,
        }),
    }
}
