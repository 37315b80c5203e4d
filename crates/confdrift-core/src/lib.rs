use chrono::{DateTime, Utc};
use confdrift_canon::{CanonicalError, canonical_hash, canonical_hash_of};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

mod classify;
mod completeness;
mod order;
mod scope;

pub use classify::{classify, classify_raw};
pub use completeness::score_completeness;
pub use order::{DriftOrderKey, compare_events, sort_events, timestamp_sort_key};
pub use scope::{ScopeError, TenantScope};

pub const DRIFT_SCHEMA_VERSION: &str = "1.0";
pub const EVENT_ID_PREFIX: &str = "drift_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Field,
    Workflow,
    AutomationRule,
    Project,
    Scope,
}

impl ObjectType {
    /// Object types read directly out of a snapshot payload.
    pub const EXTRACTED: [ObjectType; 4] = [
        Self::Field,
        Self::Workflow,
        Self::AutomationRule,
        Self::Project,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Field => "field",
            Self::Workflow => "workflow",
            Self::AutomationRule => "automation_rule",
            Self::Project => "project",
            Self::Scope => "scope",
        }
    }

    /// Dataset name used for this type in payload collections and in
    /// missing-data declarations. `Scope` events name their dataset in
    /// `object_id` instead.
    pub fn dataset(self) -> Option<&'static str> {
        match self {
            Self::Field => Some("fields"),
            Self::Workflow => Some("workflows"),
            Self::AutomationRule => Some("automation_rules"),
            Self::Project => Some("projects"),
            Self::Scope => None,
        }
    }
}

impl std::str::FromStr for ObjectType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "field" => Ok(Self::Field),
            "workflow" => Ok(Self::Workflow),
            "automation_rule" => Ok(Self::AutomationRule),
            "project" => Ok(Self::Project),
            "scope" => Ok(Self::Scope),
            other => Err(format!(
                "invalid object type '{other}', expected one of: field, workflow, automation_rule, project, scope"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Modified => "modified",
        }
    }
}

impl std::str::FromStr for ChangeType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "added" => Ok(Self::Added),
            "removed" => Ok(Self::Removed),
            "modified" => Ok(Self::Modified),
            other => Err(format!(
                "invalid change type '{other}', expected one of: added, removed, modified"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Structural,
    ConfigChange,
    DataVisibilityChange,
    Unknown,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Structural => "STRUCTURAL",
            Self::ConfigChange => "CONFIG_CHANGE",
            Self::DataVisibilityChange => "DATA_VISIBILITY_CHANGE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::str::FromStr for Classification {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "STRUCTURAL" => Ok(Self::Structural),
            "CONFIG_CHANGE" => Ok(Self::ConfigChange),
            "DATA_VISIBILITY_CHANGE" => Ok(Self::DataVisibilityChange),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(format!(
                "invalid classification '{other}', expected one of: STRUCTURAL, CONFIG_CHANGE, DATA_VISIBILITY_CHANGE, UNKNOWN"
            )),
        }
    }
}

/// Who or what caused a change. The engine never infers this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorConfidence {
    #[default]
    None,
}

/// An immutable configuration capture, produced upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: String,
    pub captured_at: DateTime<Utc>,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from_snapshot_id: String,
    pub from_captured_at: DateTime<Utc>,
    pub to_snapshot_id: String,
    pub to_captured_at: DateTime<Utc>,
}

impl TimeWindow {
    pub fn between(older: &Snapshot, newer: &Snapshot) -> Self {
        Self {
            from_snapshot_id: older.snapshot_id.clone(),
            from_captured_at: older.captured_at,
            to_snapshot_id: newer.snapshot_id.clone(),
            to_captured_at: newer.captured_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MissingDataReference {
    pub dataset: String,
    pub reason_code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
}

/// One attribute-level difference inside a `modified` event. `path` joins
/// object keys with `.`; the empty path addresses the whole state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftEvent {
    pub event_id: String,
    pub tenant_id: String,
    pub cloud_id: String,
    pub object_type: ObjectType,
    pub object_id: String,
    pub change_type: ChangeType,
    pub classification: Classification,
    pub before_state: Option<Value>,
    pub after_state: Option<Value>,
    pub change_patch: Option<Vec<PatchOperation>>,
    pub time_window: TimeWindow,
    pub actor: Provenance,
    pub source: Provenance,
    pub actor_confidence: ActorConfidence,
    pub completeness_percent: u8,
    pub missing_data_reference: Option<Vec<MissingDataReference>>,
    pub canonical_hash: String,
    pub schema_version: String,
}

/// Everything needed to seal a `DriftEvent`; identity and hash are derived.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftEventDraft {
    pub object_type: ObjectType,
    pub object_id: String,
    pub change_type: ChangeType,
    pub classification: Classification,
    pub before_state: Option<Value>,
    pub after_state: Option<Value>,
    pub change_patch: Option<Vec<PatchOperation>>,
    pub time_window: TimeWindow,
    pub completeness_percent: u8,
    pub missing_data_reference: Option<Vec<MissingDataReference>>,
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("canonicalization failed: {0}")]
    Canonical(#[from] CanonicalError),
    #[error("inconsistent drift event for {object_type}:{object_id}: {reason}")]
    Inconsistent {
        object_type: &'static str,
        object_id: String,
        reason: String,
    },
}

impl DriftEvent {
    /// Builds the event, checks the state/patch presence rules, derives the
    /// event id and computes the canonical hash.
    pub fn seal(scope: &TenantScope, draft: DriftEventDraft) -> Result<Self, EventError> {
        check_presence(&draft)?;

        let event_id = derive_event_id(
            scope,
            &draft.time_window,
            draft.object_type,
            &draft.object_id,
            draft.change_type,
        )?;
        let mut event = Self {
            event_id,
            tenant_id: scope.tenant_id().to_owned(),
            cloud_id: scope.cloud_id().to_owned(),
            object_type: draft.object_type,
            object_id: draft.object_id,
            change_type: draft.change_type,
            classification: draft.classification,
            before_state: draft.before_state,
            after_state: draft.after_state,
            change_patch: draft.change_patch,
            time_window: draft.time_window,
            actor: Provenance::Unknown,
            source: Provenance::Unknown,
            actor_confidence: ActorConfidence::None,
            completeness_percent: draft.completeness_percent.min(100),
            missing_data_reference: draft.missing_data_reference,
            canonical_hash: String::new(),
            schema_version: DRIFT_SCHEMA_VERSION.to_owned(),
        };
        event.canonical_hash = event.compute_hash()?;
        Ok(event)
    }

    /// SHA-256 over the canonical event, excluding `canonical_hash` and
    /// `event_id`.
    pub fn compute_hash(&self) -> Result<String, CanonicalError> {
        let value = serde_json::to_value(self)?;
        hash_event_value(value)
    }

    pub fn verify_hash(&self) -> Result<bool, CanonicalError> {
        Ok(self.compute_hash()? == self.canonical_hash)
    }

    pub fn belongs_to(&self, scope: &TenantScope) -> bool {
        self.tenant_id == scope.tenant_id() && self.cloud_id == scope.cloud_id()
    }

    pub fn order_key(&self) -> DriftOrderKey {
        DriftOrderKey::from(self)
    }
}

/// Hashes a serialized event the same way `DriftEvent::compute_hash` does.
/// Useful for verifying records that were edited outside the typed model.
pub fn hash_event_value(mut value: Value) -> Result<String, CanonicalError> {
    if let Value::Object(map) = &mut value {
        map.remove("canonical_hash");
        map.remove("event_id");
    }
    canonical_hash(&value)
}

/// Integrity hash of an ordered result set, covering every field of every
/// event including ids and per-event hashes.
pub fn result_set_hash(events: &[DriftEvent]) -> Result<String, CanonicalError> {
    canonical_hash_of(events)
}

pub fn derive_event_id(
    scope: &TenantScope,
    window: &TimeWindow,
    object_type: ObjectType,
    object_id: &str,
    change_type: ChangeType,
) -> Result<String, CanonicalError> {
    let material = [
        scope.tenant_id(),
        scope.cloud_id(),
        window.from_snapshot_id.as_str(),
        window.to_snapshot_id.as_str(),
        object_type.as_str(),
        object_id,
        change_type.as_str(),
    ];
    let digest = canonical_hash_of(&material)?;
    Ok(format!("{EVENT_ID_PREFIX}{}", &digest[..32]))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<ObjectType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
}

impl DriftFilters {
    pub fn matches(&self, event: &DriftEvent) -> bool {
        self.object_type
            .is_none_or(|object_type| object_type == event.object_type)
            && self
                .classification
                .is_none_or(|classification| classification == event.classification)
    }
}

fn check_presence(draft: &DriftEventDraft) -> Result<(), EventError> {
    let inconsistent = |reason: &str| EventError::Inconsistent {
        object_type: draft.object_type.as_str(),
        object_id: draft.object_id.clone(),
        reason: reason.to_owned(),
    };

    let added = draft.change_type == ChangeType::Added;
    let removed = draft.change_type == ChangeType::Removed;
    let modified = draft.change_type == ChangeType::Modified;

    if draft.before_state.is_none() != added {
        return Err(inconsistent("before_state must be null exactly when added"));
    }
    if draft.after_state.is_none() != removed {
        return Err(inconsistent("after_state must be null exactly when removed"));
    }
    if draft.change_patch.is_some() != modified {
        return Err(inconsistent("change_patch must be present exactly when modified"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn window() -> TimeWindow {
        TimeWindow {
            from_snapshot_id: "snap-1".to_owned(),
            from_captured_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            to_snapshot_id: "snap-2".to_owned(),
            to_captured_at: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        }
    }

    fn scope() -> TenantScope {
        TenantScope::new("tenant-a", "cloud-a").expect("scope")
    }

    fn added_draft() -> DriftEventDraft {
        DriftEventDraft {
            object_type: ObjectType::Field,
            object_id: "custom_1".to_owned(),
            change_type: ChangeType::Added,
            classification: Classification::Structural,
            before_state: None,
            after_state: Some(json!({"id": "custom_1", "type": "text"})),
            change_patch: None,
            time_window: window(),
            completeness_percent: 50,
            missing_data_reference: None,
        }
    }

    #[test]
    fn seal_derives_stable_id_and_hash() {
        let first = DriftEvent::seal(&scope(), added_draft()).expect("seal first");
        let second = DriftEvent::seal(&scope(), added_draft()).expect("seal second");

        assert_eq!(first, second);
        assert!(first.event_id.starts_with(EVENT_ID_PREFIX));
        assert_eq!(first.event_id.len(), EVENT_ID_PREFIX.len() + 32);
        assert_eq!(first.canonical_hash.len(), 64);
        assert!(first.verify_hash().expect("verify"));
    }

    #[test]
    fn seal_rejects_inconsistent_presence() {
        let mut draft = added_draft();
        draft.before_state = Some(json!({}));
        let err = DriftEvent::seal(&scope(), draft).expect_err("expected error");
        assert!(matches!(err, EventError::Inconsistent { .. }));

        let mut draft = added_draft();
        draft.change_patch = Some(Vec::new());
        assert!(DriftEvent::seal(&scope(), draft).is_err());
    }

    #[test]
    fn provenance_fields_are_always_unknown() {
        let event = DriftEvent::seal(&scope(), added_draft()).expect("seal");
        let value = serde_json::to_value(&event).expect("serialize");

        assert_eq!(value["actor"], json!("unknown"));
        assert_eq!(value["source"], json!("unknown"));
        assert_eq!(value["actor_confidence"], json!("none"));
        assert_eq!(value["classification"], json!("STRUCTURAL"));
        assert_eq!(value["before_state"], Value::Null);
    }

    #[test]
    fn provenance_rejects_inferred_actor_on_deserialize() {
        let event = DriftEvent::seal(&scope(), added_draft()).expect("seal");
        let mut value = serde_json::to_value(&event).expect("serialize");
        value["actor"] = json!("jane");

        assert!(serde_json::from_value::<DriftEvent>(value).is_err());
    }

    #[test]
    fn hash_tracks_single_field_mutation_and_revert() {
        let event = DriftEvent::seal(&scope(), added_draft()).expect("seal");
        let original = event.canonical_hash.clone();

        let mut value = serde_json::to_value(&event).expect("serialize");
        value["completeness_percent"] = json!(0);
        let mutated = hash_event_value(value.clone()).expect("hash mutated");
        assert_ne!(mutated, original);

        value["completeness_percent"] = json!(50);
        let reverted = hash_event_value(value).expect("hash reverted");
        assert_eq!(reverted, original);
    }

    #[test]
    fn hash_ignores_event_id_and_hash_fields() {
        let event = DriftEvent::seal(&scope(), added_draft()).expect("seal");
        let mut renamed = event.clone();
        renamed.event_id = "drift_other".to_owned();
        renamed.canonical_hash = "stale".to_owned();

        assert_eq!(
            renamed.compute_hash().expect("hash"),
            event.canonical_hash
        );
    }

    #[test]
    fn event_round_trips_through_json_with_same_hash() {
        let event = DriftEvent::seal(&scope(), added_draft()).expect("seal");
        let raw = serde_json::to_string(&event).expect("serialize");
        let parsed: DriftEvent = serde_json::from_str(&raw).expect("deserialize");

        assert_eq!(parsed, event);
        assert!(parsed.verify_hash().expect("verify"));
    }

    #[test]
    fn filters_match_by_type_and_classification() {
        let event = DriftEvent::seal(&scope(), added_draft()).expect("seal");

        assert!(DriftFilters::default().matches(&event));
        assert!(
            DriftFilters {
                object_type: Some(ObjectType::Field),
                classification: Some(Classification::Structural),
            }
            .matches(&event)
        );
        assert!(
            !DriftFilters {
                object_type: Some(ObjectType::Workflow),
                classification: None,
            }
            .matches(&event)
        );
    }

    #[test]
    fn enum_names_parse_back() {
        for object_type in [
            ObjectType::Field,
            ObjectType::Workflow,
            ObjectType::AutomationRule,
            ObjectType::Project,
            ObjectType::Scope,
        ] {
            assert_eq!(object_type.as_str().parse::<ObjectType>(), Ok(object_type));
        }
        assert_eq!(
            "config_change".parse::<Classification>(),
            Ok(Classification::ConfigChange)
        );
        assert!("renamed".parse::<ChangeType>().is_err());
    }
}
