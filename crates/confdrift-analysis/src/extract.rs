use std::collections::BTreeMap;

use confdrift_core::{MissingDataReference, ObjectType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const MISSING_DATA_KEY: &str = "missing_data";
pub const UNSPECIFIED_REASON: &str = "unspecified";

/// Natural key to canonical attribute object, for one object type.
pub type CanonicalObjectMap = BTreeMap<String, Value>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("payload must be a JSON object, found {found}")]
    PayloadNotObject { found: &'static str },
    #[error("'{dataset}' must be an array, found {found}")]
    CollectionNotArray {
        dataset: &'static str,
        found: &'static str,
    },
    #[error("'{dataset}'[{index}] must be an object, found {found}")]
    ElementNotObject {
        dataset: &'static str,
        index: usize,
        found: &'static str,
    },
    #[error("'{dataset}'[{index}] has no usable natural key '{key}'")]
    MissingKey {
        dataset: &'static str,
        index: usize,
        key: &'static str,
    },
    #[error("'{dataset}'[{index}] has an unnamed entry under '{attribute}'")]
    UnnamedEntry {
        dataset: &'static str,
        index: usize,
        attribute: &'static str,
    },
    #[error("'missing_data'[{index}] is malformed: {reason}")]
    InvalidMissingData { index: usize, reason: &'static str },
}

/// A dataset the capture side declared unavailable in one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MissingDataEntry {
    pub dataset: String,
    pub reason_code: String,
}

impl From<&MissingDataEntry> for MissingDataReference {
    fn from(entry: &MissingDataEntry) -> Self {
        Self {
            dataset: entry.dataset.clone(),
            reason_code: entry.reason_code.clone(),
        }
    }
}

/// Attribute projection; `Err` names the attribute holding an unnamed entry.
type Attributes = Result<Map<String, Value>, &'static str>;

/// How one object type is read out of a payload.
struct Extractor {
    dataset: &'static str,
    key_name: &'static str,
    key: fn(&Map<String, Value>) -> Option<String>,
    attributes: fn(&Map<String, Value>) -> Attributes,
}

fn extractor(object_type: ObjectType) -> Option<Extractor> {
    let dataset = object_type.dataset()?;
    let extractor = match object_type {
        ObjectType::Field => Extractor {
            dataset,
            key_name: "id",
            key: |element| key_text(element.get("id")),
            attributes: field_attributes,
        },
        ObjectType::Workflow => Extractor {
            dataset,
            key_name: "name",
            key: workflow_name,
            attributes: workflow_attributes,
        },
        ObjectType::AutomationRule => Extractor {
            dataset,
            key_name: "id",
            key: |element| key_text(element.get("id")),
            attributes: rule_attributes,
        },
        ObjectType::Project => Extractor {
            dataset,
            key_name: "key",
            key: |element| key_text(element.get("key")),
            attributes: project_attributes,
        },
        ObjectType::Scope => return None,
    };
    Some(extractor)
}

/// Canonical attribute objects for `object_type`, keyed by natural key.
///
/// An absent or null collection yields an empty map. Anything else that does
/// not have the expected shape is an error rather than a silently shorter map.
pub fn extract(
    payload: &Value,
    object_type: ObjectType,
) -> Result<CanonicalObjectMap, ExtractError> {
    let payload = payload_object(payload)?;
    let Some(extractor) = extractor(object_type) else {
        return Ok(CanonicalObjectMap::new());
    };
    let dataset = extractor.dataset;
    let Some(items) = collection(payload, dataset)? else {
        return Ok(CanonicalObjectMap::new());
    };

    let mut objects = CanonicalObjectMap::new();
    for (index, item) in items.iter().enumerate() {
        let Some(element) = item.as_object() else {
            return Err(ExtractError::ElementNotObject {
                dataset,
                index,
                found: json_kind(item),
            });
        };
        let Some(key) = (extractor.key)(element) else {
            return Err(ExtractError::MissingKey {
                dataset,
                index,
                key: extractor.key_name,
            });
        };

        let mut attributes =
            (extractor.attributes)(element).map_err(|attribute| ExtractError::UnnamedEntry {
                dataset,
                index,
                attribute,
            })?;
        // The normalised key replaces the raw one so `7` and `"7"` agree.
        attributes.insert(extractor.key_name.to_owned(), Value::String(key.clone()));
        objects.insert(key, prune_nulls(Value::Object(attributes)));
    }

    Ok(objects)
}

/// Declared unavailable datasets, sorted and deduplicated.
pub fn extract_missing_data(payload: &Value) -> Result<Vec<MissingDataEntry>, ExtractError> {
    let payload = payload_object(payload)?;
    let Some(items) = collection(payload, MISSING_DATA_KEY)? else {
        return Ok(Vec::new());
    };

    let mut entries = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let entry = match item {
            Value::String(dataset) => MissingDataEntry {
                dataset: non_empty(dataset).ok_or(ExtractError::InvalidMissingData {
                    index,
                    reason: "dataset name is empty",
                })?,
                reason_code: UNSPECIFIED_REASON.to_owned(),
            },
            Value::Object(object) => {
                let dataset = first_text(object, &["dataset", "name"]).ok_or(
                    ExtractError::InvalidMissingData {
                        index,
                        reason: "object entry has no 'dataset' or 'name'",
                    },
                )?;
                let reason_code = first_text(object, &["reason", "reason_code"])
                    .unwrap_or_else(|| UNSPECIFIED_REASON.to_owned());
                MissingDataEntry {
                    dataset,
                    reason_code,
                }
            }
            _ => {
                return Err(ExtractError::InvalidMissingData {
                    index,
                    reason: "entry must be a string or an object",
                });
            }
        };
        entries.push(entry);
    }

    entries.sort();
    entries.dedup();
    Ok(entries)
}

fn payload_object(payload: &Value) -> Result<&Map<String, Value>, ExtractError> {
    payload.as_object().ok_or(ExtractError::PayloadNotObject {
        found: json_kind(payload),
    })
}

fn collection<'a>(
    payload: &'a Map<String, Value>,
    dataset: &'static str,
) -> Result<Option<&'a Vec<Value>>, ExtractError> {
    match payload.get(dataset) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items)),
        Some(other) => Err(ExtractError::CollectionNotArray {
            dataset,
            found: json_kind(other),
        }),
    }
}

fn field_attributes(element: &Map<String, Value>) -> Attributes {
    let mut attributes = Map::new();
    copy_keys(
        element,
        &mut attributes,
        &["id", "name", "custom", "searchable", "navigable", "orderable", "schema"],
    );

    let field_type = element
        .get("type")
        .filter(|value| !value.is_null())
        .or_else(|| element.get("schema").and_then(|schema| schema.get("type")));
    if let Some(field_type) = field_type {
        attributes.insert("type".to_owned(), field_type.clone());
    }

    if let Some(clause_names) = element.get("clause_names") {
        attributes.insert(
            "clause_names".to_owned(),
            sorted_names(clause_names, &[], "clause_names")?,
        );
    }

    Ok(attributes)
}

fn workflow_attributes(element: &Map<String, Value>) -> Attributes {
    let mut attributes = Map::new();
    attributes.insert("name".to_owned(), optional_string(workflow_name(element)));
    copy_keys(element, &mut attributes, &["description", "is_default"]);

    if let Some(statuses) = element.get("statuses") {
        attributes.insert(
            "statuses".to_owned(),
            sorted_names(statuses, &["name", "id"], "statuses")?,
        );
    }

    if let Some(Value::Array(items)) = element.get("transitions") {
        let mut transitions = items
            .iter()
            .map(|transition| -> Result<_, &'static str> {
                let transition = transition.as_object().ok_or("transitions")?;
                let name = name_of(transition.get("name"), &["name"]);
                let to = name_of(transition.get("to"), &["name", "id"]);
                let from = transition_sources(transition.get("from"))?;
                Ok((name, to, from))
            })
            .collect::<Result<Vec<_>, &'static str>>()?;
        // Same name and target may still differ by source statuses.
        transitions.sort();

        let transitions = transitions
            .into_iter()
            .map(|(name, to, from)| {
                let mut transition = Map::new();
                transition.insert("name".to_owned(), optional_string(name));
                transition.insert(
                    "from".to_owned(),
                    Value::Array(from.into_iter().map(Value::String).collect()),
                );
                transition.insert("to".to_owned(), optional_string(to));
                Value::Object(transition)
            })
            .collect();
        attributes.insert("transitions".to_owned(), Value::Array(transitions));
    }

    Ok(attributes)
}

fn transition_sources(from: Option<&Value>) -> Result<Vec<String>, &'static str> {
    match from {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => name_list(items, &["name", "id"], "transitions.from"),
        Some(single) => name_of(Some(single), &["name", "id"])
            .map(|name| vec![name])
            .ok_or("transitions.from"),
    }
}

fn rule_attributes(element: &Map<String, Value>) -> Attributes {
    let mut attributes = Map::new();
    copy_keys(element, &mut attributes, &["id", "name", "state"]);

    if let Some(trigger) = element.get("trigger").filter(|trigger| !trigger.is_null()) {
        let trigger = name_of(Some(trigger), &["type", "component"]).ok_or("trigger")?;
        attributes.insert("trigger".to_owned(), Value::String(trigger));
    }

    if let Some(Value::Array(actions)) = element.get("actions") {
        let actions = actions
            .iter()
            .map(|action| {
                name_of(Some(action), &["type", "component"])
                    .map(Value::String)
                    .ok_or("actions")
            })
            .collect::<Result<Vec<_>, _>>()?;
        attributes.insert("actions".to_owned(), Value::Array(actions));
    }

    if let Some(projects) = element.get("projects") {
        attributes.insert(
            "projects".to_owned(),
            sorted_names(projects, &["key", "project_key", "id"], "projects")?,
        );
    }

    Ok(attributes)
}

fn project_attributes(element: &Map<String, Value>) -> Attributes {
    let mut attributes = Map::new();
    copy_keys(
        element,
        &mut attributes,
        &[
            "key",
            "name",
            "project_type_key",
            "style",
            "lead",
            "archived",
            "category",
        ],
    );
    Ok(attributes)
}

fn copy_keys(source: &Map<String, Value>, target: &mut Map<String, Value>, keys: &[&str]) {
    for key in keys {
        if let Some(value) = source.get(*key) {
            target.insert((*key).to_owned(), value.clone());
        }
    }
}

fn workflow_name(element: &Map<String, Value>) -> Option<String> {
    key_text(element.get("name")).or_else(|| {
        element
            .get("id")
            .and_then(|id| id.get("name"))
            .and_then(|name| key_text(Some(name)))
    })
}

/// Natural keys may be strings or integers; both become trimmed text.
fn key_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => non_empty(text),
        Value::Number(number) if number.is_i64() || number.is_u64() => Some(number.to_string()),
        _ => None,
    }
}

/// A plain string or integer, or the first such value under `keys` of an
/// object.
fn name_of(value: Option<&Value>, keys: &[&str]) -> Option<String> {
    match value? {
        Value::Object(object) => keys.iter().find_map(|key| key_text(object.get(*key))),
        other => key_text(Some(other)),
    }
}

/// Sorted names of every element. An element without a name is reported as
/// `attribute` instead of being skipped.
fn name_list(
    items: &[Value],
    keys: &[&str],
    attribute: &'static str,
) -> Result<Vec<String>, &'static str> {
    let mut names = items
        .iter()
        .map(|item| name_of(Some(item), keys).ok_or(attribute))
        .collect::<Result<Vec<_>, _>>()?;
    names.sort();
    Ok(names)
}

/// `name_list` as a JSON array; a non-array value is kept as it is.
fn sorted_names(
    value: &Value,
    keys: &[&str],
    attribute: &'static str,
) -> Result<Value, &'static str> {
    let Value::Array(items) = value else {
        return Ok(value.clone());
    };
    let names = name_list(items, keys, attribute)?;
    Ok(Value::Array(names.into_iter().map(Value::String).collect()))
}

fn first_text(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str).and_then(non_empty))
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

fn optional_string(value: Option<String>) -> Value {
    value.map(Value::String).unwrap_or(Value::Null)
}

/// Drops null-valued object entries at every depth. Array positions are kept.
fn prune_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, item)| !item.is_null())
                .map(|(key, item)| (key, prune_nulls(item)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(prune_nulls).collect()),
        other => other,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn absent_or_null_collections_are_empty() {
        let payload = json!({"fields": null});

        for object_type in ObjectType::EXTRACTED {
            assert!(extract(&payload, object_type).expect("extract").is_empty());
        }
        assert!(extract_missing_data(&payload).expect("missing").is_empty());
        assert!(extract(&payload, ObjectType::Scope).expect("scope").is_empty());
    }

    #[test]
    fn malformed_shapes_fail_closed() {
        assert_eq!(
            extract(&json!([]), ObjectType::Field),
            Err(ExtractError::PayloadNotObject { found: "array" })
        );
        assert_eq!(
            extract(&json!({"fields": {"id": "x"}}), ObjectType::Field),
            Err(ExtractError::CollectionNotArray {
                dataset: "fields",
                found: "object"
            })
        );
        assert_eq!(
            extract(&json!({"projects": ["OPS"]}), ObjectType::Project),
            Err(ExtractError::ElementNotObject {
                dataset: "projects",
                index: 0,
                found: "string"
            })
        );
        assert_eq!(
            extract(&json!({"fields": [{"id": "a"}, {"name": "no id"}]}), ObjectType::Field),
            Err(ExtractError::MissingKey {
                dataset: "fields",
                index: 1,
                key: "id"
            })
        );
    }

    #[test]
    fn field_keeps_drift_attributes_only() {
        let payload = json!({
            "fields": [{
                "id": "customfield_10010",
                "name": "Team",
                "custom": true,
                "searchable": true,
                "schema": {"type": "option", "custom": "select", "customId": null},
                "clause_names": ["cf[10010]", "Team"],
                "untranslatedName": "Team",
                "orderable": null
            }]
        });

        let fields = extract(&payload, ObjectType::Field).expect("extract");
        assert_eq!(
            fields["customfield_10010"],
            json!({
                "id": "customfield_10010",
                "name": "Team",
                "type": "option",
                "custom": true,
                "searchable": true,
                "schema": {"type": "option", "custom": "select"},
                "clause_names": ["Team", "cf[10010]"]
            })
        );
    }

    #[test]
    fn workflow_lists_are_order_insensitive() {
        let first = json!({"workflows": [{
            "id": {"name": "Software Flow"},
            "statuses": [{"name": "To Do"}, {"name": "Done"}],
            "transitions": [
                {"name": "Start", "from": ["To Do"], "to": {"name": "In Progress"}},
                {"name": "Finish", "from": ["Review", "In Progress"], "to": "Done"}
            ],
            "is_default": false
        }]});
        let second = json!({"workflows": [{
            "name": "Software Flow",
            "is_default": false,
            "statuses": ["Done", "To Do"],
            "transitions": [
                {"name": "Finish", "from": ["In Progress", "Review"], "to": "Done"},
                {"name": "Start", "from": [{"name": "To Do"}], "to": "In Progress"}
            ]
        }]});

        let left = extract(&first, ObjectType::Workflow).expect("first");
        let right = extract(&second, ObjectType::Workflow).expect("second");
        assert_eq!(left, right);
        assert_eq!(
            left["Software Flow"]["transitions"][0],
            json!({"name": "Finish", "from": ["In Progress", "Review"], "to": "Done"})
        );
    }

    #[test]
    fn automation_rules_accept_integer_ids() {
        let payload = json!({"automation_rules": [{
            "id": 42,
            "name": "Auto-close",
            "state": "ENABLED",
            "trigger": {"type": "jira.issue.event.trigger:created"},
            "actions": [{"type": "jira.issue.edit"}, {"type": "jira.issue.transition"}],
            "projects": [{"key": "OPS"}, {"key": "DEV"}]
        }]});

        let rules = extract(&payload, ObjectType::AutomationRule).expect("extract");
        assert_eq!(
            rules["42"],
            json!({
                "id": "42",
                "name": "Auto-close",
                "state": "ENABLED",
                "trigger": "jira.issue.event.trigger:created",
                "actions": ["jira.issue.edit", "jira.issue.transition"],
                "projects": ["DEV", "OPS"]
            })
        );
    }

    #[test]
    fn integer_and_string_rule_ids_extract_identically() {
        let numeric = json!({"automation_rules": [{"id": 7, "name": "Triage"}]});
        let textual = json!({"automation_rules": [{"id": "7", "name": "Triage"}]});

        assert_eq!(
            extract(&numeric, ObjectType::AutomationRule).expect("numeric"),
            extract(&textual, ObjectType::AutomationRule).expect("textual")
        );
    }

    #[test]
    fn transitions_sharing_name_and_target_sort_by_source() {
        let reopen_done = json!({"name": "Reopen", "from": ["Done"], "to": "Open"});
        let reopen_closed = json!({"name": "Reopen", "from": ["Closed"], "to": "Open"});
        let first = json!({"workflows": [{
            "name": "Support",
            "transitions": [reopen_done.clone(), reopen_closed.clone()]
        }]});
        let second = json!({"workflows": [{
            "name": "Support",
            "transitions": [reopen_closed, reopen_done]
        }]});

        let left = extract(&first, ObjectType::Workflow).expect("first");
        assert_eq!(left, extract(&second, ObjectType::Workflow).expect("second"));
        assert_eq!(left["Support"]["transitions"][0]["from"], json!(["Closed"]));
    }

    #[test]
    fn statuses_without_names_fall_back_to_ids() {
        let payload = json!({"workflows": [{
            "name": "Support",
            "statuses": [{"id": "2"}, {"id": 1, "name": "Open"}]
        }]});

        let workflows = extract(&payload, ObjectType::Workflow).expect("extract");
        assert_eq!(workflows["Support"]["statuses"], json!(["2", "Open"]));
    }

    #[test]
    fn unnamed_nested_entries_fail_closed() {
        let cases = [
            (
                json!({"workflows": [{"name": "W", "statuses": [{"category": "done"}]}]}),
                ObjectType::Workflow,
                "statuses",
            ),
            (
                json!({"workflows": [{"name": "W", "transitions": ["Start"]}]}),
                ObjectType::Workflow,
                "transitions",
            ),
            (
                json!({"workflows": [{"name": "W", "transitions": [{"name": "Go", "from": [true]}]}]}),
                ObjectType::Workflow,
                "transitions.from",
            ),
            (
                json!({"fields": [{"id": "f", "clause_names": ["ok", null]}]}),
                ObjectType::Field,
                "clause_names",
            ),
            (
                json!({"automation_rules": [{"id": 1, "projects": [{"name": "no key"}]}]}),
                ObjectType::AutomationRule,
                "projects",
            ),
            (
                json!({"automation_rules": [{"id": 1, "actions": [{}]}]}),
                ObjectType::AutomationRule,
                "actions",
            ),
        ];

        for (payload, object_type, attribute) in cases {
            let dataset = object_type.dataset().expect("dataset");
            assert_eq!(
                extract(&payload, object_type),
                Err(ExtractError::UnnamedEntry {
                    dataset,
                    index: 0,
                    attribute
                }),
                "{attribute}"
            );
        }
    }

    #[test]
    fn duplicate_keys_resolve_last_wins() {
        let payload = json!({"projects": [
            {"key": "OPS", "name": "Operations"},
            {"key": "OPS", "name": "Ops (renamed)"}
        ]});

        let projects = extract(&payload, ObjectType::Project).expect("extract");
        assert_eq!(projects.len(), 1);
        assert_eq!(projects["OPS"]["name"], json!("Ops (renamed)"));
    }

    #[test]
    fn missing_data_accepts_strings_and_objects() {
        let payload = json!({"missing_data": [
            "workflows",
            {"dataset": "automation_rules", "reason": "permission_denied"},
            {"name": "projects"},
            "workflows"
        ]});

        let entries = extract_missing_data(&payload).expect("missing");
        let pairs = entries
            .iter()
            .map(|entry| (entry.dataset.as_str(), entry.reason_code.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            pairs,
            vec![
                ("automation_rules", "permission_denied"),
                ("projects", UNSPECIFIED_REASON),
                ("workflows", UNSPECIFIED_REASON),
            ]
        );

        assert!(matches!(
            extract_missing_data(&json!({"missing_data": [7]})),
            Err(ExtractError::InvalidMissingData { index: 0, .. })
        ));
    }
}
