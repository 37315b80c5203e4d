use std::cmp::Ordering;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{ChangeType, Classification, DriftEvent, ObjectType};

/// Position of an event in the canonical listing order:
/// `to_captured_at` descending, then object type, object id, change type,
/// classification and event id ascending. Enum components compare by their
/// serialized names so the SQL and in-memory orders agree.
///
/// Also serves as the keyset cursor for paginated reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DriftOrderKey {
    pub to_captured_at: DateTime<Utc>,
    pub object_type: ObjectType,
    pub object_id: String,
    pub change_type: ChangeType,
    pub classification: Classification,
    pub event_id: String,
}

impl From<&DriftEvent> for DriftOrderKey {
    fn from(event: &DriftEvent) -> Self {
        Self {
            to_captured_at: event.time_window.to_captured_at,
            object_type: event.object_type,
            object_id: event.object_id.clone(),
            change_type: event.change_type,
            classification: event.classification,
            event_id: event.event_id.clone(),
        }
    }
}

impl Ord for DriftOrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_parts(KeyParts::from_key(self), KeyParts::from_key(other))
    }
}

impl PartialOrd for DriftOrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub fn compare_events(left: &DriftEvent, right: &DriftEvent) -> Ordering {
    compare_parts(KeyParts::from_event(left), KeyParts::from_event(right))
}

pub fn sort_events(events: &mut [DriftEvent]) {
    events.sort_by(compare_events);
}

/// Fixed-width RFC 3339 rendering whose byte order equals time order.
pub fn timestamp_sort_key(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[derive(Clone, Copy)]
struct KeyParts<'a> {
    to_captured_at: &'a DateTime<Utc>,
    object_type: ObjectType,
    object_id: &'a str,
    change_type: ChangeType,
    classification: Classification,
    event_id: &'a str,
}

impl<'a> KeyParts<'a> {
    fn from_event(event: &'a DriftEvent) -> Self {
        Self {
            to_captured_at: &event.time_window.to_captured_at,
            object_type: event.object_type,
            object_id: &event.object_id,
            change_type: event.change_type,
            classification: event.classification,
            event_id: &event.event_id,
        }
    }

    fn from_key(key: &'a DriftOrderKey) -> Self {
        Self {
            to_captured_at: &key.to_captured_at,
            object_type: key.object_type,
            object_id: &key.object_id,
            change_type: key.change_type,
            classification: key.classification,
            event_id: &key.event_id,
        }
    }
}

fn compare_parts(left: KeyParts<'_>, right: KeyParts<'_>) -> Ordering {
    right
        .to_captured_at
        .cmp(left.to_captured_at)
        .then_with(|| left.object_type.as_str().cmp(right.object_type.as_str()))
        .then_with(|| left.object_id.as_bytes().cmp(right.object_id.as_bytes()))
        .then_with(|| left.change_type.as_str().cmp(right.change_type.as_str()))
        .then_with(|| {
            left.classification
                .as_str()
                .cmp(right.classification.as_str())
        })
        .then_with(|| left.event_id.as_bytes().cmp(right.event_id.as_bytes()))
}
