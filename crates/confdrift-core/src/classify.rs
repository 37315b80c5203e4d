use crate::{ChangeType, Classification, ObjectType};

/// Fixed classification table. New object types must be added here; the
/// match is exhaustive so the compiler flags any missing entry.
pub fn classify(object_type: ObjectType, change_type: ChangeType) -> Classification {
    match (object_type, change_type) {
        (ObjectType::Field | ObjectType::Project, _) => Classification::Structural,
        (ObjectType::Workflow | ObjectType::AutomationRule, _) => Classification::ConfigChange,
        (ObjectType::Scope, _) => Classification::DataVisibilityChange,
    }
}

/// Classifies untyped names, e.g. rows written by another producer. Any
/// unrecognised object type or change type maps to `Unknown`.
pub fn classify_raw(object_type: &str, change_type: &str) -> Classification {
    match (object_type.parse::<ObjectType>(), change_type.parse::<ChangeType>()) {
        (Ok(object_type), Ok(change_type)) => classify(object_type, change_type),
        _ => Classification::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_OBJECT_TYPES: [ObjectType; 5] = [
        ObjectType::Field,
        ObjectType::Workflow,
        ObjectType::AutomationRule,
        ObjectType::Project,
        ObjectType::Scope,
    ];
    const ALL_CHANGE_TYPES: [ChangeType; 3] =
        [ChangeType::Added, ChangeType::Removed, ChangeType::Modified];

    #[test]
    fn table_matches_documented_mapping() {
        for change_type in ALL_CHANGE_TYPES {
            assert_eq!(
                classify(ObjectType::Field, change_type),
                Classification::Structural
            );
            assert_eq!(
                classify(ObjectType::Project, change_type),
                Classification::Structural
            );
            assert_eq!(
                classify(ObjectType::Workflow, change_type),
                Classification::ConfigChange
            );
            assert_eq!(
                classify(ObjectType::AutomationRule, change_type),
                Classification::ConfigChange
            );
            assert_eq!(
                classify(ObjectType::Scope, change_type),
                Classification::DataVisibilityChange
            );
        }
    }

    #[test]
    fn every_typed_pair_has_a_known_classification() {
        for object_type in ALL_OBJECT_TYPES {
            for change_type in ALL_CHANGE_TYPES {
                assert_ne!(classify(object_type, change_type), Classification::Unknown);
            }
        }
    }

    #[test]
    fn raw_names_fall_back_to_unknown() {
        assert_eq!(classify_raw("field", "added"), Classification::Structural);
        assert_eq!(
            classify_raw("automation_rule", "modified"),
            Classification::ConfigChange
        );
        assert_eq!(classify_raw("dashboard", "added"), Classification::Unknown);
        assert_eq!(classify_raw("field", "renamed"), Classification::Unknown);
        assert_eq!(classify_raw("", ""), Classification::Unknown);
    }
}
