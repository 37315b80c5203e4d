use confdrift_canon::{CanonicalError, canonical_eq};
use confdrift_core::{PatchOp, PatchOperation};
use serde_json::Value;

/// Minimal attribute-level patch turning `before` into `after`.
///
/// Objects are compared key by key and recursed into; arrays and scalars are
/// replaced as whole values. Operations come back sorted by path.
pub fn diff_states(before: &Value, after: &Value) -> Result<Vec<PatchOperation>, CanonicalError> {
    let mut operations = Vec::new();
    diff_into("", before, after, &mut operations)?;
    operations.sort_by(|left, right| left.path.as_bytes().cmp(right.path.as_bytes()));
    Ok(operations)
}

fn diff_into(
    path: &str,
    before: &Value,
    after: &Value,
    operations: &mut Vec<PatchOperation>,
) -> Result<(), CanonicalError> {
    if let (Value::Object(before), Value::Object(after)) = (before, after) {
        for (key, old) in before {
            if !after.contains_key(key) {
                operations.push(PatchOperation {
                    op: PatchOp::Remove,
                    path: join_path(path, key),
                    old: Some(old.clone()),
                    new: None,
                });
            }
        }
        for (key, new) in after {
            let child = join_path(path, key);
            match before.get(key) {
                None => operations.push(PatchOperation {
                    op: PatchOp::Add,
                    path: child,
                    old: None,
                    new: Some(new.clone()),
                }),
                Some(old) => diff_into(&child, old, new, operations)?,
            }
        }
        return Ok(());
    }

    if !canonical_eq(before, after)? {
        operations.push(PatchOperation {
            op: PatchOp::Replace,
            path: path.to_owned(),
            old: Some(before.clone()),
            new: Some(after.clone()),
        });
    }
    Ok(())
}

fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_owned()
    } else {
        format!("{parent}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn summary(operations: &[PatchOperation]) -> Vec<(PatchOp, &str)> {
        operations
            .iter()
            .map(|operation| (operation.op, operation.path.as_str()))
            .collect()
    }

    #[test]
    fn single_scalar_change_is_one_replace() {
        let operations = diff_states(
            &json!({"id": "custom_1", "type": "text"}),
            &json!({"id": "custom_1", "type": "number"}),
        )
        .expect("diff");

        assert_eq!(
            operations,
            vec![PatchOperation {
                op: PatchOp::Replace,
                path: "type".to_owned(),
                old: Some(json!("text")),
                new: Some(json!("number")),
            }]
        );
    }

    #[test]
    fn nested_objects_recurse_and_arrays_replace_whole() {
        let before = json!({
            "schema": {"type": "option", "custom": "select"},
            "statuses": ["Done", "To Do"],
            "lead": "alice"
        });
        let after = json!({
            "schema": {"type": "option", "items": "string"},
            "statuses": ["Done", "In Progress", "To Do"],
            "archived": true
        });

        let operations = diff_states(&before, &after).expect("diff");
        assert_eq!(
            summary(&operations),
            vec![
                (PatchOp::Add, "archived"),
                (PatchOp::Remove, "lead"),
                (PatchOp::Remove, "schema.custom"),
                (PatchOp::Add, "schema.items"),
                (PatchOp::Replace, "statuses"),
            ]
        );
    }

    #[test]
    fn equal_states_and_integral_floats_produce_nothing() {
        assert!(
            diff_states(&json!({"n": 1, "a": [1]}), &json!({"a": [1], "n": 1.0}))
                .expect("diff")
                .is_empty()
        );
    }

    #[test]
    fn type_change_at_root_replaces_whole_state() {
        let operations = diff_states(&json!({"a": 1}), &json!("gone")).expect("diff");
        assert_eq!(summary(&operations), vec![(PatchOp::Replace, "")]);
    }
}
