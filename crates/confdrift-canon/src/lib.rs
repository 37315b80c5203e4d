use serde::Serialize;
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Largest integer an IEEE-754 double represents exactly (2^53).
const MAX_EXACT_FLOAT_INTEGER: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("canonical form is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Serializes `value` into canonical JSON bytes.
///
/// Object keys are emitted in byte order at every depth, arrays keep their
/// order, and floats holding an integral value print as integers so that
/// `1` and `1.0` canonicalize identically. No insignificant whitespace is
/// written.
pub fn canonicalize(value: &Value) -> Result<Vec<u8>, CanonicalError> {
    let mut out = Vec::new();
    write_canonical(&mut out, value)?;
    Ok(out)
}

pub fn canonical_string(value: &Value) -> Result<String, CanonicalError> {
    let bytes = canonicalize(value)?;
    Ok(String::from_utf8(bytes)?)
}

pub fn canonicalize_serializable<T>(value: &T) -> Result<Vec<u8>, CanonicalError>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(value)?;
    canonicalize(&value)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}

pub fn canonical_hash(value: &Value) -> Result<String, CanonicalError> {
    let bytes = canonicalize(value)?;
    Ok(sha256_hex(&bytes))
}

pub fn canonical_hash_of<T>(value: &T) -> Result<String, CanonicalError>
where
    T: Serialize + ?Sized,
{
    let bytes = canonicalize_serializable(value)?;
    Ok(sha256_hex(&bytes))
}

/// Equality under canonicalization: key order and integral float encoding
/// are ignored.
pub fn canonical_eq(left: &Value, right: &Value) -> Result<bool, CanonicalError> {
    if left == right {
        return Ok(true);
    }
    Ok(canonicalize(left)? == canonicalize(right)?)
}

fn write_canonical(out: &mut Vec<u8>, value: &Value) -> Result<(), CanonicalError> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(number) => write_number(out, number),
        Value::String(text) => serde_json::to_writer(&mut *out, text)?,
        Value::Array(items) => {
            out.push(b'[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(b',');
                }
                write_canonical(out, item)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut entries = map.iter().collect::<Vec<_>>();
            entries.sort_by(|(left, _), (right, _)| left.as_bytes().cmp(right.as_bytes()));

            out.push(b'{');
            for (index, (key, item)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(out, item)?;
            }
            out.push(b'}');
        }
    }

    Ok(())
}

fn write_number(out: &mut Vec<u8>, number: &Number) {
    if let Some(value) = number.as_i64() {
        out.extend_from_slice(value.to_string().as_bytes());
        return;
    }
    if let Some(value) = number.as_u64() {
        out.extend_from_slice(value.to_string().as_bytes());
        return;
    }

    match number.as_f64() {
        Some(value) if value.fract() == 0.0 && value.abs() < MAX_EXACT_FLOAT_INTEGER => {
            out.extend_from_slice((value as i64).to_string().as_bytes());
        }
        _ => out.extend_from_slice(number.to_string().as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::{Map, json};

    use super::*;

    #[test]
    fn object_keys_are_sorted_recursively() {
        let value = json!({
            "zeta": 1,
            "alpha": {"b": [3, 2, 1], "a": null},
            "mid": "x",
        });

        let canonical = canonical_string(&value).expect("canonicalize");
        assert_eq!(
            canonical,
            r#"{"alpha":{"a":null,"b":[3,2,1]},"mid":"x","zeta":1}"#
        );
    }

    #[test]
    fn arrays_preserve_order() {
        let forward = canonical_hash(&json!(["a", "b"])).expect("hash forward");
        let reversed = canonical_hash(&json!(["b", "a"])).expect("hash reversed");
        assert_ne!(forward, reversed);
    }

    #[test]
    fn integral_floats_normalize_to_integers() {
        assert_eq!(
            canonical_string(&json!({"n": 1.0})).expect("float"),
            canonical_string(&json!({"n": 1})).expect("int")
        );
        assert_eq!(
            canonical_string(&json!(-0.0)).expect("negative zero"),
            "0"
        );
        assert_eq!(canonical_string(&json!(2.5)).expect("fraction"), "2.5");
        assert!(canonical_eq(&json!({"n": 3.0}), &json!({"n": 3})).expect("eq"));
    }

    #[test]
    fn strings_use_json_escaping() {
        let canonical = canonical_string(&json!({"q": "say \"hi\"\n"})).expect("canonicalize");
        assert_eq!(canonical, r#"{"q":"say \"hi\"\n"}"#);
    }

    #[test]
    fn sha256_hex_matches_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn serializable_hash_matches_value_hash() {
        #[derive(Serialize)]
        struct Sample {
            b: u32,
            a: &'static str,
        }

        let from_struct = canonical_hash_of(&Sample { b: 7, a: "x" }).expect("struct hash");
        let from_value = canonical_hash(&json!({"a": "x", "b": 7})).expect("value hash");
        assert_eq!(from_struct, from_value);
    }

    proptest! {
        #[test]
        fn hash_ignores_insertion_order(entries in proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 1..16)) {
            let mut forward = Map::new();
            for (key, value) in entries.iter() {
                forward.insert(key.clone(), json!(value));
            }
            let mut backward = Map::new();
            for (key, value) in entries.iter().rev() {
                backward.insert(key.clone(), json!(value));
            }

            let forward_hash = canonical_hash(&Value::Object(forward)).expect("forward");
            let backward_hash = canonical_hash(&Value::Object(backward)).expect("backward");
            prop_assert_eq!(forward_hash, backward_hash);
        }

        #[test]
        fn hash_tracks_any_single_value_change(entries in proptest::collection::btree_map("[a-z]{1,8}", any::<i32>(), 1..16)) {
            let original = json!(entries);
            let (first_key, first_value) = entries.iter().next().expect("non-empty map");
            let mut mutated_entries = entries.clone();
            mutated_entries.insert(first_key.clone(), first_value.wrapping_add(1));
            let mutated = json!(mutated_entries);

            let original_hash = canonical_hash(&original).expect("original");
            prop_assert_ne!(&original_hash, &canonical_hash(&mutated).expect("mutated"));
            prop_assert_eq!(original_hash, canonical_hash(&json!(entries)).expect("restored"));
        }

        #[test]
        fn canonical_output_reparses_to_same_value(entries in proptest::collection::btree_map("[a-z]{1,8}", "[ -~]{0,12}", 0..16)) {
            let value = json!(entries);
            let canonical = canonical_string(&value).expect("canonicalize");
            let reparsed: Value = serde_json::from_str(&canonical).expect("reparse");
            prop_assert_eq!(reparsed, value);
        }
    }
}
