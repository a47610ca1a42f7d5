//! Key derivation
//!
//! Structured inputs are reduced to short string keys: serialize with serde,
//! render canonically (object keys sorted at every level), then hash with a
//! fast non-cryptographic hasher. Two inputs that differ only in field order
//! produce the same key. Hash collisions are possible and are not detected;
//! a collision returns the other input's value.

use crate::error::{CacheError, Result};
use serde::Serialize;
use serde_json::Value;
use std::fmt::Write;
use std::hash::BuildHasher;

/// Reduces an input to a cache key
pub trait KeyDeriver<I: ?Sized>: Send + Sync {
    /// Derive the key for `input`; must be pure and deterministic
    fn derive_key(&self, input: &I) -> Result<String>;
}

/// Non-cryptographic 64-bit hash over canonical bytes
pub trait KeyHasher: Send + Sync {
    fn hash(&self, bytes: &[u8]) -> u64;
}

/// aHash with fixed seeds.
///
/// Keys are stable across restarts of the same build, which is what the
/// persistence tier needs. Another build may hash differently; persisted
/// entries then simply miss.
#[derive(Debug, Clone)]
pub struct AHashKeyHasher {
    state: ahash::RandomState,
}

const DEFAULT_SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

impl AHashKeyHasher {
    pub fn new() -> Self {
        Self::with_seeds(DEFAULT_SEEDS)
    }

    pub fn with_seeds(seeds: [u64; 4]) -> Self {
        Self {
            state: ahash::RandomState::with_seeds(seeds[0], seeds[1], seeds[2], seeds[3]),
        }
    }
}

impl Default for AHashKeyHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyHasher for AHashKeyHasher {
    fn hash(&self, bytes: &[u8]) -> u64 {
        BuildHasher::hash_one(&self.state, bytes)
    }
}

/// Render a JSON value with object keys sorted and no whitespace
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(s) => write_string(s, out),
        Value::Number(n) => {
            let _ = write!(out, "{}", n);
        }
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Null => out.push_str("null"),
    }
}

fn write_string(s: &str, out: &mut String) {
    // Display of a string Value is its escaped JSON form
    let _ = write!(out, "{}", Value::from(s));
}

/// Default deriver: canonical JSON of the input, hashed, with a prefix
pub struct CanonicalKeyDeriver {
    prefix: String,
    hasher: Box<dyn KeyHasher>,
}

impl CanonicalKeyDeriver {
    /// Deriver producing keys of the form `"{prefix}:{hash:016x}"`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_hasher(prefix, AHashKeyHasher::new())
    }

    pub fn with_hasher(prefix: impl Into<String>, hasher: impl KeyHasher + 'static) -> Self {
        Self {
            prefix: prefix.into(),
            hasher: Box::new(hasher),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Canonical form of an input, before hashing
    pub fn canonicalize<I: Serialize + ?Sized>(input: &I) -> Result<String> {
        let value =
            serde_json::to_value(input).map_err(|e| CacheError::KeyDerivation(e.to_string()))?;
        Ok(canonical_json(&value))
    }
}

impl std::fmt::Debug for CanonicalKeyDeriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanonicalKeyDeriver")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl<I: Serialize + ?Sized> KeyDeriver<I> for CanonicalKeyDeriver {
    fn derive_key(&self, input: &I) -> Result<String> {
        let canonical = Self::canonicalize(input)?;
        let hash = self.hasher.hash(canonical.as_bytes());
        Ok(format!("{}:{:016x}", self.prefix, hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap};

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"z": [3, {"y": null, "x": true}], "c": "q\"t"}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"c":"q\"t","z":[3,{"x":true,"y":null}]},"b":1}"#
        );
    }

    #[test]
    fn test_key_independent_of_field_order() {
        let deriver = CanonicalKeyDeriver::new("calc");

        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for (k, v) in [("principal", 1000.0), ("rate", 0.05), ("years", 3.0)] {
            first.insert(k.to_string(), v);
        }
        for (k, v) in [("years", 3.0), ("rate", 0.05), ("principal", 1000.0)] {
            second.insert(k.to_string(), v);
        }

        let a = deriver.derive_key(&first).unwrap();
        let b = deriver.derive_key(&second).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("calc:"));
        assert_eq!(a.len(), "calc:".len() + 16);
    }

    #[test]
    fn test_struct_and_map_with_same_shape_agree() {
        #[derive(Serialize)]
        struct Loan {
            years: u32,
            principal: u32,
        }

        let mut map = BTreeMap::new();
        map.insert("principal", 1000u32);
        map.insert("years", 3u32);

        let deriver = CanonicalKeyDeriver::new("calc");
        assert_eq!(
            deriver
                .derive_key(&Loan {
                    years: 3,
                    principal: 1000
                })
                .unwrap(),
            deriver.derive_key(&map).unwrap()
        );
    }

    #[test]
    fn test_different_inputs_and_prefixes_differ() {
        let calc = CanonicalKeyDeriver::new("calc");
        let tpl = CanonicalKeyDeriver::new("tpl");
        let input = json!({"amount": 10});

        assert_ne!(
            calc.derive_key(&input).unwrap(),
            calc.derive_key(&json!({"amount": 11})).unwrap()
        );
        assert_ne!(calc.derive_key(&input).unwrap(), tpl.derive_key(&input).unwrap());
    }

    #[test]
    fn test_hasher_is_stable_across_instances() {
        let a = AHashKeyHasher::new();
        let b = AHashKeyHasher::new();
        assert_eq!(a.hash(b"same input"), b.hash(b"same input"));
        assert_ne!(
            AHashKeyHasher::with_seeds([1, 2, 3, 4]).hash(b"same input"),
            a.hash(b"same input")
        );
    }

    #[test]
    fn test_unrepresentable_input_is_an_error() {
        let mut map = HashMap::new();
        map.insert((1u8, 2u8), "tuple keys are not JSON");

        let deriver = CanonicalKeyDeriver::new("calc");
        assert!(matches!(
            deriver.derive_key(&map),
            Err(CacheError::KeyDerivation(_))
        ));
    }
}
