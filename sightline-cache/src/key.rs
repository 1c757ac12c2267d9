use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Stable identity of a logical test: a blake3 hash over the canonical JSON
/// of its name, payload and expectation descriptions. Callbacks are not part
/// of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_test<'a>(
        name: &str,
        payload: Option<&Value>,
        expectations: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let doc = json!({
            "name": name,
            "payload": payload.cloned().unwrap_or(Value::Null),
            "expectations": expectations.into_iter().collect::<Vec<_>>(),
        });
        let mut canonical = String::new();
        write_canonical(&doc, &mut canonical);
        CacheKey(hex::encode(blake3::hash(canonical.as_bytes()).as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialize with object keys sorted at every level.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, k) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(&map[k], out);
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
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_payload_key_order() {
        let a: Value = serde_json::from_str(r#"{"user":"alice","pass":"x","meta":{"b":1,"a":2}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"meta":{"a":2,"b":1},"pass":"x","user":"alice"}"#).unwrap();
        let ka = CacheKey::for_test("Login", Some(&a), ["dashboard visible"]);
        let kb = CacheKey::for_test("Login", Some(&b), ["dashboard visible"]);
        assert_eq!(ka, kb);
        assert_eq!(ka.as_str().len(), 64);
    }

    #[test]
    fn key_changes_with_name_payload_and_expectations() {
        let base = CacheKey::for_test("Login", None, ["a", "b"]);
        assert_ne!(base, CacheKey::for_test("Logout", None, ["a", "b"]));
        assert_ne!(base, CacheKey::for_test("Login", Some(&json!({"u": 1})), ["a", "b"]));
        assert_ne!(base, CacheKey::for_test("Login", None, ["b", "a"]));
        assert_eq!(base, CacheKey::for_test("Login", None, ["a", "b"]));
    }
}
