use serde_json::Value;

/// Recursively merge `src` into `target`.
///
/// Objects merge key by key, arrays merge index by index (extra target
/// elements are kept), anything else is overwritten. A `null` source leaves
/// the target untouched.
pub fn deep_merge(target: &mut Value, src: Value) {
    match (target, src) {
        (_, Value::Null) => {}
        (Value::Object(t), Value::Object(s)) => {
            for (k, v) in s {
                match t.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        t.insert(k, v);
                    }
                }
            }
        }
        (Value::Array(t), Value::Array(s)) => {
            for (i, v) in s.into_iter().enumerate() {
                match t.get_mut(i) {
                    Some(existing) => deep_merge(existing, v),
                    None => t.push(v),
                }
            }
        }
        (t, s) => *t = s,
    }
}
