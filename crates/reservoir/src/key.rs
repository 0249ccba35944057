//! Canonical instance keys.
//!
//! Every instance in a [`Context`](crate::Context) is identified by a [`Key`]
//! derived from its model name and parameters. Parameters are first lowered to
//! a [`serde_json::Value`] and then encoded with [`encode`].
//!
//! ## Encoding rules
//! ```text
//! undefined  → "u"
//! null       → "n"
//! "text"     → "stext"
//! [a, b]     → "a" + enc(a) + "|" + enc(b)
//! {k: v, ..} → "o" + "k:" + enc(v) + "|" + ...   (keys sorted, absent fields skipped)
//! 42 / true  → "42" / "true"
//! ```
//!
//! Object keys are sorted, so two maps with the same entries always encode to
//! the same key regardless of insertion order. Sequences keep their order.
//! A field that serde skips (for example `Option::None` with
//! `skip_serializing_if`) is absent from the value and behaves like an
//! undefined key.
//!
//! Strings are written as is, separators included. Params whose strings
//! contain `|` or `:` can therefore share a key with differently shaped
//! params (`["a|sb"]` and `["a", "b"]` both encode to `asa|sb`). Keep those
//! characters out of key-bearing strings, or wrap such values in a record
//! field of their own.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical identity of an instance: encoding of `[name, params]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    /// Builds the key for a model name and its already-lowered params.
    pub fn for_instance(name: &str, params: &Value) -> Self {
        let mut out = String::with_capacity(name.len() + 8);
        out.push('a');
        out.push('s');
        out.push_str(name);
        out.push('|');
        write_value(&mut out, params);
        Self(out)
    }

    /// Wraps an already encoded key, e.g. one read back from a snapshot.
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Encodes a value to its canonical string form.
pub fn encode(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Encodes a possibly undefined value; `None` encodes as `"u"`.
pub fn encode_optional(value: Option<&Value>) -> String {
    match value {
        Some(v) => encode(v),
        None => "u".to_string(),
    }
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push('n'),
        Value::String(s) => {
            out.push('s');
            out.push_str(s);
        }
        Value::Array(items) => {
            out.push('a');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push('|');
                }
                write_value(out, item);
            }
        }
        Value::Object(map) => {
            out.push('o');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for (i, k) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push('|');
                }
                out.push_str(k);
                out.push(':');
                write_value(out, &map[k]);
            }
        }
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn primitives() {
        assert_eq!(encode_optional(None), "u");
        assert_eq!(encode(&Value::Null), "n");
        assert_eq!(encode(&json!("abc")), "sabc");
        assert_eq!(encode(&json!(42)), "42");
        assert_eq!(encode(&json!(1.5)), "1.5");
        assert_eq!(encode(&json!(true)), "true");
        assert_eq!(encode(&json!(false)), "false");
    }

    #[test]
    fn strings_are_tagged_so_they_never_collide_with_numbers() {
        assert_ne!(encode(&json!("1")), encode(&json!(1)));
        assert_ne!(encode(&json!("true")), encode(&json!(true)));
        assert_ne!(encode(&json!("n")), encode(&Value::Null));
    }

    #[test]
    fn arrays_keep_order() {
        assert_eq!(encode(&json!([1, "x", null])), "a1|sx|n");
        assert_ne!(encode(&json!([1, 2])), encode(&json!([2, 1])));
        assert_eq!(encode(&json!([])), "a");
    }

    #[test]
    fn objects_sort_keys() {
        let a: Value = serde_json::from_str(r#"{"b": 2, "a": {"y": [1], "x": "s"}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": {"x": "s", "y": [1]}, "b": 2}"#).unwrap();
        assert_eq!(encode(&a), encode(&b));
        assert_eq!(encode(&a), "oa:ox:ss|y:a1|b:2");
    }

    #[test]
    fn skipped_fields_behave_as_undefined() {
        #[derive(Serialize)]
        struct Filter {
            page: u32,
            #[serde(skip_serializing_if = "Option::is_none")]
            tag: Option<String>,
        }

        let without = serde_json::to_value(Filter { page: 1, tag: None }).unwrap();
        assert_eq!(encode(&without), encode(&json!({ "page": 1 })));

        let with = serde_json::to_value(Filter {
            page: 1,
            tag: Some("rust".into()),
        })
        .unwrap();
        assert_eq!(encode(&with), "opage:1|tag:srust");
    }

    #[test]
    fn separators_inside_strings_are_not_escaped() {
        assert_eq!(encode(&json!(["a|sb"])), "asa|sb");
        assert_eq!(encode(&json!(["a|sb"])), encode(&json!(["a", "b"])));
        assert_eq!(encode(&json!({ "k": "v|w:sx" })), "ok:sv|w:sx");
    }

    #[test]
    fn instance_key_wraps_name_and_params() {
        let key = Key::for_instance("counter", &json!({}));
        assert_eq!(key.as_str(), "ascounter|o");
        assert_eq!(
            key.as_str(),
            encode(&json!(["counter", {}])),
            "instance key must equal the encoding of [name, params]"
        );
    }

    fn random_scalar() -> Value {
        match fastrand::u8(0..4) {
            0 => Value::Null,
            1 => json!(fastrand::bool()),
            2 => json!(fastrand::i64(-50..50)),
            _ => {
                let s: String = (0..fastrand::usize(0..4)).map(|_| fastrand::alphanumeric()).collect();
                json!(s)
            }
        }
    }

    fn random_leaf() -> Value {
        if fastrand::u8(0..4) == 0 {
            Value::Array((0..fastrand::usize(0..4)).map(|_| random_scalar()).collect())
        } else {
            random_scalar()
        }
    }

    /// Params the way callers usually shape them: a scalar, a list of
    /// scalars, or a flat record whose fields are scalars or lists. Strings
    /// stay alphanumeric since separators inside strings are not escaped, see
    /// `separators_inside_strings_are_not_escaped`.
    fn random_params() -> Value {
        match fastrand::u8(0..3) {
            0 => random_scalar(),
            1 => Value::Array((0..fastrand::usize(0..4)).map(|_| random_scalar()).collect()),
            _ => {
                let mut map = serde_json::Map::new();
                for _ in 0..fastrand::usize(0..4) {
                    let k: String = (0..fastrand::usize(1..3)).map(|_| fastrand::lowercase()).collect();
                    map.insert(k, random_leaf());
                }
                Value::Object(map)
            }
        }
    }

    /// Rebuilds every object with its keys inserted in reverse order.
    fn shuffled(value: &Value) -> Value {
        match value {
            Value::Array(items) => Value::Array(items.iter().map(shuffled).collect()),
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (k, v) in map.iter().rev() {
                    out.insert(k.clone(), shuffled(v));
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    #[test]
    fn fuzz_equal_values_share_keys_and_unequal_values_do_not() {
        fastrand::seed(7);
        let corpus: Vec<Value> = (0..400).map(|_| random_params()).collect();

        for v in &corpus {
            assert_eq!(encode(v), encode(&shuffled(v)), "order independence for {v}");
        }

        for (i, a) in corpus.iter().enumerate() {
            for b in &corpus[i + 1..] {
                if a != b {
                    assert_ne!(encode(a), encode(b), "collision between {a} and {b}");
                }
            }
        }
    }
}
