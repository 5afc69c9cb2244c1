//! Deterministic JSON serialization with sorted object keys.
//!
//! Two flavours are provided:
//!
//! - [`stringify`] produces valid JSON and is used wherever a value has to be
//!   compared or hashed as text.
//! - [`stringify_unquoted_keys`] prints object keys bare (`{a: 1, b: "x"}`).
//!   This is the format field keys use for their arguments, so a key built
//!   from literal arguments and one built by substituting variables agree.

use serde_json::Value;

/// Serialize `val` to a JSON string whose object keys are sorted.
pub fn stringify(val: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, val, true);
    out
}

/// Serialize `val` like [`stringify`] but with unquoted object keys and a
/// space after each `:`/`,` inside objects.
pub fn stringify_unquoted_keys(val: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, val, false);
    out
}

fn write_value(out: &mut String, val: &Value, quote_keys: bool) {
    match val {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item, quote_keys);
            }
            out.push(']');
        }
        Value::Object(obj) => {
            let mut keys: Vec<&String> = obj.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push_str(if quote_keys { "," } else { ", " });
                }
                if quote_keys {
                    write_string(out, key);
                    out.push(':');
                } else {
                    out.push_str(key);
                    out.push_str(": ");
                }
                write_value(out, &obj[key.as_str()], quote_keys);
            }
            out.push('}');
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    // serde_json's string serializer handles every escape we need.
    match serde_json::to_string(s) {
        Ok(encoded) => out.push_str(&encoded),
        Err(_) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
    }
}
