//! Addressing: record ids and field keys.
//!
//! Record ids are `Type:value` where `value` joins the configured key fields
//! with `__`. Field keys are the field name followed by its arguments,
//! `friends(first: 10, status: "open")`, with arguments sorted by name.

use graph_cache_util::stable::stringify_unquoted_keys;
use serde_json::{Map, Value};

use crate::config::CacheConfig;

/// Id of the root record every query hangs off.
pub const ROOT_ID: &str = "_ROOT_";

/// Operation variables.
pub type Variables = Map<String, Value>;

fn is_var_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Substitute `$variables` in a raw field key.
///
/// `$` inside a string literal is left alone. Missing variables print as
/// `undefined` so the resulting key can never collide with a real argument.
pub fn evaluate_key(raw: &str, variables: &Variables) -> String {
    if !raw.contains('$') {
        return raw.to_string();
    }
    let mut evaluated = String::with_capacity(raw.len());
    let mut var_name: Option<String> = None;
    let mut in_string = false;

    let flush = |name: &str, out: &mut String| match variables.get(name) {
        Some(value) => out.push_str(&stringify_unquoted_keys(value)),
        None => out.push_str("undefined"),
    };

    for c in raw.chars() {
        if let Some(name) = var_name.as_mut() {
            if is_var_char(c) {
                name.push(c);
                continue;
            }
            flush(name.as_str(), &mut evaluated);
            var_name = None;
        }
        if c == '$' && !in_string {
            var_name = Some(String::new());
            continue;
        }
        if c == '"' {
            in_string = !in_string;
        }
        evaluated.push(c);
    }
    if let Some(name) = var_name {
        flush(name.as_str(), &mut evaluated);
    }
    evaluated
}

/// Build a field key from a field name and already-evaluated arguments.
pub fn compute_key(field: &str, args: Option<&Map<String, Value>>) -> String {
    let Some(args) = args.filter(|a| !a.is_empty()) else {
        return field.to_string();
    };
    let mut names: Vec<&String> = args.keys().collect();
    names.sort();
    let rendered: Vec<String> = names
        .into_iter()
        .map(|name| format!("{}: {}", name, stringify_unquoted_keys(&args[name.as_str()])))
        .collect();
    format!("{}({})", field, rendered.join(", "))
}

/// Text of a key value, or `None` when it cannot identify anything.
fn key_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// The part of a record id after `Type:`.
///
/// `data` is either the record payload or a raw key value (`"1"`, `7`).
pub fn compute_id(config: &CacheConfig, type_name: &str, data: &Value) -> Option<String> {
    if let Some(raw) = key_text(data) {
        return Some(raw);
    }
    let keys = config.key_fields(type_name);
    if keys.is_empty() {
        return None;
    }
    let mut parts = Vec::with_capacity(keys.len());
    for key in keys {
        parts.push(key_text(data.get(key)?)?);
    }
    Some(parts.join("__"))
}

/// Full record id, `None` when the payload is missing a key field.
pub fn record_id(config: &CacheConfig, type_name: &str, data: &Value) -> Option<String> {
    let id = compute_id(config, type_name, data)?;
    Some(format!("{}:{}", type_name, id))
}

/// Whether a payload of `type_name` has to be addressed by its path.
pub fn is_embedded(config: &CacheConfig, type_name: &str, data: &Value) -> bool {
    let keys = config.key_fields(type_name);
    keys.is_empty()
        || keys
            .iter()
            .any(|key| matches!(data.get(key), None | Some(Value::Null)))
}

/// The type prefix of a record id, if it has one.
pub fn type_of_id(id: &str) -> Option<&str> {
    id.split_once(':').map(|(ty, _)| ty)
}
