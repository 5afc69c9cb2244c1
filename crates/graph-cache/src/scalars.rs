//! Custom scalar conversion over a selection tree.
//!
//! Payloads are stored exactly as they arrive from the network. Hosts that
//! want richer values (dates, decimals) convert them on the way out with
//! [`unmarshal_selection`] and back on the way in with [`marshal_selection`],
//! using the codecs registered in [`CacheConfig`].

use serde_json::{Map, Value};

use crate::config::{CacheConfig, ScalarCodec};
use crate::selection::{Selection, TYPENAME};

#[derive(Clone, Copy)]
enum Direction {
    Marshal,
    Unmarshal,
}

impl Direction {
    fn apply(self, codec: &ScalarCodec, value: &Value) -> Value {
        match self {
            Direction::Marshal => (codec.marshal)(value),
            Direction::Unmarshal => (codec.unmarshal)(value),
        }
    }
}

/// Convert custom scalars in `data` to their wire form.
pub fn marshal_selection(config: &CacheConfig, selection: &Selection, data: &Value) -> Value {
    convert_record(config, selection, data, Direction::Marshal)
}

/// Convert custom scalars in `data` from their wire form.
pub fn unmarshal_selection(config: &CacheConfig, selection: &Selection, data: &Value) -> Value {
    convert_record(config, selection, data, Direction::Unmarshal)
}

fn convert_record(
    config: &CacheConfig,
    selection: &Selection,
    data: &Value,
    direction: Direction,
) -> Value {
    let Value::Object(object) = data else {
        return data.clone();
    };
    let typename = object.get(TYPENAME).and_then(Value::as_str);
    let fields = selection.fields_for_type(typename, false);
    let converted: Map<String, Value> = object
        .iter()
        .map(|(attribute, value)| {
            let value = match fields.get(attribute) {
                Some(field) => match field.selection() {
                    Some(inner) => convert_nested(value, &|entry| {
                        convert_record(config, inner, entry, direction)
                    }),
                    None => match config.scalars.get(&field.type_name) {
                        Some(codec) => {
                            convert_nested(value, &|entry| direction.apply(codec, entry))
                        }
                        None => value.clone(),
                    },
                },
                None => value.clone(),
            };
            (attribute.clone(), value)
        })
        .collect();
    Value::Object(converted)
}

/// Apply `convert` to every non-null leaf of a (possibly nested) list.
fn convert_nested(value: &Value, convert: &dyn Fn(&Value) -> Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| convert_nested(item, convert)).collect())
        }
        other => convert(other),
    }
}
