//! Reading a selection back out of storage.
//!
//! The walk tracks three flags while it builds the value: `partial` when a
//! selected field is unknown, `stale` when one was invalidated, and
//! `has_data` once any field is known. A null in a non-nullable field
//! cascades to the enclosing record.

use serde_json::{json, Map, Value};

use super::{Cache, ReadOptions, ReadResult};
use crate::key::{evaluate_key, Variables};
use crate::selection::{FieldSelection, LoadingKind, LoadingList, Selection, TYPENAME};
use crate::storage::{LinkValue, StoredValue};

/// Key of the placeholder object emitted in loading mode.
pub const PENDING_KEY: &str = "$pending";

/// `__typename` of the object that replaces a missing required field inside
/// an abstract selection.
pub const REQUIRED_SENTINEL: &str = "@required field missing; don't match this";

/// `{"$pending": true}`
pub fn pending_value() -> Value {
    json!({ PENDING_KEY: true })
}

#[derive(Default)]
struct ReadState {
    partial: bool,
    stale: bool,
    has_data: bool,
}

/// Steps since the last connection boundary, or `None` once past the edges.
fn next_steps(steps: Option<u32>, field: &FieldSelection) -> Option<u32> {
    if field.list.as_ref().is_some_and(|list| list.connection) {
        return Some(0);
    }
    match steps {
        Some(n) if n < 2 => Some(n + 1),
        _ => None,
    }
}

fn placeholders(list: LoadingList, entry: Value) -> Value {
    (0..list.depth).fold(entry, |inner, _| {
        Value::Array(vec![inner; list.count as usize])
    })
}

impl Cache {
    pub fn read(&self, options: ReadOptions<'_>) -> ReadResult {
        let mut state = ReadState::default();
        let data = self.read_selection(
            &mut state,
            &options,
            options.selection,
            &options.parent,
            None,
            options.loading,
        );
        ReadResult {
            data,
            partial: !options.loading && state.has_data && state.partial,
            stale: state.has_data && state.stale,
            has_data: state.has_data,
        }
    }

    /// The data a query may be answered with from the cache, if any.
    ///
    /// `None` when nothing is cached, when any of it is stale, or when it is
    /// partial and the configuration does not accept partial data.
    pub fn cached_data(
        &self,
        selection: &Selection,
        parent: &str,
        variables: Variables,
    ) -> Option<Value> {
        let result = self.read(
            ReadOptions::new(selection)
                .with_parent(parent)
                .with_variables(variables),
        );
        let usable = !result.data.is_null()
            && !result.stale
            && (!result.partial || self.config.default_partial);
        usable.then_some(result.data)
    }

    fn read_selection(
        &self,
        state: &mut ReadState,
        options: &ReadOptions<'_>,
        selection: &Selection,
        parent: &str,
        steps: Option<u32>,
        loading: bool,
    ) -> Value {
        let stored_type = self.storage.get(parent, TYPENAME);
        let typename = stored_type.scalar().and_then(Value::as_str);
        let fields = selection.fields_for_type(typename, loading);

        let mut target = Map::new();
        let mut cascade = false;
        for (attribute, field) in fields {
            if !field.visible && !options.ignore_masking && !options.full_check {
                continue;
            }
            if !field.included(&options.variables) {
                continue;
            }
            let emit = field.visible || options.ignore_masking;

            if loading {
                if field.loading.is_some() && emit {
                    let value = self.loading_value(state, options, field, parent, steps);
                    target.insert(attribute.clone(), value);
                }
                continue;
            }

            let key = evaluate_key(&field.key_raw, &options.variables);
            let embedded_cursor = key == "cursor" && steps == Some(1);
            let child_steps = next_steps(steps, field);
            if self.stale.is_field_stale(parent, &key) {
                state.stale = true;
            }

            let lookup = self.storage.get(parent, &key);
            let value = match (&lookup.value, field.selection()) {
                (None, _) => {
                    if !embedded_cursor {
                        state.partial = true;
                    }
                    Value::Null
                }
                (Some(StoredValue::Scalar(value)), _) => {
                    state.has_data = true;
                    value.clone()
                }
                (Some(StoredValue::Link(link)), Some(inner)) => {
                    state.has_data = true;
                    self.hydrate_link(state, options, field, inner, link, child_steps)
                }
                (Some(StoredValue::Link(_)), None) => {
                    state.has_data = true;
                    Value::Null
                }
            };

            if !emit {
                continue;
            }
            if value.is_null() && !field.nullable && !embedded_cursor {
                if field.abstract_has_required() {
                    target.insert(attribute.clone(), json!({ TYPENAME: REQUIRED_SENTINEL }));
                } else {
                    cascade = true;
                    target.insert(attribute.clone(), Value::Null);
                }
                continue;
            }
            target.insert(attribute.clone(), value);
        }

        if cascade {
            Value::Null
        } else {
            Value::Object(target)
        }
    }

    /// Resolve a stored link (possibly a nested list) into data.
    fn hydrate_link(
        &self,
        state: &mut ReadState,
        options: &ReadOptions<'_>,
        field: &FieldSelection,
        selection: &Selection,
        link: &LinkValue,
        steps: Option<u32>,
    ) -> Value {
        match link {
            LinkValue::Null => Value::Null,
            LinkValue::Record(id) => {
                self.read_selection(state, options, selection, id, steps, false)
            }
            LinkValue::List(items) => {
                let entries: Vec<Value> = items
                    .iter()
                    .map(|item| self.hydrate_link(state, options, field, selection, item, steps))
                    .collect();
                if !field.nullable && entries.iter().any(Value::is_null) {
                    Value::Null
                } else {
                    Value::Array(entries)
                }
            }
        }
    }

    fn loading_value(
        &self,
        state: &mut ReadState,
        options: &ReadOptions<'_>,
        field: &FieldSelection,
        parent: &str,
        steps: Option<u32>,
    ) -> Value {
        let Some(directive) = &field.loading else {
            return Value::Null;
        };
        let entry = match (directive.kind, field.selection()) {
            (LoadingKind::Continue, Some(inner)) => {
                self.read_selection(state, options, inner, parent, steps, true)
            }
            _ => pending_value(),
        };
        match directive.list {
            Some(list) => placeholders(list, entry),
            None => entry,
        }
    }
}
