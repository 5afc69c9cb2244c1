//! Registry of named lists.
//!
//! A list is a list-annotated field on one record. Lists are registered the
//! first time a subscription or a display-layer write touches them and are
//! looked up by name, optionally narrowed to one owning record.

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::CacheError;
use crate::key::{type_of_id, Variables};
use crate::selection::{evaluate_arguments, FieldSelection, Selection};

/// One registered list.
#[derive(Debug, Clone, PartialEq)]
pub struct List {
    pub name: String,
    /// Record that owns the field.
    pub record_id: String,
    /// Field key of the list on its owner.
    pub key: String,
    /// Type of the list entries (the node type for connections).
    pub list_type: String,
    pub connection: bool,
    /// Selection of the list field itself, `edges { node }` for connections.
    pub selection: Rc<Selection>,
    /// Evaluated filter arguments, if the field declares any.
    pub filters: Option<Map<String, Value>>,
}

impl List {
    /// The list declared by `field` on `record_id` under the evaluated `key`,
    /// if the field is list-annotated.
    pub fn from_field(
        record_id: &str,
        key: &str,
        field: &FieldSelection,
        variables: &Variables,
    ) -> Option<Self> {
        let meta = field.list.as_ref()?;
        let selection = field.selection()?.clone();
        let filters = (!field.filters.is_empty())
            .then(|| evaluate_arguments(&field.filters, variables));
        Some(Self {
            name: meta.name.clone(),
            record_id: record_id.to_string(),
            key: key.to_string(),
            list_type: meta.type_name.clone(),
            connection: meta.connection,
            selection,
            filters,
        })
    }
}

#[derive(Debug, Default)]
pub struct ListManager {
    /// name → owner id → the lists of that owner (one per field key).
    lists: HashMap<String, IndexMap<String, Vec<List>>>,
    /// owner id → field key → list names registered on it.
    by_field: HashMap<String, HashMap<String, Vec<String>>>,
}

impl ListManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, list: List) {
        let collection = self
            .lists
            .entry(list.name.clone())
            .or_default()
            .entry(list.record_id.clone())
            .or_default();
        if let Some(existing) = collection.iter_mut().find(|l| l.key == list.key) {
            *existing = list;
            return;
        }
        debug!(name = %list.name, record = %list.record_id, key = %list.key, "registered list");
        let names = self
            .by_field
            .entry(list.record_id.clone())
            .or_default()
            .entry(list.key.clone())
            .or_default();
        if !names.contains(&list.name) {
            names.push(list.name.clone());
        }
        collection.push(list);
    }

    pub fn is_registered(&self, record: &str, field: &str) -> bool {
        self.by_field
            .get(record)
            .and_then(|f| f.get(field))
            .is_some_and(|names| !names.is_empty())
    }

    /// Look up the lists registered under `name`.
    ///
    /// `parent` is either a full record id or the raw key of an owner, which
    /// is prefixed with the owners' type. Without `parent` the name must have
    /// exactly one owner unless `all_lists` is set. Returns `None` when no
    /// list matches.
    pub fn get(
        &self,
        name: &str,
        parent: Option<&str>,
        all_lists: bool,
    ) -> Result<Option<Vec<List>>, CacheError> {
        let Some(owners) = self.lists.get(name).filter(|owners| !owners.is_empty()) else {
            return Ok(None);
        };
        if all_lists {
            return Ok(Some(owners.values().flatten().cloned().collect()));
        }
        let Some(parent) = parent else {
            if owners.len() > 1 {
                return Err(CacheError::AmbiguousList {
                    name: name.to_string(),
                });
            }
            return Ok(owners.values().next().cloned());
        };
        if let Some(lists) = owners.get(parent) {
            return Ok(Some(lists.clone()));
        }
        let resolved = owners
            .keys()
            .find_map(|owner| type_of_id(owner))
            .map(|type_name| format!("{}:{}", type_name, parent));
        Ok(resolved.and_then(|id| owners.get(&id).cloned()))
    }

    /// Every registered list.
    pub fn all(&self) -> Vec<List> {
        self.lists
            .values()
            .flat_map(|owners| owners.values().flatten().cloned())
            .collect()
    }

    /// Forget the lists registered on one field.
    pub fn delete_field(&mut self, record: &str, field: &str) {
        let Some(names) = self.by_field.get_mut(record).and_then(|f| f.remove(field)) else {
            return;
        };
        if self.by_field.get(record).is_some_and(HashMap::is_empty) {
            self.by_field.remove(record);
        }
        for name in names {
            let Some(owners) = self.lists.get_mut(&name) else {
                continue;
            };
            if let Some(collection) = owners.get_mut(record) {
                collection.retain(|list| list.key != field);
                if collection.is_empty() {
                    owners.shift_remove(record);
                }
            }
            if owners.is_empty() {
                self.lists.remove(&name);
            }
        }
    }

    /// Forget every list owned by `record`.
    pub fn forget_record(&mut self, record: &str) {
        let fields: Vec<String> = self
            .by_field
            .get(record)
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default();
        for field in fields {
            self.delete_field(record, &field);
        }
    }

    pub fn reset(&mut self) {
        self.lists.clear();
        self.by_field.clear();
    }
}
