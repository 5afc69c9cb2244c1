//! A single layer of the store.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use super::{LayerId, LinkValue};

/// Where an insert operation splices its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationLocation {
    Start,
    End,
}

/// A pending change to a link list that has not been materialized into a
/// concrete value yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListOp {
    Insert {
        id: String,
        location: OperationLocation,
    },
    Remove {
        id: String,
    },
}

impl ListOp {
    pub fn target(&self) -> &str {
        match self {
            ListOp::Insert { id, .. } | ListOp::Remove { id } => id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordOperations {
    pub deleted: bool,
    /// Fields in which this (deleted) record was linked again.
    pub undo_deletes_in: HashSet<String>,
    pub fields: HashMap<String, Vec<ListOp>>,
}

/// What a layer knows about one record field.
#[derive(Debug, Clone, Copy)]
pub enum Slot<'a> {
    Scalar(&'a Value),
    Link(&'a LinkValue),
}

/// Pending operations of a layer for one record field.
#[derive(Debug, Clone, Copy)]
pub enum LayerOps<'a> {
    None,
    Deleted,
    Ops(&'a [ListOp]),
}

/// The contents of a layer, separable from its identity so merges can move
/// them between layers.
#[derive(Debug, Clone, Default)]
pub struct LayerData {
    pub fields: HashMap<String, HashMap<String, Value>>,
    pub links: HashMap<String, HashMap<String, LinkValue>>,
    pub operations: HashMap<String, RecordOperations>,
    pub deleted_ids: HashSet<String>,
}

impl LayerData {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
            && self.links.is_empty()
            && self.operations.is_empty()
            && self.deleted_ids.is_empty()
    }

    pub fn get(&self, id: &str, field: &str) -> Option<Slot<'_>> {
        if let Some(link) = self.links.get(id).and_then(|f| f.get(field)) {
            return Some(Slot::Link(link));
        }
        self.fields
            .get(id)
            .and_then(|f| f.get(field))
            .map(Slot::Scalar)
    }

    pub fn operations_for(&self, id: &str, field: &str) -> LayerOps<'_> {
        match self.operations.get(id) {
            Some(ops) if ops.deleted => LayerOps::Deleted,
            Some(ops) => match ops.fields.get(field) {
                Some(list) if !list.is_empty() => LayerOps::Ops(list),
                _ => LayerOps::None,
            },
            None => LayerOps::None,
        }
    }

    /// Whether `deleted` was linked again in `field` after being deleted here.
    pub fn undoes_delete(&self, deleted: &str, field: &str) -> bool {
        self.operations
            .get(deleted)
            .is_some_and(|ops| ops.undo_deletes_in.contains(field))
    }

    pub fn has_insert(&self, id: &str, field: &str, target: &str) -> bool {
        self.operations
            .get(id)
            .and_then(|ops| ops.fields.get(field))
            .is_some_and(|ops| {
                ops.iter()
                    .any(|op| matches!(op, ListOp::Insert { id, .. } if id == target))
            })
    }

    fn revive(&mut self, id: &str) {
        if let Some(ops) = self.operations.get_mut(id) {
            if ops.deleted {
                ops.deleted = false;
                ops.undo_deletes_in.clear();
                self.deleted_ids.remove(id);
            }
        }
    }

    pub fn write_field(&mut self, id: &str, field: &str, value: Value) {
        self.revive(id);
        if let Some(links) = self.links.get_mut(id) {
            links.remove(field);
        }
        self.fields
            .entry(id.to_string())
            .or_default()
            .insert(field.to_string(), value);
    }

    pub fn write_link(&mut self, id: &str, field: &str, value: LinkValue) {
        for linked in value.record_ids() {
            let was_deleted = self.deleted_ids.contains(linked)
                || self.operations.get(linked).is_some_and(|ops| ops.deleted);
            if was_deleted {
                self.operations
                    .entry(linked.to_string())
                    .or_default()
                    .undo_deletes_in
                    .insert(field.to_string());
            }
        }
        // a concrete value supersedes anything queued against it in this layer
        if let Some(ops) = self.operations.get_mut(id) {
            ops.fields.remove(field);
        }
        self.revive(id);
        if let Some(fields) = self.fields.get_mut(id) {
            fields.remove(field);
        }
        self.links
            .entry(id.to_string())
            .or_default()
            .insert(field.to_string(), value);
    }

    pub fn delete_record(&mut self, id: &str) {
        let ops = self.operations.entry(id.to_string()).or_default();
        ops.deleted = true;
        ops.undo_deletes_in.clear();
        self.deleted_ids.insert(id.to_string());
        self.fields.remove(id);
        self.links.remove(id);
    }

    pub fn delete_field(&mut self, id: &str, field: &str) {
        if let Some(fields) = self.fields.get_mut(id) {
            fields.remove(field);
            if fields.is_empty() {
                self.fields.remove(id);
            }
        }
        if let Some(links) = self.links.get_mut(id) {
            links.remove(field);
            if links.is_empty() {
                self.links.remove(id);
            }
        }
        if let Some(ops) = self.operations.get_mut(id) {
            ops.fields.remove(field);
        }
    }

    pub fn insert(&mut self, id: &str, field: &str, location: OperationLocation, target: &str) {
        let ops = self
            .operations
            .entry(id.to_string())
            .or_default()
            .fields
            .entry(field.to_string())
            .or_default();
        ops.retain(|op| !matches!(op, ListOp::Remove { id } if id == target));
        ops.push(ListOp::Insert {
            id: target.to_string(),
            location,
        });
    }

    pub fn remove(&mut self, id: &str, field: &str, target: &str) {
        let ops = self
            .operations
            .entry(id.to_string())
            .or_default()
            .fields
            .entry(field.to_string())
            .or_default();
        ops.retain(|op| !matches!(op, ListOp::Insert { id, .. } if id == target));
        ops.push(ListOp::Remove {
            id: target.to_string(),
        });
    }

    /// Apply queued operations to link lists this layer holds a value for.
    fn materialize(&mut self) {
        for (id, record_ops) in self.operations.iter_mut() {
            let Some(links) = self.links.get_mut(id) else {
                continue;
            };
            record_ops.fields.retain(|field, ops| match links.get_mut(field) {
                Some(value @ LinkValue::List(_)) => {
                    *value = apply_ops(value, ops);
                    false
                }
                _ => true,
            });
        }
    }

    /// Merge a layer that sits directly above this one into it.
    ///
    /// Deletions and queued operations are applied before values are copied
    /// so a record deleted above does not resurface from this layer.
    pub fn absorb(&mut self, mut other: LayerData) {
        other.materialize();

        for (id, incoming) in other.operations {
            if incoming.deleted {
                self.fields.remove(&id);
                self.links.remove(&id);
            }
            for (field, ops) in incoming.fields {
                match self.links.get_mut(&id).and_then(|l| l.get_mut(&field)) {
                    Some(value @ LinkValue::List(_)) => *value = apply_ops(value, &ops),
                    _ => self
                        .operations
                        .entry(id.clone())
                        .or_default()
                        .fields
                        .entry(field)
                        .or_default()
                        .extend(ops),
                }
            }
            let entry = self.operations.entry(id).or_default();
            if incoming.deleted {
                entry.deleted = true;
                entry.undo_deletes_in = incoming.undo_deletes_in;
            } else {
                entry.undo_deletes_in.extend(incoming.undo_deletes_in);
            }
        }

        for (id, values) in other.fields {
            for (field, value) in values {
                self.write_field(&id, &field, value);
            }
        }
        for (id, values) in other.links {
            for (field, value) in values {
                self.write_link(&id, &field, value);
            }
        }
        self.deleted_ids.extend(other.deleted_ids);
    }
}

/// Apply list operations (oldest first) to a concrete list.
pub(crate) fn apply_ops(value: &LinkValue, ops: &[ListOp]) -> LinkValue {
    let LinkValue::List(items) = value else {
        return value.clone();
    };
    let mut items = items.clone();
    for op in ops {
        match op {
            ListOp::Insert { id, location } => {
                if items.iter().any(|item| item.as_record() == Some(id.as_str())) {
                    continue;
                }
                let entry = LinkValue::Record(id.clone());
                match location {
                    OperationLocation::Start => items.insert(0, entry),
                    OperationLocation::End => items.push(entry),
                }
            }
            ListOp::Remove { id } => {
                let removed: HashSet<String> = [id.clone()].into_iter().collect();
                items = match LinkValue::List(items).without(&removed) {
                    LinkValue::List(items) => items,
                    _ => Vec::new(),
                };
            }
        }
    }
    LinkValue::List(items)
}

/// A layer: identity plus contents.
#[derive(Debug, Clone)]
pub struct Layer {
    pub id: LayerId,
    pub optimistic: bool,
    /// Soft-deleted; skipped by reads and dropped at the next compaction.
    pub(crate) retired: bool,
    pub(crate) data: LayerData,
}

impl Layer {
    pub fn new(id: LayerId, optimistic: bool) -> Self {
        Self {
            id,
            optimistic,
            retired: false,
            data: LayerData::default(),
        }
    }

    /// A layer is the display layer for a field when nothing above it defines
    /// the field.
    pub fn is_display_layer(&self, display_layers: &[LayerId]) -> bool {
        display_layers.is_empty()
            || display_layers.contains(&self.id)
            || display_layers.iter().max().is_some_and(|max| *max < self.id)
    }

    pub fn data(&self) -> &LayerData {
        &self.data
    }

    pub fn write_field(&mut self, id: &str, field: &str, value: Value) {
        self.data.write_field(id, field, value);
    }

    pub fn write_link(&mut self, id: &str, field: &str, value: LinkValue) {
        self.data.write_link(id, field, value);
    }

    pub fn insert(&mut self, id: &str, field: &str, location: OperationLocation, target: &str) {
        self.data.insert(id, field, location, target);
    }

    pub fn remove(&mut self, id: &str, field: &str, target: &str) {
        self.data.remove(id, field, target);
    }

    pub fn delete(&mut self, id: &str) {
        self.data.delete_record(id);
    }

    pub fn clear(&mut self) {
        self.data = LayerData::default();
    }

    /// Every (record, field) this layer holds a value or operation for.
    pub fn touched_fields(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (id, fields) in &self.data.fields {
            out.extend(fields.keys().map(|f| (id.clone(), f.clone())));
        }
        for (id, links) in &self.data.links {
            out.extend(links.keys().map(|f| (id.clone(), f.clone())));
        }
        for (id, ops) in &self.data.operations {
            out.extend(ops.fields.keys().map(|f| (id.clone(), f.clone())));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(items: &[&str]) -> LinkValue {
        LinkValue::List(items.iter().map(|s| LinkValue::Record(s.to_string())).collect())
    }

    #[test]
    fn display_layer_rules() {
        let layer = Layer::new(3, false);
        assert!(layer.is_display_layer(&[]));
        assert!(layer.is_display_layer(&[3]));
        assert!(layer.is_display_layer(&[1, 2]));
        assert!(!layer.is_display_layer(&[4]));
    }

    #[test]
    fn link_write_replaces_scalar_and_queued_ops() {
        let mut data = LayerData::default();
        data.write_field("User:1", "friends", json!("oops"));
        data.insert("User:1", "friends", OperationLocation::End, "User:9");
        data.write_link("User:1", "friends", ids(&["User:2"]));
        assert!(matches!(data.get("User:1", "friends"), Some(Slot::Link(_))));
        assert!(matches!(data.operations_for("User:1", "friends"), LayerOps::None));
    }

    #[test]
    fn insert_and_remove_cancel_each_other() {
        let mut data = LayerData::default();
        data.remove("User:1", "friends", "User:2");
        data.insert("User:1", "friends", OperationLocation::End, "User:2");
        let LayerOps::Ops(ops) = data.operations_for("User:1", "friends") else {
            panic!("expected ops");
        };
        assert_eq!(ops.len(), 1);
        assert!(data.has_insert("User:1", "friends", "User:2"));
    }

    #[test]
    fn relinking_a_deleted_record_undoes_the_delete_for_that_field() {
        let mut data = LayerData::default();
        data.delete_record("User:2");
        data.write_link("User:1", "friends", ids(&["User:2"]));
        assert!(data.undoes_delete("User:2", "friends"));
        assert!(!data.undoes_delete("User:2", "enemies"));
    }

    #[test]
    fn writing_a_deleted_record_revives_it() {
        let mut data = LayerData::default();
        data.delete_record("User:2");
        assert!(matches!(data.operations_for("User:2", "name"), LayerOps::Deleted));
        data.write_field("User:2", "name", json!("back"));
        assert!(matches!(data.operations_for("User:2", "name"), LayerOps::None));
        assert!(!data.deleted_ids.contains("User:2"));
    }

    #[test]
    fn absorb_applies_deletes_before_values() {
        let mut base = LayerData::default();
        base.write_field("User:1", "name", json!("old"));
        base.write_field("User:2", "name", json!("keep"));
        base.write_link("_ROOT_", "users", ids(&["User:1", "User:2"]));

        let mut upper = LayerData::default();
        upper.delete_record("User:1");
        upper.insert("_ROOT_", "users", OperationLocation::Start, "User:3");
        upper.write_field("User:3", "name", json!("new"));

        base.absorb(upper);
        assert!(base.get("User:1", "name").is_none());
        assert!(base.deleted_ids.contains("User:1"));
        let Some(Slot::Link(users)) = base.get("_ROOT_", "users") else {
            panic!("expected link");
        };
        assert_eq!(users, &ids(&["User:3", "User:1", "User:2"]));
        assert!(matches!(base.get("User:3", "name"), Some(Slot::Scalar(v)) if v == "new"));
    }

    #[test]
    fn apply_ops_preserves_order() {
        let value = ids(&["b"]);
        let ops = vec![
            ListOp::Insert { id: "c".into(), location: OperationLocation::End },
            ListOp::Insert { id: "a".into(), location: OperationLocation::Start },
            ListOp::Insert { id: "d".into(), location: OperationLocation::End },
            ListOp::Insert { id: "b".into(), location: OperationLocation::End },
            ListOp::Remove { id: "c".into() },
        ];
        assert_eq!(apply_ops(&value, &ops), ids(&["a", "b", "d"]));
    }
}
