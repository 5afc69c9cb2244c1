//! Layered record storage.
//!
//! # Overview
//!
//! [`Storage`] keeps an ordered stack of [`Layer`]s, oldest first. The bottom
//! layer holds committed data; layers above it are either plain
//! (non-optimistic) write targets or optimistic overlays holding the
//! speculative result of a mutation that has not been confirmed yet.
//!
//! - Reads ([`Storage::get`]) walk the stack newest to oldest and return the
//!   first concrete value, splicing in list operations queued by the layers
//!   above it.
//! - Writes go to an explicit layer, or to [`Storage::top_layer`], which is
//!   always non-optimistic.
//! - [`Storage::resolve_layer`] merges a run of non-optimistic layers into
//!   one; [`Storage::clear_layer`] discards a layer.
//!
//! The stack is an append-only arena: layers removed by a merge or clear are
//! only marked retired and get compacted away at the start of the next stack
//! mutation.

mod layer;

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::CacheError;

pub use layer::{Layer, LayerData, LayerOps, ListOp, OperationLocation, RecordOperations, Slot};

/// Layer identifier. Strictly increasing, never reused.
pub type LayerId = u64;

/// A link: nothing, one record, or a (possibly nested) list of links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LinkValue {
    Null,
    Record(String),
    List(Vec<LinkValue>),
}

impl LinkValue {
    pub fn as_record(&self) -> Option<&str> {
        match self {
            LinkValue::Record(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, LinkValue::List(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, LinkValue::Null)
    }

    /// Every record id referenced, nested lists flattened.
    pub fn record_ids(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_ids(&mut out);
        out
    }

    fn collect_ids<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            LinkValue::Null => {}
            LinkValue::Record(id) => out.push(id),
            LinkValue::List(items) => items.iter().for_each(|item| item.collect_ids(out)),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        match self {
            LinkValue::Null => false,
            LinkValue::Record(own) => own == id,
            LinkValue::List(items) => items.iter().any(|item| item.contains(id)),
        }
    }

    /// A copy with every entry in `removed` dropped, at any nesting level.
    pub fn without(&self, removed: &HashSet<String>) -> LinkValue {
        match self {
            LinkValue::List(items) => LinkValue::List(
                items
                    .iter()
                    .filter(|item| !matches!(item, LinkValue::Record(id) if removed.contains(id)))
                    .map(|item| item.without(removed))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        LinkValue::List(ids.into_iter().map(|id| LinkValue::Record(id.into())).collect())
    }
}

/// A field value as stored.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Scalar(Value),
    Link(LinkValue),
}

impl StoredValue {
    pub fn as_link(&self) -> Option<&LinkValue> {
        match self {
            StoredValue::Link(link) => Some(link),
            StoredValue::Scalar(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(
            self,
            StoredValue::Scalar(Value::Null) | StoredValue::Link(LinkValue::Null)
        )
    }
}

/// Result of a point read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldLookup {
    /// `None` when the field is unknown (never written, evicted or deleted).
    pub value: Option<StoredValue>,
    /// Layers that contributed to the value.
    pub display_layers: Vec<LayerId>,
}

impl FieldLookup {
    fn unknown() -> Self {
        Self::default()
    }

    pub fn link(&self) -> Option<&LinkValue> {
        self.value.as_ref().and_then(StoredValue::as_link)
    }

    pub fn scalar(&self) -> Option<&Value> {
        match &self.value {
            Some(StoredValue::Scalar(v)) => Some(v),
            _ => None,
        }
    }
}

/// Flat snapshot of the committed layer.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    fields: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default)]
    links: BTreeMap<String, BTreeMap<String, LinkValue>>,
}

#[derive(Debug)]
pub struct Storage {
    layers: Vec<Layer>,
    next_layer_id: LayerId,
    rank: u64,
    id_maps: HashMap<String, String>,
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage {
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            next_layer_id: 1,
            rank: 0,
            id_maps: HashMap::new(),
        }
    }

    /// Next rank for embedded list entries.
    pub fn next_rank(&mut self) -> u64 {
        let rank = self.rank;
        self.rank += 1;
        rank
    }

    fn active(&self) -> impl DoubleEndedIterator<Item = &Layer> {
        self.layers.iter().filter(|layer| !layer.retired)
    }

    /// Drop retired layers from the arena.
    fn compact(&mut self) {
        self.layers.retain(|layer| !layer.retired);
    }

    pub fn layer_count(&self) -> usize {
        self.active().count()
    }

    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.active().map(|layer| layer.id).collect()
    }

    pub fn has_optimistic_layers(&self) -> bool {
        self.active().any(|layer| layer.optimistic)
    }

    pub fn create_layer(&mut self, optimistic: bool) -> LayerId {
        self.compact();
        let id = self.next_layer_id;
        self.next_layer_id += 1;
        self.layers.push(Layer::new(id, optimistic));
        debug!(layer = id, optimistic, "created cache layer");
        id
    }

    /// The layer default writes go to: the topmost layer, or a fresh
    /// non-optimistic one when the top is optimistic (or the stack is empty).
    pub fn top_layer(&mut self) -> LayerId {
        let top = self.active().last().map(|layer| (layer.id, layer.optimistic));
        match top {
            Some((id, false)) => id,
            _ => self.create_layer(false),
        }
    }

    pub fn layer(&self, id: LayerId) -> Result<&Layer, CacheError> {
        self.active()
            .find(|layer| layer.id == id)
            .ok_or(CacheError::LayerNotFound(id))
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Result<&mut Layer, CacheError> {
        self.layers
            .iter_mut()
            .find(|layer| layer.id == id && !layer.retired)
            .ok_or(CacheError::LayerNotFound(id))
    }

    pub fn register_id_mapping(&mut self, from: &str, to: &str) {
        self.id_maps.insert(from.to_string(), to.to_string());
        self.id_maps.insert(to.to_string(), from.to_string());
    }

    pub fn alias(&self, id: &str) -> Option<&str> {
        self.id_maps.get(id).map(String::as_str)
    }

    /// Read the visible value of a field.
    pub fn get(&self, id: &str, field: &str) -> FieldLookup {
        let alias = self.alias(id);
        let mut front: Vec<String> = Vec::new();
        let mut back: Vec<String> = Vec::new();
        let mut removed: HashSet<String> = HashSet::new();
        let mut display_layers = Vec::new();

        for layer in self.active().rev() {
            let data = layer.data();
            let (record, slot) = match data.get(id, field) {
                Some(slot) => (id, Some(slot)),
                None => match alias.and_then(|a| data.get(a, field).map(|slot| (a, slot))) {
                    Some((a, slot)) => (a, Some(slot)),
                    None => (id, None),
                },
            };

            for deleted in &data.deleted_ids {
                if !data.undoes_delete(deleted, field) {
                    removed.insert(deleted.clone());
                }
            }

            let ops: &[ListOp] = match data.operations_for(record, field) {
                LayerOps::Deleted => return FieldLookup::unknown(),
                LayerOps::Ops(ops) => ops,
                LayerOps::None => &[],
            };

            if slot.is_none() && ops.is_empty() {
                if !data.deleted_ids.is_empty() {
                    display_layers.push(layer.id);
                }
                continue;
            }

            match slot {
                Some(Slot::Scalar(value)) => {
                    return FieldLookup {
                        value: Some(StoredValue::Scalar(value.clone())),
                        display_layers: vec![layer.id],
                    }
                }
                Some(Slot::Link(link)) if !link.is_list() => {
                    return FieldLookup {
                        value: Some(StoredValue::Link(link.clone())),
                        display_layers: vec![layer.id],
                    }
                }
                _ => {}
            }

            display_layers.push(layer.id);

            // newer layers come first in the walk; their prepends go in front
            // of older ones and their appends after
            let mut layer_front = Vec::new();
            let mut layer_back = Vec::new();
            for op in ops {
                match op {
                    ListOp::Insert { id, location: OperationLocation::Start } => {
                        layer_front.insert(0, id.clone())
                    }
                    ListOp::Insert { id, location: OperationLocation::End } => {
                        layer_back.push(id.clone())
                    }
                    ListOp::Remove { id } => {
                        removed.insert(id.clone());
                    }
                }
            }
            front.append(&mut layer_front);
            layer_back.append(&mut back);
            back = layer_back;

            let Some(Slot::Link(LinkValue::List(items))) = slot else {
                continue;
            };

            if front.is_empty() && back.is_empty() && removed.is_empty() {
                return FieldLookup {
                    value: Some(StoredValue::Link(LinkValue::List(items.clone()))),
                    display_layers,
                };
            }

            let existing = LinkValue::List(items.clone());
            let mut seen: HashSet<&str> = HashSet::new();
            let mut spliced = Vec::with_capacity(front.len() + items.len() + back.len());
            for inserted in &front {
                if !existing.contains(inserted) && seen.insert(inserted) {
                    spliced.push(LinkValue::Record(inserted.clone()));
                }
            }
            spliced.extend(items.iter().cloned());
            for inserted in &back {
                if !existing.contains(inserted) && seen.insert(inserted) {
                    spliced.push(LinkValue::Record(inserted.clone()));
                }
            }
            return FieldLookup {
                value: Some(StoredValue::Link(LinkValue::List(spliced).without(&removed))),
                display_layers,
            };
        }

        FieldLookup::unknown()
    }

    /// Whether some layer has an uncommitted insert of `target` into the list.
    pub fn pending_insert(&self, id: &str, field: &str, target: &str) -> bool {
        self.active()
            .any(|layer| layer.data().has_insert(id, field, target))
    }

    pub fn write_field(&mut self, layer: LayerId, id: &str, field: &str, value: Value) -> Result<(), CacheError> {
        self.layer_mut(layer)?.write_field(id, field, value);
        Ok(())
    }

    pub fn write_link(&mut self, layer: LayerId, id: &str, field: &str, value: LinkValue) -> Result<(), CacheError> {
        self.layer_mut(layer)?.write_link(id, field, value);
        Ok(())
    }

    pub fn insert(
        &mut self,
        layer: LayerId,
        id: &str,
        field: &str,
        location: OperationLocation,
        target: &str,
    ) -> Result<(), CacheError> {
        self.layer_mut(layer)?.insert(id, field, location, target);
        Ok(())
    }

    pub fn remove(&mut self, layer: LayerId, id: &str, field: &str, target: &str) -> Result<(), CacheError> {
        self.layer_mut(layer)?.remove(id, field, target);
        Ok(())
    }

    /// Tombstone a record in a layer.
    pub fn delete(&mut self, layer: LayerId, id: &str) -> Result<(), CacheError> {
        self.layer_mut(layer)?.delete(id);
        Ok(())
    }

    /// Forget a field in every layer.
    pub fn delete_field(&mut self, id: &str, field: &str) {
        for layer in self.layers.iter_mut() {
            layer.data.delete_field(id, field);
        }
    }

    /// Merge the run of non-optimistic layers around `id` into one.
    pub fn resolve_layer(&mut self, id: LayerId) -> Result<(), CacheError> {
        self.compact();
        let index = self
            .layers
            .iter()
            .position(|layer| layer.id == id)
            .ok_or(CacheError::LayerNotFound(id))?;
        self.layers[index].optimistic = false;

        let mut start = index.saturating_sub(1);
        if self.layers[start].optimistic {
            start += 1;
        }
        let mut end = start + 1;
        while end < self.layers.len() && !self.layers[end].optimistic {
            end += 1;
        }

        for i in start + 1..end {
            let data = std::mem::take(&mut self.layers[i].data);
            self.layers[i].retired = true;
            self.layers[start].data.absorb(data);
        }

        if !self.has_optimistic_layers() {
            self.id_maps.clear();
        }
        debug!(
            layer = id,
            into = self.layers[start].id,
            merged = end - start - 1,
            "resolved cache layer"
        );
        Ok(())
    }

    /// Discard a layer and its contents.
    pub fn clear_layer(&mut self, id: LayerId) -> Result<(), CacheError> {
        self.compact();
        let layer = self.layer_mut(id)?;
        layer.clear();
        layer.retired = true;
        if !self.has_optimistic_layers() {
            self.id_maps.clear();
        }
        debug!(layer = id, "cleared cache layer");
        Ok(())
    }

    /// Drop every layer.
    pub fn reset(&mut self) {
        self.layers.clear();
        self.id_maps.clear();
    }

    /// Serialize the committed (bottom) layer.
    pub fn serialize(&self) -> Result<String, CacheError> {
        let mut snapshot = Snapshot::default();
        if let Some(base) = self.active().next() {
            for (id, fields) in &base.data().fields {
                snapshot.fields.insert(
                    id.clone(),
                    fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                );
            }
            for (id, links) in &base.data().links {
                snapshot.links.insert(
                    id.clone(),
                    links.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                );
            }
        }
        Ok(serde_json::to_string(&snapshot)?)
    }

    /// Load a snapshot produced by [`Storage::serialize`] into the bottom
    /// layer.
    pub fn hydrate(&mut self, snapshot: &str) -> Result<(), CacheError> {
        let snapshot: Snapshot = serde_json::from_str(snapshot)?;
        let base = self.active().next().map(|layer| layer.id);
        let base = match base {
            Some(id) => id,
            None => self.create_layer(false),
        };
        let layer = self.layer_mut(base)?;
        for (id, fields) in snapshot.fields {
            for (field, value) in fields {
                layer.write_field(&id, &field, value);
            }
        }
        for (id, links) in snapshot.links {
            for (field, value) in links {
                layer.write_link(&id, &field, value);
            }
        }
        Ok(())
    }
}
