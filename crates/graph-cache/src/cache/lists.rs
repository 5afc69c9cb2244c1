//! List mutations.
//!
//! Adding to a list is a miniature write: the entry is wrapped in a
//! selection that targets the list field itself with an update mode, so the
//! general write engine does the merging, subscription wiring and
//! notification. Connections get an extra `edges { node }` wrapper.

use graph_cache_util::stable::stringify;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{Cache, WriteOptions};
use crate::error::CacheError;
use crate::key::{record_id, Variables};
use crate::lists::List;
use crate::selection::{FieldSelection, ListWhen, Position, Selection, UpdateMode, TYPENAME};
use crate::storage::{LayerId, LinkValue};
use crate::subscription::{ListenerId, NotifySet};

const LIST_UPDATES: [UpdateMode; 2] = [UpdateMode::Append, UpdateMode::Prepend];

fn with_typename(selection: &Selection) -> Selection {
    let mut selection = selection.clone();
    if !selection.fields.contains_key(TYPENAME) {
        selection
            .fields
            .insert(TYPENAME.to_string(), FieldSelection::scalar("String", TYPENAME));
    }
    selection
}

fn entry_with_typename(list: &List, data: &Value) -> Value {
    let mut entry = data.as_object().cloned().unwrap_or_default();
    if !entry.contains_key(TYPENAME) {
        entry.insert(TYPENAME.to_string(), Value::String(list.list_type.clone()));
    }
    Value::Object(entry)
}

/// The selection and payload that add `data` to `list`.
fn insertion(list: &List, selection: &Selection, data: &Value) -> (Selection, Value) {
    let node_selection = with_typename(selection);
    let entry = entry_with_typename(list, data);
    if list.connection {
        let edges = FieldSelection::link(
            "ConnectionEdge",
            "edges",
            Selection::new().with_field(
                "node",
                FieldSelection::link(&list.list_type, "node", node_selection),
            ),
        )
        .with_updates(&LIST_UPDATES);
        let selection = Selection::new().with_field(
            "newEntry",
            FieldSelection::link(
                "Connection",
                &list.key,
                Selection::new().with_field("edges", edges),
            ),
        );
        (selection, json!({"newEntry": {"edges": [{"node": entry}]}}))
    } else {
        let selection = Selection::new().with_field(
            "newEntries",
            FieldSelection::link(&list.list_type, &list.key, node_selection)
                .with_updates(&LIST_UPDATES),
        );
        (selection, json!({"newEntries": [entry]}))
    }
}

fn passes(list: &List, when: Option<&ListWhen>) -> bool {
    let ok = when.map_or(true, |when| when.matches(list.filters.as_ref()));
    if !ok {
        let filters = list
            .filters
            .as_ref()
            .map(|filters| stringify(&Value::Object(filters.clone())))
            .unwrap_or_default();
        debug!(list = %list.name, record = %list.record_id, %filters, "list operation filtered out");
    }
    ok
}

impl Cache {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn list_add(
        &mut self,
        lists: &[List],
        when: Option<&ListWhen>,
        selection: &Selection,
        data: &Value,
        variables: &Variables,
        position: Position,
        layer: Option<LayerId>,
    ) -> Result<NotifySet, CacheError> {
        let mode = match position {
            Position::First => UpdateMode::Prepend,
            Position::Last => UpdateMode::Append,
        };
        let mut notify = NotifySet::new();
        for list in lists.iter().filter(|list| passes(list, when)) {
            let (selection, payload) = insertion(list, selection, data);
            let written = self.write(
                WriteOptions::new(&selection, &payload)
                    .with_parent(list.record_id.clone())
                    .with_variables(variables.clone())
                    .with_layer(layer)
                    .with_updates(&[mode]),
            )?;
            notify.extend(written);
        }
        Ok(notify)
    }

    /// Remove the record `data` identifies from every list that passes.
    pub(crate) fn list_remove(
        &mut self,
        lists: &[List],
        when: Option<&ListWhen>,
        data: &Value,
        variables: &Variables,
        layer: Option<LayerId>,
    ) -> Result<NotifySet, CacheError> {
        let mut notify = NotifySet::new();
        for list in lists.iter().filter(|list| passes(list, when)) {
            let Some(id) = self.entry_id(list, data) else {
                continue;
            };
            if let Some(removed) = self.list_remove_id(list, &id, variables, layer)? {
                notify.extend(removed);
            }
        }
        Ok(notify)
    }

    /// Remove `data` from each list that holds it and add it to the others.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn list_toggle(
        &mut self,
        lists: &[List],
        when: Option<&ListWhen>,
        selection: &Selection,
        data: &Value,
        variables: &Variables,
        position: Position,
        layer: Option<LayerId>,
    ) -> Result<NotifySet, CacheError> {
        let mut notify = NotifySet::new();
        for list in lists.iter().filter(|list| passes(list, when)) {
            let removed = match self.entry_id(list, data) {
                Some(id) => self.list_remove_id(list, &id, variables, layer)?,
                None => None,
            };
            match removed {
                Some(removed) => notify.extend(removed),
                None => notify.extend(self.list_add(
                    std::slice::from_ref(list),
                    None,
                    selection,
                    data,
                    variables,
                    position,
                    layer,
                )?),
            }
        }
        Ok(notify)
    }

    fn entry_id(&self, list: &List, data: &Value) -> Option<String> {
        let type_name = data
            .get(TYPENAME)
            .and_then(Value::as_str)
            .unwrap_or(&list.list_type);
        record_id(&self.config, type_name, data)
    }

    /// Remove one record id from a list. Returns `None` when the list did not
    /// contain it.
    pub(crate) fn list_remove_id(
        &mut self,
        list: &List,
        id: &str,
        variables: &Variables,
        layer: Option<LayerId>,
    ) -> Result<Option<NotifySet>, CacheError> {
        let (parent, key, target) = if list.connection {
            let Some(connection) = self
                .storage
                .get(&list.record_id, &list.key)
                .link()
                .and_then(LinkValue::as_record)
                .map(str::to_string)
            else {
                return Ok(None);
            };
            let edges = self.storage.get(&connection, "edges");
            let target = edges
                .link()
                .map(LinkValue::record_ids)
                .unwrap_or_default()
                .into_iter()
                .find(|edge| {
                    self.storage
                        .get(edge, "node")
                        .link()
                        .and_then(LinkValue::as_record)
                        == Some(id)
                })
                .map(str::to_string)
                .unwrap_or_else(|| id.to_string());
            (connection, "edges".to_string(), target)
        } else {
            (list.record_id.clone(), list.key.clone(), id.to_string())
        };

        let present = self
            .storage
            .get(&parent, &key)
            .link()
            .is_some_and(|links| links.contains(&target));
        if !present {
            return Ok(None);
        }

        let subscribers = self.subscriptions.get(&list.record_id, &list.key);
        let targets: Vec<ListenerId> = subscribers.iter().map(|(spec, _)| spec.id()).collect();
        let entry_selection = if list.connection {
            list.selection
                .fields
                .get("edges")
                .and_then(FieldSelection::selection)
                .cloned()
                .unwrap_or_else(|| list.selection.clone())
        } else {
            list.selection.clone()
        };
        self.remove_subscribers(&target, &entry_selection, &targets, variables);

        let layer = match layer {
            Some(layer) => layer,
            None => self.storage.top_layer(),
        };
        self.storage.remove(layer, &parent, &key, &target)?;
        debug!(list = %list.name, record = %list.record_id, target = %target, "removed from list");

        let mut notify = NotifySet::new();
        notify.extend(subscribers.into_iter().map(|(spec, _)| spec));
        Ok(Some(notify))
    }

    /// Remove `id` from every registered list that holds it.
    pub fn remove_id_from_all_lists(
        &mut self,
        id: &str,
        layer: Option<LayerId>,
    ) -> Result<NotifySet, CacheError> {
        let mut notify = NotifySet::new();
        for list in self.lists.all() {
            if let Some(removed) = self.list_remove_id(&list, id, &Variables::new(), layer)? {
                notify.extend(removed);
            }
        }
        Ok(notify)
    }

    /// Member ids of the lists, edges unwrapped for connections.
    pub(crate) fn list_members(&self, lists: &[List]) -> Vec<String> {
        let mut members = Vec::new();
        for list in lists {
            let value = self.storage.get(&list.record_id, &list.key);
            let Some(link) = value.link() else {
                continue;
            };
            if !list.connection {
                members.extend(link.record_ids().into_iter().map(str::to_string));
                continue;
            }
            let Some(connection) = link.as_record() else {
                continue;
            };
            let edges = self.storage.get(connection, "edges");
            for edge in edges.link().map(LinkValue::record_ids).unwrap_or_default() {
                let node = self.storage.get(edge, "node");
                if let Some(node) = node.link().and_then(LinkValue::as_record) {
                    members.push(node.to_string());
                }
            }
        }
        members
    }
}

/// A named list (or every list of that name), as returned by [`Cache::list`].
///
/// Operations apply to every list in the handle that passes the `when`
/// filter.
pub struct ListHandle<'c> {
    cache: &'c mut Cache,
    lists: Vec<List>,
    when: Option<ListWhen>,
}

impl Cache {
    /// Look up a list by name.
    ///
    /// `parent` narrows the lookup to one owner (raw key or full id);
    /// `all_lists` selects every owner.
    pub fn list(
        &mut self,
        name: &str,
        parent: Option<&str>,
        all_lists: bool,
    ) -> Result<ListHandle<'_>, CacheError> {
        let lists = self
            .lists
            .get(name, parent, all_lists)?
            .ok_or_else(|| CacheError::ListNotFound {
                name: name.to_string(),
            })?;
        Ok(ListHandle {
            cache: self,
            lists,
            when: None,
        })
    }
}

impl ListHandle<'_> {
    pub fn lists(&self) -> &[List] {
        &self.lists
    }

    /// Only touch lists whose filters pass `filter`.
    pub fn when(mut self, filter: ListWhen) -> Self {
        self.when = Some(filter);
        self
    }

    pub fn append(
        &mut self,
        selection: &Selection,
        data: &Value,
        variables: &Variables,
        layer: Option<LayerId>,
    ) -> Result<NotifySet, CacheError> {
        self.add(selection, data, variables, Position::Last, layer)
    }

    pub fn prepend(
        &mut self,
        selection: &Selection,
        data: &Value,
        variables: &Variables,
        layer: Option<LayerId>,
    ) -> Result<NotifySet, CacheError> {
        self.add(selection, data, variables, Position::First, layer)
    }

    pub fn add(
        &mut self,
        selection: &Selection,
        data: &Value,
        variables: &Variables,
        position: Position,
        layer: Option<LayerId>,
    ) -> Result<NotifySet, CacheError> {
        self.cache.list_add(
            &self.lists,
            self.when.as_ref(),
            selection,
            data,
            variables,
            position,
            layer,
        )
    }

    /// Remove the record `data` identifies.
    pub fn remove(
        &mut self,
        data: &Value,
        variables: &Variables,
        layer: Option<LayerId>,
    ) -> Result<NotifySet, CacheError> {
        self.cache
            .list_remove(&self.lists, self.when.as_ref(), data, variables, layer)
    }

    /// Remove a record by id. Returns `None` when no list contained it.
    pub fn remove_id(
        &mut self,
        id: &str,
        variables: &Variables,
        layer: Option<LayerId>,
    ) -> Result<Option<NotifySet>, CacheError> {
        let mut notify: Option<NotifySet> = None;
        for list in self.lists.iter().filter(|list| passes(list, self.when.as_ref())) {
            if let Some(removed) = self.cache.list_remove_id(list, id, variables, layer)? {
                notify.get_or_insert_with(NotifySet::new).extend(removed);
            }
        }
        Ok(notify)
    }

    pub fn toggle(
        &mut self,
        selection: &Selection,
        data: &Value,
        variables: &Variables,
        position: Position,
        layer: Option<LayerId>,
    ) -> Result<NotifySet, CacheError> {
        self.cache.list_toggle(
            &self.lists,
            self.when.as_ref(),
            selection,
            data,
            variables,
            position,
            layer,
        )
    }

    /// Current member ids.
    pub fn iterate(&self) -> Vec<String> {
        self.cache.list_members(&self.lists)
    }

    pub fn len(&self) -> usize {
        self.iterate().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evaluated filter arguments of the first list.
    pub fn filters(&self) -> Option<&Map<String, Value>> {
        self.lists.first().and_then(|list| list.filters.as_ref())
    }
}
