use std::collections::HashSet;
use std::rc::Rc;

use serde_json::{Map, Value};
use tracing::{debug, trace};

use super::{Cache, WriteOptions};
use crate::error::CacheError;
use crate::key::{evaluate_key, is_embedded, record_id, Variables};
use crate::lists::List;
use crate::selection::{
    Argument, FieldSelection, ListOperation, OperationAction, Selection, UpdateMode, TYPENAME,
};
use crate::storage::{FieldLookup, LayerId, LinkValue, OperationLocation};
use crate::subscription::{FieldSubscriber, ListenerId, NotifySet};

/// State threaded through one write.
struct WriteContext<'a> {
    variables: &'a Variables,
    layer: LayerId,
    optimistic: bool,
    apply_updates: &'a [UpdateMode],
    force_notify: bool,
    force_stale: bool,
    notify: NotifySet,
    /// (list name, owner, field key, target) already inserted by this write.
    inserted: HashSet<(String, String, String, String)>,
}

/// Everything known about the field being written.
struct FieldWrite<'a> {
    parent: &'a str,
    key: String,
    field: &'a FieldSelection,
    previous: FieldLookup,
    display: bool,
    subscribers: Vec<FieldSubscriber>,
}

impl FieldWrite<'_> {
    fn targets(&self) -> Vec<ListenerId> {
        self.subscribers.iter().map(|(spec, _)| spec.id()).collect()
    }

    fn notify_into(&self, notify: &mut NotifySet) {
        notify.extend(self.subscribers.iter().map(|(spec, _)| spec.clone()));
    }
}

const CONNECTION_FORWARD_FIELDS: [&str; 2] = ["endCursor", "hasNextPage"];
const CONNECTION_BACKWARD_FIELDS: [&str; 2] = ["startCursor", "hasPreviousPage"];

/// The update mode a field applies during this write, if any.
fn update_mode(field: &FieldSelection, apply: &[UpdateMode]) -> Option<UpdateMode> {
    apply
        .iter()
        .copied()
        .find(|mode| *mode == UpdateMode::Replace || field.supports(*mode))
}

fn owned_ids(link: Option<&LinkValue>) -> Vec<String> {
    link.map(|l| l.record_ids().into_iter().map(str::to_string).collect())
        .unwrap_or_default()
}

impl Cache {
    /// Write `data` under `parent` following `selection`.
    ///
    /// Returns the subscriptions that have to be told about the change.
    pub fn write(&mut self, options: WriteOptions<'_>) -> Result<NotifySet, CacheError> {
        let layer = match options.layer {
            Some(layer) => layer,
            None => self.storage.top_layer(),
        };
        let optimistic = self.storage.layer(layer)?.optimistic;
        let mut ctx = WriteContext {
            variables: &options.variables,
            layer,
            optimistic,
            apply_updates: &options.apply_updates,
            force_notify: options.force_notify,
            force_stale: options.force_stale,
            notify: NotifySet::new(),
            inserted: HashSet::new(),
        };
        if let Value::Object(data) = options.data {
            self.write_record(&mut ctx, options.selection, &options.parent, data)?;
        }
        trace!(parent = %options.parent, layer, notified = ctx.notify.len(), "wrote selection");
        Ok(ctx.notify)
    }

    fn write_record(
        &mut self,
        ctx: &mut WriteContext<'_>,
        selection: &Selection,
        parent: &str,
        data: &Map<String, Value>,
    ) -> Result<(), CacheError> {
        let typename = data.get(TYPENAME).and_then(Value::as_str);
        let fields = selection.fields_for_type(typename, false);

        for (attribute, value) in data {
            let Some(field) = fields.get(attribute) else {
                continue;
            };
            let key = evaluate_key(&field.key_raw, ctx.variables);
            let previous = self.storage.get(parent, &key);
            let display = self
                .storage
                .layer(ctx.layer)?
                .is_display_layer(&previous.display_layers);

            if display {
                self.lifetimes.reset_lifetime(parent, &key);
                if ctx.force_stale {
                    self.stale.mark_field_stale(parent, &key);
                } else {
                    self.stale
                        .set_field_time(parent, &key, self.config.now_millis());
                }
                if let Some(list) = List::from_field(parent, &key, field, ctx.variables) {
                    self.lists.add(list);
                }
            }

            let write = FieldWrite {
                parent,
                subscribers: self.subscriptions.get(parent, &key),
                key,
                field,
                previous,
                display,
            };
            match (field.selection(), value) {
                (None, _) => self.write_scalar(ctx, &write, value)?,
                (Some(inner), Value::Null) => self.write_null_link(ctx, &write, inner)?,
                (Some(inner), Value::Object(object)) => {
                    self.write_linked_record(ctx, &write, inner, value, object)?
                }
                (Some(inner), Value::Array(items)) => {
                    self.write_linked_list(ctx, &write, inner, items)?
                }
                (Some(_), other) => {
                    trace!(parent, key = %write.key, value = %other, "ignoring scalar written to a link field")
                }
            }

            if !field.operations.is_empty() {
                self.apply_operations(ctx, field, value)?;
            }
        }
        Ok(())
    }

    fn write_scalar(
        &mut self,
        ctx: &mut WriteContext<'_>,
        write: &FieldWrite<'_>,
        value: &Value,
    ) -> Result<(), CacheError> {
        let previous = write.previous.scalar();
        let mut new_value = value.clone();

        if let (Some(mode), Value::Array(items)) = (update_mode(write.field, ctx.apply_updates), value) {
            let old = previous
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            new_value = match mode {
                UpdateMode::Append => Value::Array(old.into_iter().chain(items.iter().cloned()).collect()),
                UpdateMode::Prepend => Value::Array(items.iter().cloned().chain(old).collect()),
                UpdateMode::Replace => value.clone(),
            };
        }

        // page info keeps the boundary that the new page did not move
        if !write.field.updates.is_empty() {
            let keep_old = (ctx.apply_updates.contains(&UpdateMode::Prepend)
                && CONNECTION_FORWARD_FIELDS.contains(&write.key.as_str()))
                || (ctx.apply_updates.contains(&UpdateMode::Append)
                    && CONNECTION_BACKWARD_FIELDS.contains(&write.key.as_str()));
            if let (true, Some(old)) = (keep_old, previous) {
                new_value = old.clone();
            }
        }

        let changed = previous != Some(&new_value);
        if write.display && (changed || ctx.force_notify) {
            write.notify_into(&mut ctx.notify);
        }
        trace!(parent = write.parent, key = %write.key, changed, "write field");
        self.storage
            .write_field(ctx.layer, write.parent, &write.key, new_value)
    }

    fn write_null_link(
        &mut self,
        ctx: &mut WriteContext<'_>,
        write: &FieldWrite<'_>,
        inner: &Rc<Selection>,
    ) -> Result<(), CacheError> {
        if write.previous.link().is_some_and(LinkValue::is_null) {
            return Ok(());
        }
        let targets = write.targets();
        for linked in owned_ids(write.previous.link()) {
            self.remove_subscribers(&linked, inner, &targets, ctx.variables);
        }
        trace!(parent = write.parent, key = %write.key, "write null link");
        self.storage
            .write_link(ctx.layer, write.parent, &write.key, LinkValue::Null)?;
        write.notify_into(&mut ctx.notify);
        Ok(())
    }

    fn write_linked_record(
        &mut self,
        ctx: &mut WriteContext<'_>,
        write: &FieldWrite<'_>,
        inner: &Rc<Selection>,
        value: &Value,
        object: &Map<String, Value>,
    ) -> Result<(), CacheError> {
        let linked_type = match object.get(TYPENAME).and_then(Value::as_str) {
            Some(typename) => typename.to_string(),
            None if write.field.is_abstract() => {
                return Err(CacheError::MissingTypename {
                    field: write.key.clone(),
                })
            }
            None => write.field.type_name.clone(),
        };
        let linked_id = if is_embedded(&self.config, &linked_type, value) {
            format!("{}.{}", write.parent, write.key)
        } else {
            match record_id(&self.config, &linked_type, value) {
                Some(id) => id,
                None => format!("{}.{}", write.parent, write.key),
            }
        };

        let previous = write.previous.link().and_then(LinkValue::as_record);
        let changed = previous != Some(linked_id.as_str());
        trace!(parent = write.parent, key = %write.key, linked = %linked_id, changed, "write link");
        self.storage.write_link(
            ctx.layer,
            write.parent,
            &write.key,
            LinkValue::Record(linked_id.clone()),
        )?;

        if write.display && (changed || ctx.force_notify) {
            if changed {
                let targets = write.targets();
                for old in owned_ids(write.previous.link()) {
                    self.remove_subscribers(&old, inner, &targets, ctx.variables);
                }
                self.add_subscribers(&linked_id, &write.subscribers);
            }
            write.notify_into(&mut ctx.notify);
        }

        self.write_record(ctx, inner, &linked_id, object)
    }

    fn write_linked_list(
        &mut self,
        ctx: &mut WriteContext<'_>,
        write: &FieldWrite<'_>,
        inner: &Rc<Selection>,
        items: &[Value],
    ) -> Result<(), CacheError> {
        let old_links: Vec<LinkValue> = match write.previous.link() {
            Some(LinkValue::List(items)) => items.clone(),
            _ => Vec::new(),
        };
        let mode = update_mode(write.field, ctx.apply_updates);
        let new_links = self.extract_list_ids(ctx, write, inner, items)?;

        let linked = match mode {
            Some(mode @ (UpdateMode::Append | UpdateMode::Prepend)) => {
                let mut old = old_links.clone();
                // ids only present through a pending insert are about to be
                // written for real
                old.retain(|link| match link {
                    LinkValue::Record(id) => {
                        !self.storage.pending_insert(write.parent, &write.key, id)
                    }
                    _ => true,
                });
                if write.key == "edges" {
                    let new_nodes: Vec<String> = LinkValue::List(new_links.clone())
                        .record_ids()
                        .into_iter()
                        .filter_map(|edge| {
                            self.storage
                                .get(edge, "node")
                                .link()
                                .and_then(LinkValue::as_record)
                                .map(str::to_string)
                        })
                        .collect();
                    old.retain(|link| match link {
                        LinkValue::Record(edge) => !self
                            .storage
                            .get(edge, "node")
                            .link()
                            .and_then(LinkValue::as_record)
                            .is_some_and(|node| new_nodes.iter().any(|n| n == node)),
                        _ => true,
                    });
                }
                if mode == UpdateMode::Append {
                    old.into_iter().chain(new_links.iter().cloned()).collect()
                } else {
                    new_links.iter().cloned().chain(old).collect()
                }
            }
            _ => new_links.clone(),
        };

        let new_value = LinkValue::List(linked);
        let changed = write.previous.link() != Some(&new_value);
        if write.display && (changed || ctx.force_notify) {
            write.notify_into(&mut ctx.notify);
        }

        let old_ids = owned_ids(Some(&LinkValue::List(old_links)));
        let new_ids = owned_ids(Some(&new_value));
        if write.display {
            let targets = write.targets();
            for lost in old_ids.iter().filter(|id| !new_ids.contains(id)) {
                self.remove_subscribers(lost, inner, &targets, ctx.variables);
            }
        }

        let defined_below = write.previous.link().is_some_and(LinkValue::is_list)
            && !write.previous.display_layers.contains(&ctx.layer);
        match mode {
            Some(UpdateMode::Append) if ctx.optimistic && defined_below => {
                for id in owned_ids(Some(&LinkValue::List(new_links))) {
                    self.storage.insert(ctx.layer, write.parent, &write.key, OperationLocation::End, &id)?;
                }
            }
            Some(UpdateMode::Prepend) if ctx.optimistic && defined_below => {
                for id in owned_ids(Some(&LinkValue::List(new_links))).iter().rev() {
                    self.storage.insert(ctx.layer, write.parent, &write.key, OperationLocation::Start, id)?;
                }
            }
            _ => {
                trace!(parent = write.parent, key = %write.key, changed, "write link list");
                self.storage
                    .write_link(ctx.layer, write.parent, &write.key, new_value)?;
            }
        }

        if write.display {
            for gained in new_ids.iter().filter(|id| !old_ids.contains(id)) {
                self.add_subscribers(gained, &write.subscribers);
            }
        }
        Ok(())
    }

    /// Write every entry of a (possibly nested) list and return the links
    /// that replace it. Entries whose id cannot be computed are dropped.
    fn extract_list_ids(
        &mut self,
        ctx: &mut WriteContext<'_>,
        write: &FieldWrite<'_>,
        inner: &Rc<Selection>,
        items: &[Value],
    ) -> Result<Vec<LinkValue>, CacheError> {
        let mut links = Vec::with_capacity(items.len());
        for entry in items {
            match entry {
                Value::Array(nested) => {
                    links.push(LinkValue::List(self.extract_list_ids(ctx, write, inner, nested)?))
                }
                Value::Null => links.push(LinkValue::Null),
                Value::Object(object) => {
                    let entry_type = match object.get(TYPENAME).and_then(Value::as_str) {
                        Some(typename) => typename.to_string(),
                        None if write.field.is_abstract() => {
                            return Err(CacheError::MissingTypename {
                                field: write.key.clone(),
                            })
                        }
                        None => write.field.type_name.clone(),
                    };
                    let id = if is_embedded(&self.config, &entry_type, entry) {
                        format!("{}.{}[{}]", write.parent, write.key, self.storage.next_rank())
                    } else {
                        match record_id(&self.config, &entry_type, entry) {
                            Some(id) => id,
                            None => {
                                trace!(key = %write.key, type_name = %entry_type, "skipping list entry without id");
                                continue;
                            }
                        }
                    };
                    self.write_record(ctx, inner, &id, object)?;
                    links.push(LinkValue::Record(id));
                }
                _ => {}
            }
        }
        Ok(links)
    }

    fn apply_operations(
        &mut self,
        ctx: &mut WriteContext<'_>,
        field: &FieldSelection,
        value: &Value,
    ) -> Result<(), CacheError> {
        let targets: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for operation in &field.operations {
            let parent_id = operation_parent(operation, ctx.variables)?;

            if operation.action == OperationAction::Delete {
                let Some(type_name) = &operation.type_name else {
                    continue;
                };
                for target in &targets {
                    let Some(id) = record_id(&self.config, type_name, target) else {
                        continue;
                    };
                    let removed = self.delete(&id, Some(ctx.layer))?;
                    ctx.notify.extend(removed);
                }
                continue;
            }

            let (Some(name), Some(selection)) = (&operation.list, field.selection()) else {
                continue;
            };
            let Some(lists) = self.lists.get(name, parent_id.as_deref(), operation.all_lists)? else {
                debug!(list = %name, "list operation skipped: no such list");
                continue;
            };
            for target in targets.iter().filter(|t| t.is_object()) {
                match operation.action {
                    OperationAction::Insert => {
                        let fresh: Vec<List> = lists
                            .iter()
                            .filter(|list| {
                                let target_id = record_id(&self.config, &list.list_type, target)
                                    .unwrap_or_default();
                                ctx.inserted.insert((
                                    list.name.clone(),
                                    list.record_id.clone(),
                                    list.key.clone(),
                                    target_id,
                                ))
                            })
                            .cloned()
                            .collect();
                        let notify = self.list_add(
                            &fresh,
                            operation.when.as_ref(),
                            selection,
                            target,
                            ctx.variables,
                            operation.position,
                            Some(ctx.layer),
                        )?;
                        ctx.notify.extend(notify);
                    }
                    OperationAction::Remove => {
                        let notify = self.list_remove(
                            &lists,
                            operation.when.as_ref(),
                            target,
                            ctx.variables,
                            Some(ctx.layer),
                        )?;
                        ctx.notify.extend(notify);
                    }
                    OperationAction::Toggle => {
                        let notify = self.list_toggle(
                            &lists,
                            operation.when.as_ref(),
                            selection,
                            target,
                            ctx.variables,
                            operation.position,
                            Some(ctx.layer),
                        )?;
                        ctx.notify.extend(notify);
                    }
                    OperationAction::Delete => {}
                }
            }
        }
        Ok(())
    }
}

/// The parent id an operation targets, if it names one.
fn operation_parent(
    operation: &ListOperation,
    variables: &Variables,
) -> Result<Option<String>, CacheError> {
    match &operation.parent_id {
        None => Ok(None),
        Some(Argument::Literal(Value::String(id))) => Ok(Some(id.clone())),
        Some(Argument::Literal(Value::Null)) => Ok(None),
        Some(Argument::Literal(other)) => Ok(Some(other.to_string())),
        Some(Argument::Variable(name)) => match variables.get(name) {
            Some(Value::String(id)) => Ok(Some(id.clone())),
            _ => Err(CacheError::InvalidParentId {
                variable: name.clone(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ReadOptions;
    use crate::config::CacheConfig;
    use crate::selection::FieldSelection;
    use crate::subscription::SubscriptionSpec;
    use serde_json::json;

    fn viewer_selection() -> Selection {
        Selection::new().with_field(
            "viewer",
            FieldSelection::link(
                "User",
                "viewer",
                Selection::new()
                    .with_field("id", FieldSelection::scalar("ID", "id"))
                    .with_field("firstName", FieldSelection::scalar("String", "firstName")),
            ),
        )
    }

    #[test]
    fn embedded_records_get_path_ids() {
        let mut cache = Cache::new(CacheConfig::default().with_keys("Address", Vec::<String>::new()));
        let selection = Selection::new().with_field(
            "viewer",
            FieldSelection::link(
                "User",
                "viewer",
                Selection::new()
                    .with_field("id", FieldSelection::scalar("ID", "id"))
                    .with_field(
                        "address",
                        FieldSelection::link(
                            "Address",
                            "address",
                            Selection::new().with_field("city", FieldSelection::scalar("String", "city")),
                        ),
                    )
                    .with_field(
                        "tags",
                        FieldSelection::link(
                            "Tag",
                            "tags",
                            Selection::new().with_field("label", FieldSelection::scalar("String", "label")),
                        ),
                    ),
            ),
        );
        let data = json!({"viewer": {"id": "1", "address": {"city": "Oslo"}, "tags": [{"label": "a"}, {"label": "b"}]}});
        cache.write(WriteOptions::new(&selection, &data)).unwrap();

        assert_eq!(
            cache.storage.get("User:1", "address").link(),
            Some(&LinkValue::Record("User:1.address".to_string()))
        );
        assert_eq!(
            cache.storage.get("User:1", "tags").link(),
            Some(&LinkValue::from_ids(["User:1.tags[0]", "User:1.tags[1]"]))
        );
        assert_eq!(cache.read(ReadOptions::new(&selection)).data, data);
    }

    #[test]
    fn abstract_values_need_a_typename() {
        let mut cache = Cache::default();
        let selection = Selection::new().with_field(
            "node",
            FieldSelection::abstract_link(
                "Node",
                "node",
                Selection::new().with_field("id", FieldSelection::scalar("ID", "id")),
            ),
        );
        let err = cache
            .write(WriteOptions::new(&selection, &json!({"node": {"id": "1"}})))
            .unwrap_err();
        assert!(matches!(err, CacheError::MissingTypename { .. }));
    }

    #[test]
    fn scalar_updates_and_page_info_boundaries() {
        let mut cache = Cache::default();
        let selection = Selection::new()
            .with_field(
                "tags",
                FieldSelection::scalar("String", "tags")
                    .with_updates(&[UpdateMode::Append, UpdateMode::Prepend]),
            )
            .with_field(
                "endCursor",
                FieldSelection::scalar("String", "endCursor")
                    .with_updates(&[UpdateMode::Append, UpdateMode::Prepend]),
            );
        cache
            .write(WriteOptions::new(&selection, &json!({"tags": ["a"], "endCursor": "c1"})))
            .unwrap();
        cache
            .write(
                WriteOptions::new(&selection, &json!({"tags": ["b"], "endCursor": "c0"}))
                    .with_updates(&[UpdateMode::Prepend]),
            )
            .unwrap();
        let data = cache.read(ReadOptions::new(&selection)).data;
        assert_eq!(data, json!({"tags": ["b", "a"], "endCursor": "c1"}));
    }

    #[test]
    fn relinking_moves_subscribers() {
        let mut cache = Cache::default();
        let selection = viewer_selection();
        cache
            .write(WriteOptions::new(&selection, &json!({"viewer": {"id": "1", "firstName": "bob"}})))
            .unwrap();
        let spec = SubscriptionSpec::new(selection.clone(), |_| {});
        cache.subscribe(&spec);
        assert!(cache.subscriptions.is_active("User:1", "firstName"));

        let notify = cache
            .write(WriteOptions::new(&selection, &json!({"viewer": {"id": "2", "firstName": "jane"}})))
            .unwrap();
        assert_eq!(notify.len(), 1);
        assert!(!cache.subscriptions.is_active("User:1", "firstName"));
        assert!(cache.subscriptions.is_active("User:2", "firstName"));
    }

    #[test]
    fn variable_parent_id_must_be_a_string() {
        let mut cache = Cache::default();
        let mut field = FieldSelection::link(
            "User",
            "addFriend",
            Selection::new().with_field("id", FieldSelection::scalar("ID", "id")),
        );
        field.operations.push(ListOperation {
            action: OperationAction::Insert,
            list: Some("Friends".to_string()),
            type_name: None,
            parent_id: Some(Argument::Variable("parent".to_string())),
            position: Default::default(),
            all_lists: false,
            when: None,
        });
        let selection = Selection::new().with_field("addFriend", field);
        let variables: Variables = serde_json::from_value(json!({"parent": 3})).unwrap();
        let err = cache
            .write(
                WriteOptions::new(&selection, &json!({"addFriend": {"id": "2"}}))
                    .with_variables(variables),
            )
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidParentId { .. }));
    }
}
