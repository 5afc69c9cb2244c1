//! Reference-counted subscription index.
//!
//! For every (record, field) the index remembers which listeners depend on
//! it and, for link fields, the selection they read below it. A listener can
//! reach the same field through several paths (aliases, two parents linking
//! the same record); each path bumps a reference count and the listener only
//! goes away once every path has been removed.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::gc::GarbageCollector;
use crate::key::{evaluate_key, Variables, ROOT_ID};
use crate::lists::{List, ListManager};
use crate::selection::{Selection, TYPENAME};
use crate::storage::Storage;

/// Callback invoked with the fresh data of a subscription.
pub type Listener = Rc<dyn Fn(&Value)>;

/// Identity of a listener: the address of its callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

impl ListenerId {
    pub fn of(listener: &Listener) -> Self {
        ListenerId(Rc::as_ptr(listener) as *const () as usize)
    }
}

/// A live query: which selection to read from which record, and whom to tell.
#[derive(Clone)]
pub struct SubscriptionSpec {
    pub root: String,
    pub selection: Rc<Selection>,
    pub listener: Listener,
    variables: Rc<dyn Fn() -> Variables>,
}

impl SubscriptionSpec {
    pub fn new(selection: impl Into<Rc<Selection>>, listener: impl Fn(&Value) + 'static) -> Self {
        Self::with_listener(selection, Rc::new(listener))
    }

    /// Build a spec around an existing listener, so two specs can share one
    /// identity.
    pub fn with_listener(selection: impl Into<Rc<Selection>>, listener: Listener) -> Self {
        Self {
            root: ROOT_ID.to_string(),
            selection: selection.into(),
            listener,
            variables: Rc::new(Variables::new),
        }
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = Rc::new(move || variables.clone());
        self
    }

    /// Read variables lazily, every time the subscription is walked.
    pub fn with_variable_accessor(mut self, accessor: impl Fn() -> Variables + 'static) -> Self {
        self.variables = Rc::new(accessor);
        self
    }

    pub fn variables(&self) -> Variables {
        (self.variables)()
    }

    pub fn id(&self) -> ListenerId {
        ListenerId::of(&self.listener)
    }

    pub fn notify(&self, data: &Value) {
        (self.listener)(data)
    }
}

impl fmt::Debug for SubscriptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSpec")
            .field("root", &self.root)
            .field("listener", &self.id())
            .finish_non_exhaustive()
    }
}

/// Subscriptions to notify after a change, at most one per listener.
#[derive(Debug, Clone, Default)]
pub struct NotifySet {
    specs: Vec<SubscriptionSpec>,
}

impl NotifySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, spec: SubscriptionSpec) {
        let id = spec.id();
        if !self.specs.iter().any(|s| s.id() == id) {
            self.specs.push(spec);
        }
    }

    pub fn extend(&mut self, specs: impl IntoIterator<Item = SubscriptionSpec>) {
        for spec in specs {
            self.insert(spec);
        }
    }

    pub fn contains(&self, listener: &Listener) -> bool {
        let id = ListenerId::of(listener);
        self.specs.iter().any(|s| s.id() == id)
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubscriptionSpec> {
        self.specs.iter()
    }
}

impl IntoIterator for NotifySet {
    type Item = SubscriptionSpec;
    type IntoIter = std::vec::IntoIter<SubscriptionSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.specs.into_iter()
    }
}

/// A subscriber of one field: the spec and the selection it reads below the
/// field (`None` for scalars).
pub type FieldSubscriber = (SubscriptionSpec, Option<Rc<Selection>>);

#[derive(Debug, Default, Clone)]
struct FieldSubscribers {
    selections: Vec<FieldSubscriber>,
    reference_counts: HashMap<ListenerId, usize>,
}

/// Borrowed cache parts a subscription walk updates.
pub(crate) struct WalkContext<'a> {
    pub storage: &'a Storage,
    pub lists: &'a mut ListManager,
    pub lifetimes: &'a mut GarbageCollector,
}

#[derive(Debug, Default)]
pub struct Subscriptions {
    subscribers: HashMap<String, HashMap<String, FieldSubscribers>>,
}

fn typename_of(storage: &Storage, id: &str) -> Option<String> {
    storage
        .get(id, TYPENAME)
        .scalar()
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn linked_ids(storage: &Storage, id: &str, key: &str) -> Vec<String> {
    storage
        .get(id, key)
        .link()
        .map(|link| link.record_ids().into_iter().map(str::to_string).collect())
        .unwrap_or_default()
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `spec` to every field `selection` reaches from `parent`,
    /// following links that are already in the cache.
    pub(crate) fn add(
        &mut self,
        ctx: &mut WalkContext<'_>,
        parent: &str,
        spec: &SubscriptionSpec,
        selection: &Selection,
        variables: &Variables,
    ) {
        let typename = typename_of(ctx.storage, parent);
        for field in selection.fields_for_type(typename.as_deref(), false).values() {
            let key = evaluate_key(&field.key_raw, variables);
            let inner = field.selection().cloned();
            self.add_field_subscription(parent, &key, spec, inner.clone());
            ctx.lifetimes.reset_lifetime(parent, &key);

            let Some(inner) = inner else {
                continue;
            };
            if let Some(list) = List::from_field(parent, &key, field, variables) {
                ctx.lists.add(list);
            }
            for child in linked_ids(ctx.storage, parent, &key) {
                self.add(ctx, &child, spec, &inner, variables);
            }
        }
    }

    /// Re-add existing subscribers of a field under a newly linked record.
    pub(crate) fn add_many(
        &mut self,
        ctx: &mut WalkContext<'_>,
        parent: &str,
        subscribers: &[FieldSubscriber],
    ) {
        for (spec, selection) in subscribers {
            if let Some(selection) = selection {
                self.add(ctx, parent, spec, selection, &spec.variables());
            }
        }
    }

    fn add_field_subscription(
        &mut self,
        id: &str,
        field: &str,
        spec: &SubscriptionSpec,
        selection: Option<Rc<Selection>>,
    ) {
        let entry = self
            .subscribers
            .entry(id.to_string())
            .or_default()
            .entry(field.to_string())
            .or_default();
        let listener = spec.id();
        *entry.reference_counts.entry(listener).or_insert(0) += 1;
        if !entry.selections.iter().any(|(s, _)| s.id() == listener) {
            entry.selections.push((spec.clone(), selection));
        }
    }

    /// Undo [`Subscriptions::add`] for `targets`, walking the records
    /// currently linked below `id`. Every path `add` counted is decremented
    /// once, so a record reached twice is walked twice.
    pub fn remove(
        &mut self,
        storage: &Storage,
        id: &str,
        selection: &Selection,
        targets: &[ListenerId],
        variables: &Variables,
    ) {
        let typename = typename_of(storage, id);
        let mut linked = Vec::new();
        for field in selection.fields_for_type(typename.as_deref(), false).values() {
            let key = evaluate_key(&field.key_raw, variables);
            self.remove_subscribers(id, &key, targets);
            if let Some(inner) = field.selection() {
                for child in linked_ids(storage, id, &key) {
                    linked.push((child, inner.clone()));
                }
            }
        }
        for (child, inner) in linked {
            self.remove(storage, &child, &inner, targets, variables);
        }
    }

    /// Decrement the reference count of each target on one field, dropping
    /// listeners that reach zero.
    fn remove_subscribers(&mut self, id: &str, field: &str, targets: &[ListenerId]) {
        let Some(entry) = self.subscribers.get_mut(id).and_then(|f| f.get_mut(field)) else {
            return;
        };
        let mut detached = Vec::new();
        for target in targets {
            let Some(count) = entry.reference_counts.get_mut(target) else {
                continue;
            };
            *count = count.saturating_sub(1);
            if *count == 0 {
                entry.reference_counts.remove(target);
                detached.push(*target);
            }
        }
        entry.selections.retain(|(spec, _)| !detached.contains(&spec.id()));
        self.prune(id, field);
    }

    fn prune(&mut self, id: &str, field: &str) {
        if let Some(fields) = self.subscribers.get_mut(id) {
            if fields.get(field).is_some_and(|f| f.selections.is_empty()) {
                fields.remove(field);
            }
            if fields.is_empty() {
                self.subscribers.remove(id);
            }
        }
    }

    /// Drop every subscriber of `id` outright, and those same listeners
    /// from every record linked below it.
    pub fn remove_all_subscribers(&mut self, storage: &Storage, id: &str) {
        let targets: Vec<ListenerId> = self.get_all(id).iter().map(SubscriptionSpec::id).collect();
        let mut visited = HashSet::new();
        self.force_remove(storage, id, &targets, &mut visited);
    }

    fn force_remove(
        &mut self,
        storage: &Storage,
        id: &str,
        targets: &[ListenerId],
        visited: &mut HashSet<String>,
    ) {
        visited.insert(id.to_string());
        let fields: Vec<String> = self
            .subscribers
            .get(id)
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default();
        for field in fields {
            if let Some(entry) = self.subscribers.get_mut(id).and_then(|f| f.get_mut(&field)) {
                entry.selections.retain(|(spec, _)| !targets.contains(&spec.id()));
                entry.reference_counts.retain(|listener, _| !targets.contains(listener));
            }
            self.prune(id, &field);
            for child in linked_ids(storage, id, &field) {
                if !visited.contains(&child) {
                    self.force_remove(storage, &child, targets, visited);
                }
            }
        }
    }

    /// Give `to` the subscribers of `from`.
    pub fn copy_subscribers(&mut self, from: &str, to: &str) {
        let Some(fields) = self.subscribers.get(from).cloned() else {
            return;
        };
        let target = self.subscribers.entry(to.to_string()).or_default();
        for (field, subscribers) in fields {
            let entry = target.entry(field).or_default();
            for (listener, count) in subscribers.reference_counts {
                *entry.reference_counts.entry(listener).or_insert(0) += count;
            }
            for (spec, selection) in subscribers.selections {
                if !entry.selections.iter().any(|(s, _)| s.id() == spec.id()) {
                    entry.selections.push((spec, selection));
                }
            }
        }
    }

    pub fn get(&self, id: &str, field: &str) -> Vec<FieldSubscriber> {
        self.subscribers
            .get(id)
            .and_then(|f| f.get(field))
            .map(|f| f.selections.clone())
            .unwrap_or_default()
    }

    /// Every listener subscribed to any field of `id`.
    pub fn get_all(&self, id: &str) -> Vec<SubscriptionSpec> {
        let mut set = NotifySet::new();
        if let Some(fields) = self.subscribers.get(id) {
            for subscribers in fields.values() {
                set.extend(subscribers.selections.iter().map(|(spec, _)| spec.clone()));
            }
        }
        set.into_iter().collect()
    }

    pub fn is_active(&self, id: &str, field: &str) -> bool {
        self.subscribers
            .get(id)
            .and_then(|f| f.get(field))
            .is_some_and(|f| !f.selections.is_empty())
    }

    pub fn reference_count(&self, id: &str, field: &str, listener: &Listener) -> usize {
        self.subscribers
            .get(id)
            .and_then(|f| f.get(field))
            .and_then(|f| f.reference_counts.get(&ListenerId::of(listener)))
            .copied()
            .unwrap_or(0)
    }

    /// Number of (record, field) pairs with at least one subscriber.
    pub fn active_count(&self) -> usize {
        self.subscribers
            .values()
            .flat_map(|fields| fields.values())
            .filter(|f| !f.selections.is_empty())
            .count()
    }

    pub fn reset(&mut self) {
        self.subscribers.clear();
    }
}
