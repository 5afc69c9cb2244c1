//! The cache facade.
//!
//! [`Cache`] ties the pieces together: it walks selections to write payloads
//! into [`Storage`], reads them back with partial/stale bookkeeping, keeps
//! the [`Subscriptions`] index in sync with the links it writes, and reports
//! which subscriptions need fresh data. It never calls listeners itself;
//! every mutating operation returns a [`NotifySet`] (see
//! [`crate::SharedCache`] for a wrapper that delivers them).

mod lists;
mod read;
mod record;
mod write;

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::debug;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::gc::GarbageCollector;
use crate::key::{compute_key, Variables, ROOT_ID};
use crate::lists::ListManager;
use crate::selection::{Selection, UpdateMode};
use crate::stale::{Freshness, StaleManager};
use crate::storage::{LayerId, LinkValue, StoredValue, Storage};
use crate::subscription::{
    FieldSubscriber, ListenerId, NotifySet, SubscriptionSpec, Subscriptions, WalkContext,
};

pub use lists::ListHandle;
pub use read::{pending_value, PENDING_KEY, REQUIRED_SENTINEL};
pub use record::RecordHandle;

/// Arguments of [`Cache::write`].
#[derive(Debug, Clone)]
pub struct WriteOptions<'a> {
    pub selection: &'a Selection,
    pub data: &'a Value,
    pub variables: Variables,
    /// Record the payload is written under.
    pub parent: String,
    /// Target layer; the top writable layer when unset.
    pub layer: Option<LayerId>,
    /// Update modes to honor on fields that declare them.
    pub apply_updates: Vec<UpdateMode>,
    /// Notify subscribers even when nothing changed.
    pub force_notify: bool,
    /// Mark the written fields stale instead of fresh.
    pub force_stale: bool,
}

impl<'a> WriteOptions<'a> {
    pub fn new(selection: &'a Selection, data: &'a Value) -> Self {
        Self {
            selection,
            data,
            variables: Variables::new(),
            parent: ROOT_ID.to_string(),
            layer: None,
            apply_updates: Vec::new(),
            force_notify: false,
            force_stale: false,
        }
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = parent.into();
        self
    }

    pub fn with_layer(mut self, layer: Option<LayerId>) -> Self {
        self.layer = layer;
        self
    }

    pub fn with_updates(mut self, updates: &[UpdateMode]) -> Self {
        self.apply_updates = updates.to_vec();
        self
    }

    pub fn force_notify(mut self) -> Self {
        self.force_notify = true;
        self
    }

    pub fn force_stale(mut self) -> Self {
        self.force_stale = true;
        self
    }
}

/// Arguments of [`Cache::read`].
#[derive(Debug, Clone)]
pub struct ReadOptions<'a> {
    pub selection: &'a Selection,
    pub parent: String,
    pub variables: Variables,
    /// Emit fields hidden by the visibility mask.
    pub ignore_masking: bool,
    /// Walk hidden fields for partial/stale without emitting them.
    pub full_check: bool,
    /// Produce loading placeholders instead of cached data.
    pub loading: bool,
}

impl<'a> ReadOptions<'a> {
    pub fn new(selection: &'a Selection) -> Self {
        Self {
            selection,
            parent: ROOT_ID.to_string(),
            variables: Variables::new(),
            ignore_masking: false,
            full_check: false,
            loading: false,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = parent.into();
        self
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn ignore_masking(mut self) -> Self {
        self.ignore_masking = true;
        self
    }

    pub fn full_check(mut self) -> Self {
        self.full_check = true;
        self
    }

    pub fn loading(mut self) -> Self {
        self.loading = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
    pub data: Value,
    /// Some selected field is missing from the cache.
    pub partial: bool,
    /// Some selected field was invalidated.
    pub stale: bool,
    /// At least one selected field is known.
    pub has_data: bool,
}

#[derive(Debug, Default)]
pub struct Cache {
    pub(crate) config: CacheConfig,
    pub(crate) storage: Storage,
    pub(crate) subscriptions: Subscriptions,
    pub(crate) lists: ListManager,
    pub(crate) lifetimes: GarbageCollector,
    pub(crate) stale: StaleManager,
}

impl Cache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            storage: Storage::new(),
            subscriptions: Subscriptions::new(),
            lists: ListManager::new(),
            lifetimes: GarbageCollector::new(),
            stale: StaleManager::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    /// Split borrow for subscription walks.
    pub(crate) fn walker(&mut self) -> (&mut Subscriptions, WalkContext<'_>) {
        (
            &mut self.subscriptions,
            WalkContext {
                storage: &self.storage,
                lists: &mut self.lists,
                lifetimes: &mut self.lifetimes,
            },
        )
    }

    pub(crate) fn add_subscribers(&mut self, parent: &str, subscribers: &[FieldSubscriber]) {
        let (subscriptions, mut ctx) = self.walker();
        subscriptions.add_many(&mut ctx, parent, subscribers);
    }

    pub(crate) fn remove_subscribers(
        &mut self,
        parent: &str,
        selection: &Selection,
        targets: &[ListenerId],
        variables: &Variables,
    ) {
        self.subscriptions
            .remove(&self.storage, parent, selection, targets, variables);
    }

    pub fn subscribe(&mut self, spec: &SubscriptionSpec) {
        let variables = spec.variables();
        let selection = spec.selection.clone();
        let (subscriptions, mut ctx) = self.walker();
        subscriptions.add(&mut ctx, &spec.root, spec, &selection, &variables);
        debug!(root = %spec.root, listener = ?spec.id(), "subscribed");
    }

    pub fn unsubscribe(&mut self, spec: &SubscriptionSpec) {
        let variables = spec.variables();
        self.remove_subscribers(&spec.root, &spec.selection, &[spec.id()], &variables);
        debug!(root = %spec.root, listener = ?spec.id(), "unsubscribed");
    }

    /// Read the current data of a subscription.
    pub fn read_subscription(&self, spec: &SubscriptionSpec) -> ReadResult {
        self.read(
            ReadOptions::new(&spec.selection)
                .with_parent(spec.root.clone())
                .with_variables(spec.variables()),
        )
    }

    /// Delete a record (and its alias) from `layer`, or from the top layer.
    ///
    /// Returns every subscription that was looking at the record or at a
    /// list it was removed from.
    pub fn delete(&mut self, id: &str, layer: Option<LayerId>) -> Result<NotifySet, CacheError> {
        let mut notify = NotifySet::new();
        let mut ids = vec![id.to_string()];
        if let Some(alias) = self.storage.alias(id) {
            ids.push(alias.to_string());
        }
        let layer = match layer {
            Some(layer) => layer,
            None => self.storage.top_layer(),
        };
        // an optimistic delete can be cleared, so its bookkeeping stays
        let committed = !self.storage.layer(layer)?.optimistic;
        for record in ids {
            notify.extend(self.subscriptions.get_all(&record));
            self.subscriptions.remove_all_subscribers(&self.storage, &record);
            notify.extend(self.remove_id_from_all_lists(&record, Some(layer))?);
            self.lists.forget_record(&record);
            self.storage.delete(layer, &record)?;
            if committed {
                self.lifetimes.forget_record(&record);
                self.stale.forget_record(&record);
            }
            debug!(record = %record, layer, committed, "deleted record");
        }
        Ok(notify)
    }

    /// Alias `from` to `to` across layers and give `to` the subscribers of
    /// `from`.
    pub fn register_key_map(&mut self, from: &str, to: &str) {
        self.storage.register_id_mapping(from, to);
        self.subscriptions.copy_subscribers(from, to);
    }

    pub fn mark_record_stale(&mut self, id: &str, field: Option<&str>) {
        match field {
            Some(field) => self.stale.mark_field_stale(id, field),
            None => self.stale.mark_record_stale(id),
        }
    }

    /// Mark a type, or one field of a type, stale. `args` narrows the field
    /// to one argument set.
    pub fn mark_type_stale(
        &mut self,
        type_name: &str,
        field: Option<&str>,
        args: Option<&Map<String, Value>>,
    ) {
        match field {
            Some(field) => self.stale.mark_type_field_stale(type_name, field, args),
            None => self.stale.mark_type_stale(type_name),
        }
    }

    pub fn mark_all_stale(&mut self) {
        self.stale.mark_all_stale();
    }

    pub fn field_time(&self, id: &str, field: &str) -> Option<Freshness> {
        self.stale.get(id, field)
    }

    /// Field key for a field name and literal arguments.
    pub fn field_key(field: &str, args: Option<&Map<String, Value>>) -> String {
        compute_key(field, args)
    }

    /// One garbage-collection tick.
    pub fn collect_garbage(&mut self) {
        let subscriptions = &self.subscriptions;
        let evicted = self
            .lifetimes
            .tick(self.config.cache_buffer_size, |id, field| {
                subscriptions.is_active(id, field)
            });
        for (id, field) in &evicted {
            self.storage.delete_field(id, field);
            self.lists.delete_field(id, field);
            self.stale.delete(id, field);
        }
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted idle fields");
        }
        if let Some(max_age) = self.config.default_lifetime.filter(|age| *age > 0) {
            let expired = self.stale.mark_older_than(self.config.now_millis(), max_age);
            if expired > 0 {
                debug!(count = expired, "marked expired fields stale");
            }
        }
    }

    pub fn create_layer(&mut self, optimistic: bool) -> LayerId {
        self.storage.create_layer(optimistic)
    }

    pub fn resolve_layer(&mut self, id: LayerId) -> Result<(), CacheError> {
        self.storage.resolve_layer(id)
    }

    /// Discard a layer. Returns the subscriptions whose visible data changed.
    pub fn clear_layer(&mut self, id: LayerId) -> Result<NotifySet, CacheError> {
        let layer = self.storage.layer(id)?;
        let mut touched: Vec<(String, String)> = layer.touched_fields();
        let deleted: Vec<String> = layer.data().deleted_ids.iter().cloned().collect();
        if !deleted.is_empty() {
            for list in self.lists.all() {
                touched.push((list.record_id, list.key));
            }
        }
        let mut seen = HashSet::new();
        touched.retain(|pair| seen.insert(pair.clone()));

        let before: Vec<Option<StoredValue>> = touched
            .iter()
            .map(|(record, field)| self.storage.get(record, field).value)
            .collect();
        self.storage.clear_layer(id)?;

        let mut notify = NotifySet::new();
        for ((record, field), before) in touched.iter().zip(before) {
            let after = self.storage.get(record, field).value;
            if before == after {
                continue;
            }
            let subscribers = self.subscriptions.get(record, field);
            let old = before.as_ref().and_then(StoredValue::as_link);
            let new = after.as_ref().and_then(StoredValue::as_link);
            self.reconcile_links(&subscribers, old, new);
            notify.extend(subscribers.into_iter().map(|(spec, _)| spec));
        }
        for record in &deleted {
            notify.extend(self.subscriptions.get_all(record));
        }
        Ok(notify)
    }

    /// Move subscribers of a field from the records it used to link to the
    /// ones it links to now.
    fn reconcile_links(
        &mut self,
        subscribers: &[FieldSubscriber],
        old: Option<&LinkValue>,
        new: Option<&LinkValue>,
    ) {
        let old_ids: Vec<String> = old
            .map(|l| l.record_ids().into_iter().map(str::to_string).collect())
            .unwrap_or_default();
        let new_ids: Vec<String> = new
            .map(|l| l.record_ids().into_iter().map(str::to_string).collect())
            .unwrap_or_default();
        for (spec, selection) in subscribers {
            let Some(selection) = selection else {
                continue;
            };
            let variables = spec.variables();
            for lost in old_ids.iter().filter(|id| !new_ids.contains(id)) {
                self.remove_subscribers(lost, selection, &[spec.id()], &variables);
            }
        }
        for gained in new_ids.iter().filter(|id| !old_ids.contains(id)) {
            self.add_subscribers(gained, subscribers);
        }
    }

    /// Flat JSON snapshot of the committed layer.
    pub fn serialize(&self) -> Result<String, CacheError> {
        self.storage.serialize()
    }

    pub fn hydrate(&mut self, snapshot: &str) -> Result<(), CacheError> {
        self.storage.hydrate(snapshot)
    }

    /// Forget everything: layers, subscriptions, lists, lifetimes and
    /// freshness.
    pub fn reset(&mut self) {
        self.storage.reset();
        self.subscriptions.reset();
        self.lists.reset();
        self.lifetimes.reset();
        self.stale.reset();
        debug!("reset cache");
    }
}
