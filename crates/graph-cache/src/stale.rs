//! Per-field freshness.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::key::{compute_key, type_of_id};

/// Freshness of one field. A field that was never written has no entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Last written at this time (milliseconds).
    Fresh(u64),
    /// Explicitly invalidated.
    Stale,
}

#[derive(Debug, Default)]
pub struct StaleManager {
    fields: HashMap<String, HashMap<String, Freshness>>,
}

impl StaleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str, field: &str) -> Option<Freshness> {
        self.fields.get(id).and_then(|f| f.get(field)).copied()
    }

    pub fn is_field_stale(&self, id: &str, field: &str) -> bool {
        self.get(id, field) == Some(Freshness::Stale)
    }

    pub fn set_field_time(&mut self, id: &str, field: &str, now: u64) {
        self.set(id, field, Freshness::Fresh(now));
    }

    pub fn mark_field_stale(&mut self, id: &str, field: &str) {
        self.set(id, field, Freshness::Stale);
    }

    fn set(&mut self, id: &str, field: &str, freshness: Freshness) {
        self.fields
            .entry(id.to_string())
            .or_default()
            .insert(field.to_string(), freshness);
    }

    pub fn mark_all_stale(&mut self) {
        for fields in self.fields.values_mut() {
            fields.values_mut().for_each(|f| *f = Freshness::Stale);
        }
    }

    pub fn mark_record_stale(&mut self, id: &str) {
        if let Some(fields) = self.fields.get_mut(id) {
            fields.values_mut().for_each(|f| *f = Freshness::Stale);
        }
    }

    pub fn mark_type_stale(&mut self, type_name: &str) {
        for (id, fields) in self.fields.iter_mut() {
            if type_of_id(id) == Some(type_name) {
                fields.values_mut().for_each(|f| *f = Freshness::Stale);
            }
        }
    }

    /// Mark `field` stale on every record of `type_name`.
    ///
    /// Without `args` every variant of the field (`field`, `field(...)`)
    /// matches; with `args` only the exact field key does.
    pub fn mark_type_field_stale(
        &mut self,
        type_name: &str,
        field: &str,
        args: Option<&Map<String, Value>>,
    ) {
        let exact = compute_key(field, args);
        let prefix = format!("{}(", field);
        for (id, fields) in self.fields.iter_mut() {
            if type_of_id(id) != Some(type_name) {
                continue;
            }
            for (key, freshness) in fields.iter_mut() {
                if *key == exact || (args.is_none() && key.starts_with(&prefix)) {
                    *freshness = Freshness::Stale;
                }
            }
        }
    }

    /// Mark every field written more than `max_age` ago stale.
    pub fn mark_older_than(&mut self, now: u64, max_age: u64) -> usize {
        let mut marked = 0;
        for fields in self.fields.values_mut() {
            for freshness in fields.values_mut() {
                if let Freshness::Fresh(at) = *freshness {
                    if now.saturating_sub(at) > max_age {
                        *freshness = Freshness::Stale;
                        marked += 1;
                    }
                }
            }
        }
        marked
    }

    pub fn delete(&mut self, id: &str, field: &str) {
        if let Some(fields) = self.fields.get_mut(id) {
            fields.remove(field);
            if fields.is_empty() {
                self.fields.remove(id);
            }
        }
    }

    pub fn forget_record(&mut self, id: &str) {
        self.fields.remove(id);
    }

    pub fn reset(&mut self) {
        self.fields.clear();
    }
}
