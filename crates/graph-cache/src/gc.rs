//! Idle-field eviction.
//!
//! Every field written or subscribed on its display layer gets an idle
//! counter. [`GarbageCollector::tick`] bumps the counter of every field
//! nobody subscribes to and reports the ones that went past the buffer size;
//! the cache then forgets them everywhere.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct GarbageCollector {
    lifetimes: HashMap<String, HashMap<String, u32>>,
}

impl GarbageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_lifetime(&mut self, id: &str, field: &str) {
        self.lifetimes
            .entry(id.to_string())
            .or_default()
            .insert(field.to_string(), 0);
    }

    pub fn lifetime(&self, id: &str, field: &str) -> Option<u32> {
        self.lifetimes.get(id).and_then(|f| f.get(field)).copied()
    }

    /// Advance every idle field by one tick and return the evicted
    /// `(record, field)` pairs. `is_active` reports whether a field has
    /// subscribers; those are left alone.
    pub fn tick(
        &mut self,
        buffer_size: u32,
        is_active: impl Fn(&str, &str) -> bool,
    ) -> Vec<(String, String)> {
        let mut evicted = Vec::new();
        self.lifetimes.retain(|id, fields| {
            fields.retain(|field, lifetime| {
                if is_active(id, field) {
                    return true;
                }
                *lifetime += 1;
                if *lifetime > buffer_size {
                    evicted.push((id.clone(), field.clone()));
                    return false;
                }
                true
            });
            !fields.is_empty()
        });
        evicted
    }

    pub fn forget_record(&mut self, id: &str) {
        self.lifetimes.remove(id);
    }

    pub fn reset(&mut self) {
        self.lifetimes.clear();
    }
}
