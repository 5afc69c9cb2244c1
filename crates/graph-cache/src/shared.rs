//! A shared handle that delivers notifications.
//!
//! [`Cache`] only reports which subscriptions changed. [`SharedCache`] owns
//! the cache behind `Rc<RefCell<_>>`, reads each notified subscription's
//! fresh data, releases the borrow and then calls the listeners, so a
//! listener may read from or write to the cache again.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use serde_json::Value;
use tracing::trace;

use crate::cache::{Cache, ListHandle, ReadOptions, ReadResult, WriteOptions};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::storage::LayerId;
use crate::subscription::{NotifySet, SubscriptionSpec};

#[derive(Debug, Clone, Default)]
pub struct SharedCache {
    inner: Rc<RefCell<Cache>>,
}

impl SharedCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Cache::new(config))),
        }
    }

    /// Direct access for operations that do not notify.
    ///
    /// Do not hold the guard across a call that notifies.
    pub fn borrow(&self) -> Ref<'_, Cache> {
        self.inner.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Cache> {
        self.inner.borrow_mut()
    }

    pub fn write(&self, options: WriteOptions<'_>) -> Result<(), CacheError> {
        let notify = self.inner.borrow_mut().write(options)?;
        self.deliver(notify);
        Ok(())
    }

    pub fn read(&self, options: ReadOptions<'_>) -> ReadResult {
        self.inner.borrow().read(options)
    }

    pub fn delete(&self, id: &str, layer: Option<LayerId>) -> Result<(), CacheError> {
        let notify = self.inner.borrow_mut().delete(id, layer)?;
        self.deliver(notify);
        Ok(())
    }

    pub fn clear_layer(&self, id: LayerId) -> Result<(), CacheError> {
        let notify = self.inner.borrow_mut().clear_layer(id)?;
        self.deliver(notify);
        Ok(())
    }

    pub fn subscribe(&self, spec: &SubscriptionSpec) {
        self.inner.borrow_mut().subscribe(spec);
    }

    pub fn unsubscribe(&self, spec: &SubscriptionSpec) {
        self.inner.borrow_mut().unsubscribe(spec);
    }

    /// Run a list operation and deliver what it changed.
    pub fn with_list<F>(
        &self,
        name: &str,
        parent: Option<&str>,
        all_lists: bool,
        operation: F,
    ) -> Result<(), CacheError>
    where
        F: FnOnce(&mut ListHandle<'_>) -> Result<NotifySet, CacheError>,
    {
        let notify = {
            let mut cache = self.inner.borrow_mut();
            let mut list = cache.list(name, parent, all_lists)?;
            operation(&mut list)?
        };
        self.deliver(notify);
        Ok(())
    }

    /// Read every subscription's data, then call the listeners with no
    /// borrow held.
    pub fn deliver(&self, notify: NotifySet) {
        let payloads: Vec<(SubscriptionSpec, Value)> = {
            let cache = self.inner.borrow();
            notify
                .into_iter()
                .map(|spec| {
                    let data = cache.read_subscription(&spec).data;
                    (spec, data)
                })
                .collect()
        };
        trace!(count = payloads.len(), "delivering notifications");
        for (spec, data) in payloads {
            spec.notify(&data);
        }
    }
}
