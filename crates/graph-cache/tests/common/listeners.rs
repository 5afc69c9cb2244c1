#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use graph_cache::selection::Selection;
use graph_cache::{Cache, Listener, NotifySet, SubscriptionSpec};
use serde_json::Value;

/// A listener that records every payload it is called with.
pub struct Recorder {
    pub calls: Rc<RefCell<Vec<Value>>>,
    pub listener: Listener,
}

impl Recorder {
    pub fn new() -> Self {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = calls.clone();
        let listener: Listener = Rc::new(move |data: &Value| sink.borrow_mut().push(data.clone()));
        Self { calls, listener }
    }

    pub fn spec(&self, selection: Selection) -> SubscriptionSpec {
        SubscriptionSpec::with_listener(selection, self.listener.clone())
    }

    pub fn count(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn last(&self) -> Option<Value> {
        self.calls.borrow().last().cloned()
    }
}

/// Call every notified listener with its subscription's current data.
pub fn deliver(cache: &Cache, notify: NotifySet) {
    for spec in notify {
        let data = cache.read_subscription(&spec).data;
        spec.notify(&data);
    }
}
