//! Online upgrade notifications.
//!
//! Listeners are invoked in registration order. A listener that panics is
//! logged and skipped; the remaining listeners are still notified.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;

/// Receives the lifecycle of online reindex runs.
pub trait OnlineUpgradeListener: Send + Sync {
    fn on_start(&self, _name: &str, _old_version: u32, _new_version: u32) {}

    fn on_success(&self, _name: &str, _old_version: u32, _new_version: u32) {}

    fn on_failure(&self, _name: &str, _old_version: u32, _new_version: u32) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Start,
    Success,
    Failure,
}

/// Cloneable registry of listeners.
#[derive(Clone, Default)]
pub struct UpgradeListeners {
    listeners: Arc<RwLock<Vec<Arc<dyn OnlineUpgradeListener>>>>,
}

impl UpgradeListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn OnlineUpgradeListener>) {
        self.listeners.write().push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify_start(&self, name: &str, old_version: u32, new_version: u32) {
        self.fan_out(Event::Start, name, old_version, new_version);
    }

    pub fn notify_success(&self, name: &str, old_version: u32, new_version: u32) {
        self.fan_out(Event::Success, name, old_version, new_version);
    }

    pub fn notify_failure(&self, name: &str, old_version: u32, new_version: u32) {
        self.fan_out(Event::Failure, name, old_version, new_version);
    }

    fn fan_out(&self, event: Event, name: &str, old_version: u32, new_version: u32) {
        // Snapshot so a listener may register others without deadlocking.
        let listeners: Vec<_> = self.listeners.read().clone();
        for listener in listeners {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| match event {
                Event::Start => listener.on_start(name, old_version, new_version),
                Event::Success => listener.on_success(name, old_version, new_version),
                Event::Failure => listener.on_failure(name, old_version, new_version),
            }));
            if outcome.is_err() {
                tracing::error!(
                    index = name,
                    old_version,
                    new_version,
                    event = ?event,
                    "online upgrade listener panicked"
                );
            }
        }
    }
}
