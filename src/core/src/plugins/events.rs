//! In-process event dispatch for plugin listeners.
//!
//! Listeners bind to an event pattern — exact (`worker.started`), prefix
//! wildcard (`queue.*`), or catch-all (`*`) — with an integer priority;
//! higher priorities run first, ties run in binding order. Dispatch is
//! synchronous and best-effort: a panicking listener is contained and logged,
//! the rest still run.

use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Callback invoked with the event name and its payload.
pub type ListenerFn = Arc<dyn Fn(&str, &serde_json::Value) + Send + Sync>;

struct ListenerBinding {
    pattern: String,
    priority: i32,
    callback: ListenerFn,
}

/// Synchronous event dispatcher with wildcard patterns and priorities.
#[derive(Default)]
pub struct EventDispatcher {
    listeners: RwLock<Vec<ListenerBinding>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a listener to an event pattern.
    pub fn listen(&self, pattern: impl Into<String>, priority: i32, callback: ListenerFn) {
        self.listeners.write().push(ListenerBinding {
            pattern: pattern.into(),
            priority,
            callback,
        });
    }

    /// Number of bound listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Dispatch an event to every matching listener.
    pub fn dispatch(&self, event: &str, data: &serde_json::Value) {
        let listeners = self.listeners.read();
        let mut matching: Vec<&ListenerBinding> = listeners
            .iter()
            .filter(|l| pattern_matches(&l.pattern, event))
            .collect();
        // Stable sort keeps binding order for equal priorities.
        matching.sort_by_key(|l| std::cmp::Reverse(l.priority));

        debug!(event, listeners = matching.len(), "Dispatching event");
        for listener in matching {
            let result = catch_unwind(AssertUnwindSafe(|| (listener.callback)(event, data)));
            if result.is_err() {
                warn!(event, pattern = %listener.pattern, "Event listener panicked");
            }
        }
    }
}

/// Match an event name against a listener pattern.
fn pattern_matches(pattern: &str, event: &str) -> bool {
    if pattern == "*" || pattern == event {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return event
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_pattern_matching() {
        assert!(pattern_matches("*", "anything"));
        assert!(pattern_matches("queue.pushed", "queue.pushed"));
        assert!(pattern_matches("queue.*", "queue.pushed"));
        assert!(pattern_matches("queue.*", "queue.purged.all"));
        assert!(!pattern_matches("queue.*", "worker.started"));
        assert!(!pattern_matches("queue.*", "queue"));
        assert!(!pattern_matches("queue.pushed", "queue.purged"));
    }

    #[test]
    fn test_priority_ordering() {
        let dispatcher = EventDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (tag, priority) in [("low", 0), ("high", 10), ("mid", 5)] {
            let order = Arc::clone(&order);
            dispatcher.listen(
                "job.*",
                priority,
                Arc::new(move |_event, _data| order.lock().push(tag)),
            );
        }

        dispatcher.dispatch("job.finished", &serde_json::json!({}));
        assert_eq!(*order.lock(), vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_panicking_listener_is_contained() {
        let dispatcher = EventDispatcher::new();
        let hits = Arc::new(Mutex::new(0u32));

        dispatcher.listen("boom", 10, Arc::new(|_, _| panic!("listener bug")));
        let counter = Arc::clone(&hits);
        dispatcher.listen("boom", 0, Arc::new(move |_, _| *counter.lock() += 1));

        dispatcher.dispatch("boom", &serde_json::json!({}));
        assert_eq!(*hits.lock(), 1);
    }
}
