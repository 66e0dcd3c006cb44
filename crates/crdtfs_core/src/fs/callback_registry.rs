//! Callback registry for filesystem event subscriptions.
//!
//! Subscribers receive [`FileSystemEvent`](super::FileSystemEvent)
//! notifications after the document call that caused them returns.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use super::events::FileSystemEvent;

/// A unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Callback function type for filesystem events.
///
/// Callbacks receive a reference to the event and should not block for extended periods.
pub type EventCallback = Arc<dyn Fn(&FileSystemEvent) + Send + Sync>;

/// Which events a subscription wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    /// Metadata and folder events.
    Metadata,
    /// Text content events.
    Contents,
    /// Everything.
    All,
}

impl EventFilter {
    fn accepts(self, event: &FileSystemEvent) -> bool {
        match self {
            EventFilter::Metadata => event.is_metadata(),
            EventFilter::Contents => !event.is_metadata(),
            EventFilter::All => true,
        }
    }
}

/// Thread-safe registry for managing event subscriptions.
///
/// Callbacks run in subscription order.
///
/// # Example
///
/// ```
/// use crdtfs_core::fs::{CallbackRegistry, EventFilter, FileSystemEvent};
/// use crdtfs_core::crdt::FileId;
/// use std::sync::Arc;
///
/// let registry = CallbackRegistry::new();
///
/// let id = registry.subscribe(EventFilter::All, Arc::new(|event| {
///     println!("Event: {:?}", event);
/// }));
///
/// registry.emit(&FileSystemEvent::contents_changed(FileId::new("1-ab")));
///
/// registry.unsubscribe(id);
/// ```
pub struct CallbackRegistry {
    callbacks: RwLock<BTreeMap<SubscriptionId, (EventFilter, EventCallback)>>,
    next_id: AtomicU64,
}

impl CallbackRegistry {
    /// Create a new empty callback registry.
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to events matching `filter`.
    ///
    /// Returns a subscription ID that can be used to unsubscribe later.
    pub fn subscribe(&self, filter: EventFilter, callback: EventCallback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.callbacks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, (filter, callback));
        id
    }

    /// Unsubscribe.
    ///
    /// Returns `true` if the subscription was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.callbacks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id)
            .is_some()
    }

    /// Emit an event to all matching callbacks.
    ///
    /// If a callback panics, it does not affect other callbacks.
    pub fn emit(&self, event: &FileSystemEvent) {
        // Snapshot so a callback may subscribe or unsubscribe
        let callbacks: Vec<EventCallback> = self
            .callbacks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter(|(filter, _)| filter.accepts(event))
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in callbacks {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(event))).is_err()
            {
                log::warn!("Observer panicked while handling {}", event.event_type());
            }
        }
    }

    /// Get the number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Check if there are any active subscriptions.
    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count() > 0
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("subscriber_count", &self.subscriber_count())
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::FileId;
    use std::sync::atomic::AtomicUsize;

    fn created() -> FileSystemEvent {
        FileSystemEvent::file_created(FileId::new("1-ab"), "a.txt", None)
    }

    fn counting(counter: &Arc<AtomicUsize>) -> EventCallback {
        let counter = Arc::clone(counter);
        Arc::new(move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_subscribe_and_emit() {
        let registry = CallbackRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        registry.subscribe(EventFilter::All, counting(&counter));

        assert_eq!(registry.subscriber_count(), 1);
        registry.emit(&created());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let registry = CallbackRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = registry.subscribe(EventFilter::All, counting(&counter));

        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert!(!registry.has_subscribers());

        registry.emit(&created());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_filters() {
        let registry = CallbackRegistry::new();
        let meta = Arc::new(AtomicUsize::new(0));
        let contents = Arc::new(AtomicUsize::new(0));
        registry.subscribe(EventFilter::Metadata, counting(&meta));
        registry.subscribe(EventFilter::Contents, counting(&contents));

        registry.emit(&created());
        registry.emit(&FileSystemEvent::contents_changed(FileId::new("1-ab")));
        registry.emit(&FileSystemEvent::contents_changed(FileId::new("1-ab")));

        assert_eq!(meta.load(Ordering::SeqCst), 1);
        assert_eq!(contents.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unique_subscription_ids() {
        let registry = CallbackRegistry::new();
        let id1 = registry.subscribe(EventFilter::All, Arc::new(|_| {}));
        let id2 = registry.subscribe(EventFilter::All, Arc::new(|_| {}));
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_callback_panic_isolation() {
        let registry = CallbackRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        registry.subscribe(
            EventFilter::All,
            Arc::new(|_| {
                panic!("Test panic");
            }),
        );
        registry.subscribe(EventFilter::All, counting(&counter));

        registry.emit(&created());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
