//! Naming event listener trait, event types and the subscription registry

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::model::{Instance, Service};
use crate::naming::cache::ServiceKey;

/// Event delivered to naming listeners when a service's instance list changes.
#[derive(Clone, Debug)]
pub struct NamingEvent {
    pub namespace_id: String,
    /// Grouped service name, e.g. "DEFAULT_GROUP@@orders"
    pub service_name: String,
    pub clusters: String,
    pub instances: Vec<Instance>,
}

impl NamingEvent {
    pub(crate) fn from_service(key: &ServiceKey, service: &Service) -> Self {
        Self {
            namespace_id: key.namespace_id.clone(),
            service_name: key.grouped_name.clone(),
            clusters: key.clusters.clone(),
            instances: service.hosts.clone(),
        }
    }
}

/// Receives the new instance list of a subscribed service.
///
/// Calls run on the blocking thread pool and may overlap. Any
/// `Fn(NamingEvent)` closure is a listener.
pub trait EventListener: Send + Sync + 'static {
    fn on_event(&self, event: NamingEvent);
}

impl<F> EventListener for F
where
    F: Fn(NamingEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: NamingEvent) {
        self(event)
    }
}

/// Listener lists per subscription key.
#[derive(Default)]
pub struct SubscriptionRegistry {
    listeners: Mutex<HashMap<ServiceKey, Vec<Arc<dyn EventListener>>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the key's listeners with `listener`. Returns true if the key was new.
    pub fn set(&self, key: ServiceKey, listener: Arc<dyn EventListener>) -> bool {
        self.listeners.lock().insert(key, vec![listener]).is_none()
    }

    /// Append `listener` to the key's list. Returns true if the key was new.
    pub fn append(&self, key: ServiceKey, listener: Arc<dyn EventListener>) -> bool {
        let mut listeners = self.listeners.lock();
        let is_new = !listeners.contains_key(&key);
        listeners.entry(key).or_default().push(listener);
        is_new
    }

    /// Drop every listener of the key. Returns true if the key existed.
    pub fn remove(&self, key: &ServiceKey) -> bool {
        self.listeners.lock().remove(key).is_some()
    }

    pub fn contains(&self, key: &ServiceKey) -> bool {
        self.listeners.lock().contains_key(key)
    }

    /// Snapshot of the key's listeners; empty when unsubscribed.
    pub fn listeners(&self, key: &ServiceKey) -> Vec<Arc<dyn EventListener>> {
        self.listeners
            .lock()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<ServiceKey> {
        self.listeners.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(name: &str) -> ServiceKey {
        ServiceKey::new::<&str>("public", name, &[])
    }

    fn counting(counter: &Arc<AtomicUsize>) -> Arc<dyn EventListener> {
        let counter = counter.clone();
        Arc::new(move |_: NamingEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_event_from_service() {
        let key = ServiceKey::new("dev", "DEFAULT_GROUP@@orders", &["b", "a"]);
        let service = Service {
            name: "DEFAULT_GROUP@@orders".to_string(),
            hosts: vec![Instance::new("10.0.0.1", 8080)],
            ..Default::default()
        };

        let event = NamingEvent::from_service(&key, &service);
        assert_eq!(event.namespace_id, "dev");
        assert_eq!(event.service_name, "DEFAULT_GROUP@@orders");
        assert_eq!(event.clusters, "a,b");
        assert_eq!(event.instances[0].address(), "10.0.0.1:8080");
    }

    #[test]
    fn test_registered_closures_are_called() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        registry.set(key("a"), counting(&counter));
        registry.append(key("a"), counting(&counter));

        let event = NamingEvent::from_service(&key("a"), &Service::default());
        for listener in registry.listeners(&key("a")) {
            listener.on_event(event.clone());
        }
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_set_replaces_and_append_adds() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        assert!(registry.set(key("a"), counting(&counter)));
        assert!(!registry.append(key("a"), counting(&counter)));
        assert_eq!(registry.listeners(&key("a")).len(), 2);

        assert!(!registry.set(key("a"), counting(&counter)));
        assert_eq!(registry.listeners(&key("a")).len(), 1);

        assert!(registry.append(key("b"), counting(&counter)));
        assert_eq!(registry.keys().len(), 2);
    }

    #[test]
    fn test_remove_drops_all_listeners() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        registry.set(key("a"), counting(&counter));
        registry.append(key("a"), counting(&counter));

        assert!(registry.remove(&key("a")));
        assert!(!registry.contains(&key("a")));
        assert!(registry.listeners(&key("a")).is_empty());
        assert!(!registry.remove(&key("a")));
    }
}
