//! Bounded-staleness cache of discovered services

use std::fmt;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;

use crate::model::Service;

/// Discovery key: namespace, grouped service name and sorted cluster list.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub namespace_id: String,
    pub grouped_name: String,
    /// Sorted, comma-joined cluster names; empty for all clusters
    pub clusters: String,
}

impl ServiceKey {
    pub fn new<S: AsRef<str>>(namespace_id: &str, grouped_name: &str, clusters: &[S]) -> Self {
        let mut clusters: Vec<&str> = clusters
            .iter()
            .map(AsRef::as_ref)
            .filter(|c| !c.is_empty())
            .collect();
        clusters.sort_unstable();
        Self {
            namespace_id: namespace_id.to_string(),
            grouped_name: grouped_name.to_string(),
            clusters: clusters.join(","),
        }
    }

    /// Key of a service view received in `namespace_id`.
    pub fn of_service(namespace_id: &str, service: &Service) -> Self {
        Self::new(namespace_id, &service.name, service.cluster_list().as_slice())
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clusters.is_empty() {
            write!(f, "{}##{}", self.namespace_id, self.grouped_name)
        } else {
            write!(
                f,
                "{}##{}@@{}",
                self.namespace_id, self.grouped_name, self.clusters
            )
        }
    }
}

/// Most recent view per [`ServiceKey`], with its local fetch time.
pub struct ServiceCache {
    services: DashMap<ServiceKey, Service>,
}

impl ServiceCache {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    pub fn get(&self, key: &ServiceKey) -> Option<Service> {
        self.services.get(key).map(|e| e.clone())
    }

    /// Cached view no older than `max_age`.
    pub fn get_fresh(&self, key: &ServiceKey, max_age: Duration) -> Option<Service> {
        self.services.get(key).and_then(|entry| {
            let fetched_at = entry.fetched_at?;
            if Instant::now().saturating_duration_since(fetched_at) <= max_age {
                Some(entry.clone())
            } else {
                None
            }
        })
    }

    /// Stamp `service` with the current time and replace the entry.
    pub fn put(&self, key: ServiceKey, mut service: Service) -> Service {
        service.fetched_at = Some(Instant::now());
        self.services.insert(key, service.clone());
        service
    }

    /// Replace the entry with `service`.
    ///
    /// Returns the stored view only when the entry was absent or its
    /// instances differ. The comparison and the write happen under the
    /// entry's lock.
    pub fn apply_if_changed(&self, key: ServiceKey, mut service: Service) -> Option<Service> {
        service.fetched_at = Some(Instant::now());
        match self.services.entry(key) {
            Entry::Occupied(mut entry) => {
                let changed = entry.get().instances_differ(&service);
                entry.insert(service.clone());
                changed.then_some(service)
            }
            Entry::Vacant(entry) => {
                entry.insert(service.clone());
                Some(service)
            }
        }
    }

    pub fn remove(&self, key: &ServiceKey) -> Option<Service> {
        self.services.remove(key).map(|(_, v)| v)
    }

    /// Every cached view in `namespace_id`, keyed by its display key.
    pub fn snapshot(&self, namespace_id: &str) -> Vec<(String, Service)> {
        let mut entries: Vec<(String, Service)> = self
            .services
            .iter()
            .filter(|e| e.key().namespace_id == namespace_id)
            .map(|e| (e.key().to_string(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl Default for ServiceCache {
    fn default() -> Self {
        Self::new()
    }
}
