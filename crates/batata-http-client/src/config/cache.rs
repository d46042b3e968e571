//! Last known content per config key

use dashmap::DashMap;

use crate::param::md5_hex;

/// `dataId+group`, with `+tenant` appended when a tenant is set.
pub fn build_cache_key(data_id: &str, group: &str, tenant: &str) -> String {
    if tenant.is_empty() {
        format!("{}+{}", data_id, group)
    } else {
        format!("{}+{}+{}", data_id, group, tenant)
    }
}

/// Content as last seen from the server, with its fingerprint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub content: String,
    pub md5: String,
}

impl Snapshot {
    fn of(content: &str) -> Self {
        Self {
            content: content.to_string(),
            md5: md5_hex(content),
        }
    }
}

/// Shared by config reads and watch loops so a watch started after a read
/// polls with the fingerprint of what was read.
#[derive(Default)]
pub struct ConfigCache {
    snapshots: DashMap<String, Snapshot>,
}

impl ConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, data_id: &str, group: &str, tenant: &str) -> Option<Snapshot> {
        let key = build_cache_key(data_id, group, tenant);
        self.snapshots.get(&key).map(|s| s.value().clone())
    }

    /// Empty when nothing is known, which makes the server answer the
    /// first poll immediately.
    pub fn md5(&self, data_id: &str, group: &str, tenant: &str) -> String {
        self.get(data_id, group, tenant)
            .map(|s| s.md5)
            .unwrap_or_default()
    }

    /// Records `content` and returns its MD5.
    pub fn update(&self, data_id: &str, group: &str, tenant: &str, content: &str) -> String {
        let snapshot = Snapshot::of(content);
        let md5 = snapshot.md5.clone();
        self.snapshots
            .insert(build_cache_key(data_id, group, tenant), snapshot);
        md5
    }

    pub fn remove(&self, data_id: &str, group: &str, tenant: &str) -> Option<Snapshot> {
        self.snapshots
            .remove(&build_cache_key(data_id, group, tenant))
            .map(|(_, s)| s)
    }
}
