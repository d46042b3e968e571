//! Config change notifications

use crate::config::cache::build_cache_key;

/// New content of a watched config.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigResponse {
    pub data_id: String,
    pub group: String,
    pub tenant: String,
    pub content: String,
    /// Fingerprint the watch polls with from now on
    pub md5: String,
}

impl ConfigResponse {
    /// `dataId+group[+tenant]`
    pub fn key(&self) -> String {
        build_cache_key(&self.data_id, &self.group, &self.tenant)
    }
}

/// Receives the content of a watched config each time it changes.
///
/// Calls happen on the watch task, one at a time and in change order. Any
/// `Fn(ConfigResponse)` closure is a listener.
pub trait ConfigChangeListener: Send + Sync + 'static {
    fn receive_config_info(&self, config_info: ConfigResponse);
}

impl<F> ConfigChangeListener for F
where
    F: Fn(ConfigResponse) + Send + Sync + 'static,
{
    fn receive_config_info(&self, config_info: ConfigResponse) {
        self(config_info)
    }
}
