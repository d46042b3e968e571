//! Service discovery (naming) service
//!
//! Provides `NamingService` for instance registration/deregistration with
//! heartbeats, cached service queries, and push-backed subscriptions.

pub mod beat;
pub mod cache;
pub mod listener;
pub mod push;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::log::Logger;
use crate::model::{Service, parse_service};
use crate::options::ClientConfig;
use crate::param::{InstanceParams, PushTarget, Registration, ServiceQuery};
use crate::transport::Transport;

use self::beat::{BeatInfo, BeatReactor};
use self::cache::{ServiceCache, ServiceKey};
use self::listener::{EventListener, SubscriptionRegistry};
use self::push::{ChangeNotifier, PushReceiver};

/// Nacos-compatible naming service over the v1 HTTP open API.
pub struct NamingService {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    beat_reactor: Arc<BeatReactor>,
    notifier: ChangeNotifier,
    /// Push port per namespace
    receivers: Mutex<HashMap<String, u16>>,
    /// Keys with a running refresh task
    refreshing: Arc<parking_lot::Mutex<HashSet<ServiceKey>>>,
    logger: Arc<dyn Logger>,
    cancel: CancellationToken,
}

impl NamingService {
    /// `config` must already be resolved (discovery IP and app name filled).
    pub fn new(
        config: Arc<ClientConfig>,
        transport: Arc<dyn Transport>,
        logger: Arc<dyn Logger>,
        cancel: CancellationToken,
    ) -> Self {
        let beat_reactor = Arc::new(BeatReactor::new(
            transport.clone(),
            logger.clone(),
            cancel.clone(),
        ));
        let notifier = ChangeNotifier::new(
            Arc::new(ServiceCache::new()),
            Arc::new(SubscriptionRegistry::new()),
            logger.clone(),
        );
        Self {
            config,
            transport,
            beat_reactor,
            notifier,
            receivers: Mutex::new(HashMap::new()),
            refreshing: Arc::new(parking_lot::Mutex::new(HashSet::new())),
            logger,
            cancel,
        }
    }

    pub fn beat_reactor(&self) -> &Arc<BeatReactor> {
        &self.beat_reactor
    }

    pub fn service_cache(&self) -> &Arc<ServiceCache> {
        self.notifier.cache()
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        self.notifier.subscriptions()
    }

    /// Push port bound for `namespace_id`, if any subscription created one.
    pub async fn push_port(&self, namespace_id: &str) -> Option<u16> {
        self.receivers.lock().await.get(namespace_id).copied()
    }

    /// Register a service instance.
    ///
    /// Registering the same (service, cluster, namespace, ip, port) twice is a
    /// local no-op. Ephemeral instances get one immediate heartbeat and a
    /// keep-alive task.
    pub async fn register_instance(
        &self,
        ip: &str,
        port: u16,
        service_name: &str,
        params: &InstanceParams,
    ) -> Result<()> {
        let reg = Registration::resolve(
            ip,
            port,
            service_name,
            params,
            &self.config.default_namespace_id,
        );
        let key = reg.beat_key();
        if !self.beat_reactor.try_add(key.clone()) {
            self.logger
                .warn(&format!("instance {} already registered, skipping", key));
            return Ok(());
        }

        self.logger.debug(&format!("registering instance {}", key));
        if let Err(e) = self.transport.execute(reg.register_request()).await {
            self.beat_reactor.remove(&key);
            self.logger
                .error(&format!("failed to register instance {}: {}", key, e));
            return Err(e);
        }

        if reg.ephemeral {
            let mut beat = BeatInfo::from(&reg);
            if let Err(e) = self.beat_reactor.send_beat(&reg, &mut beat).await {
                self.logger
                    .error(&format!("first heartbeat of {} failed: {}", key, e));
            }
            beat.settle_period();
            self.beat_reactor.spawn_keep_alive(reg, beat);
        }
        Ok(())
    }

    /// Deregister a service instance and stop its heartbeat.
    pub async fn deregister_instance(
        &self,
        ip: &str,
        port: u16,
        service_name: &str,
        params: &InstanceParams,
    ) -> Result<()> {
        let reg = Registration::resolve(
            ip,
            port,
            service_name,
            params,
            &self.config.default_namespace_id,
        );
        let key = reg.beat_key();
        self.beat_reactor.remove(&key);

        self.logger.debug(&format!("deregistering instance {}", key));
        self.transport
            .execute(reg.deregister_request())
            .await
            .inspect_err(|e| {
                self.logger
                    .error(&format!("failed to deregister instance {}: {}", key, e))
            })?;
        Ok(())
    }

    /// Query a service's instances.
    ///
    /// With `lazy`, a cached view younger than `max_cache_time_ms` is returned
    /// without a request. Every successful fetch replaces the cached view.
    pub async fn get_service(
        &self,
        service_name: &str,
        lazy: bool,
        params: &InstanceParams,
    ) -> Result<Service> {
        let query = ServiceQuery::resolve(service_name, params, &self.config.default_namespace_id);
        let key = service_key(&query);

        if lazy
            && let Some(service) = self
                .service_cache()
                .get_fresh(&key, self.config.max_cache_time())
        {
            return Ok(service);
        }

        let service = fetch_service(self.transport.as_ref(), &query, None).await?;
        Ok(self.service_cache().put(key, service))
    }

    /// Subscribe `listener` to a service, replacing the key's previous listeners.
    pub async fn subscribe(
        &self,
        service_name: &str,
        params: &InstanceParams,
        listener: Arc<dyn EventListener>,
    ) -> Result<()> {
        self.watch(service_name, params, listener, true).await
    }

    /// Add `listener` next to the key's existing listeners.
    pub async fn add_listener(
        &self,
        service_name: &str,
        params: &InstanceParams,
        listener: Arc<dyn EventListener>,
    ) -> Result<()> {
        self.watch(service_name, params, listener, false).await
    }

    /// Drop every listener of the service key.
    ///
    /// The namespace's push receiver keeps running; pushes for this key are
    /// still cached but no longer dispatched.
    pub fn unsubscribe(&self, service_name: &str, params: &InstanceParams) {
        let query = ServiceQuery::resolve(service_name, params, &self.config.default_namespace_id);
        let key = service_key(&query);
        if self.subscriptions().remove(&key) {
            self.logger.debug(&format!("unsubscribed {}", key));
        }
    }

    async fn watch(
        &self,
        service_name: &str,
        params: &InstanceParams,
        listener: Arc<dyn EventListener>,
        replace: bool,
    ) -> Result<()> {
        let query = ServiceQuery::resolve(service_name, params, &self.config.default_namespace_id);
        let key = service_key(&query);
        let subscriber = listener.clone();
        let is_new = if replace {
            self.subscriptions().set(key.clone(), listener)
        } else {
            self.subscriptions().append(key.clone(), listener)
        };
        self.logger.debug(&format!("subscribing {}", key));

        let udp_port = match self.ensure_receiver(&query.namespace_id).await {
            Ok(port) => port,
            Err(e) => {
                if is_new {
                    self.subscriptions().remove(&key);
                }
                return Err(e);
            }
        };
        let target = PushTarget {
            udp_port,
            client_ip: self.config.resolved_discovery_ip(),
            app: self.config.resolved_app_name(),
        };

        let service = match fetch_service(self.transport.as_ref(), &query, Some(&target)).await {
            Ok(service) => service,
            Err(e) => {
                if is_new {
                    self.subscriptions().remove(&key);
                }
                return Err(e);
            }
        };
        let cache_millis = service.cache_millis;
        // Existing listeners only hear about real changes; the new one always
        // gets the current view once.
        if !self.notifier.apply(key.clone(), service.clone()) {
            self.notifier.notify_one(&key, &service, subscriber);
        }

        if self.refreshing.lock().insert(key.clone()) {
            self.spawn_refresh(query, target, key, cache_millis);
        }
        Ok(())
    }

    async fn ensure_receiver(&self, namespace_id: &str) -> Result<u16> {
        let mut receivers = self.receivers.lock().await;
        if let Some(port) = receivers.get(namespace_id) {
            return Ok(*port);
        }

        let receiver = PushReceiver::bind(
            &self.config.resolved_discovery_ip(),
            namespace_id,
            self.notifier.clone(),
            self.logger.clone(),
        )
        .await?;
        let port = receiver.port();
        receiver.spawn(self.cancel.clone());
        receivers.insert(namespace_id.to_string(), port);
        Ok(port)
    }

    /// Re-fetch a subscribed service every `cacheMillis` so the server keeps
    /// pushing to us, until the key is unsubscribed or the client shuts down.
    fn spawn_refresh(
        &self,
        query: ServiceQuery,
        target: PushTarget,
        key: ServiceKey,
        cache_millis: i64,
    ) {
        let transport = self.transport.clone();
        let notifier = self.notifier.clone();
        let logger = self.logger.clone();
        let cancel = self.cancel.clone();
        let refreshing = self.refreshing.clone();
        let fallback = self.config.subscribe_cache_time();

        tokio::spawn(async move {
            let mut cache_millis = cache_millis;
            loop {
                let period = refresh_period(cache_millis, fallback);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(period) => {}
                }
                {
                    let mut running = refreshing.lock();
                    if !notifier.subscriptions().contains(&key) {
                        running.remove(&key);
                        logger.debug(&format!("refresh of {} stopped", key));
                        return;
                    }
                }
                match fetch_service(transport.as_ref(), &query, Some(&target)).await {
                    Ok(service) => {
                        cache_millis = service.cache_millis;
                        notifier.apply(key.clone(), service);
                    }
                    Err(e) => logger.error(&format!("refresh of {} failed: {}", key, e)),
                }
            }
        });
    }
}

fn service_key(query: &ServiceQuery) -> ServiceKey {
    ServiceKey::new(
        &query.namespace_id,
        &query.grouped_service_name(),
        query.clusters.as_slice(),
    )
}

fn refresh_period(cache_millis: i64, fallback: Duration) -> Duration {
    if cache_millis > 0 {
        Duration::from_millis(cache_millis as u64)
    } else {
        fallback
    }
}

async fn fetch_service(
    transport: &dyn Transport,
    query: &ServiceQuery,
    push: Option<&PushTarget>,
) -> Result<Service> {
    let body = transport.execute(query.list_request(push)).await?;
    parse_service(&body)
}
