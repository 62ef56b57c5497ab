//! The gateway façade: one owned value holding every shared component.
//!
//! There are no process-wide singletons. The `Gateway` owns the compiled
//! routing table, the per-API bulkhead registry, the admin toggle map, the
//! upstream client factory, the resolver, the mailbox store and the callback
//! dispatcher. Swap-able components live behind `RwLock<Arc<_>>` and are
//! replaced wholesale on configuration reload, so readers always observe a
//! consistent table.
//!
//! External drivers (an external KV mailbox, a cluster-discovery feed) are
//! injected through [`GatewayBuilder`] rather than subclassed in.

use crate::models::error::GatewayError;
use crate::models::settings::{MailboxKind, Settings};
use crate::services::bulkhead::{BulkheadRegistry, CircuitState};
use crate::services::client::ClientFactory;
use crate::services::dispatcher::{CallbackConfig, CallbackDispatcher, CallbackWorker};
use crate::services::engine::{EngineResponse, ExecutionEngine, IngressRequest};
use crate::services::resolver::{ClusterWatch, ServiceResolver, ServiceStatusSummary};
use crate::storage::memory::InMemoryMailbox;
use crate::storage::MailboxStore;
use crate::utils::route_matcher::ServiceRouter;

use ahash::HashMap as AHashMap;
use log::{info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Admin enable/disable flags, one per registered `(service, api)` pair.
///
/// Registered APIs default to enabled. Flags survive config reloads for the
/// APIs that still exist afterwards.
#[derive(Debug, Default)]
pub struct ApiToggles {
    inner: RwLock<AHashMap<(String, String), bool>>,
}

impl ApiToggles {
    /// Syncs the toggle map with the configured APIs: new pairs default to
    /// enabled, stale pairs are dropped, existing flags are preserved.
    pub fn register(&self, settings: &Settings) {
        let mut map = self.inner.write().expect("toggles lock");
        let mut next: AHashMap<(String, String), bool> = AHashMap::default();
        for service in &settings.services {
            for api in &service.apis {
                let key = (service.name.clone(), api.name.clone());
                let enabled = map.get(&key).copied().unwrap_or(true);
                next.insert(key, enabled);
            }
        }
        *map = next;
    }

    pub fn is_enabled(&self, service: &str, api: &str) -> bool {
        self.inner
            .read()
            .expect("toggles lock")
            .get(&(service.to_string(), api.to_string()))
            .copied()
            .unwrap_or(false)
    }

    /// Flips one flag. Unknown pairs are a caller error.
    pub fn set(&self, service: &str, api: &str, enabled: bool) -> Result<(), GatewayError> {
        let mut map = self.inner.write().expect("toggles lock");
        match map.get_mut(&(service.to_string(), api.to_string())) {
            Some(flag) => {
                *flag = enabled;
                info!(
                    "api {}.{} {}",
                    service,
                    api,
                    if enabled { "enabled" } else { "disabled" }
                );
                Ok(())
            }
            None => Err(GatewayError::BadRequest {
                message: format!("unknown api {}.{}", service, api),
            }),
        }
    }

    fn snapshot(&self) -> Vec<((String, String), bool)> {
        let map = self.inner.read().expect("toggles lock");
        let mut rows: Vec<_> = map.iter().map(|(k, v)| (k.clone(), *v)).collect();
        rows.sort();
        rows
    }
}

/// One row of the admin status listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiStatus {
    pub service: String,
    pub api: String,
    pub enabled: bool,
    pub circuit: Option<CircuitState>,
    pub window_errors: Option<usize>,
}

/// Builder that wires the gateway together, accepting external providers as
/// plain dependencies.
pub struct GatewayBuilder {
    settings: Settings,
    mailbox: Option<Arc<dyn MailboxStore>>,
    cluster_watch: Option<ClusterWatch>,
}

impl GatewayBuilder {
    /// Injects the store backing `mailBox.type: external`.
    pub fn mailbox(mut self, store: Arc<dyn MailboxStore>) -> Self {
        self.mailbox = Some(store);
        self
    }

    /// Injects the live member feeds backing `useCurator: true`.
    pub fn cluster_watch(mut self, watch: ClusterWatch) -> Self {
        self.cluster_watch = Some(watch);
        self
    }

    pub fn build(self) -> Result<Gateway, String> {
        let settings = self.settings;
        settings.validate()?;

        let router = ServiceRouter::compile(&settings.services).map_err(|e| e.to_string())?;
        let clients = ClientFactory::build(&settings)?;
        let resolver = ServiceResolver::from_settings(&settings, self.cluster_watch.clone())?;

        let (store, memory): (Arc<dyn MailboxStore>, Option<Arc<InMemoryMailbox>>) =
            match settings.mail_box.kind {
                MailboxKind::InMemory => {
                    let memory = InMemoryMailbox::new(settings.mail_box.ttl_seconds);
                    let store: Arc<dyn MailboxStore> = Arc::clone(&memory) as Arc<dyn MailboxStore>;
                    (store, Some(memory))
                }
                MailboxKind::External => {
                    let store = self
                        .mailbox
                        .ok_or_else(|| "external mailbox requires an injected store".to_string())?;
                    (store, None)
                }
            };

        let (dispatcher, worker) =
            CallbackDispatcher::new(CallbackConfig::from_settings(&settings), Arc::clone(&store))?;

        let toggles = Arc::new(ApiToggles::default());
        toggles.register(&settings);

        let settings = Arc::new(RwLock::new(Arc::new(settings)));
        let router = Arc::new(RwLock::new(Arc::new(router)));
        let clients = Arc::new(RwLock::new(Arc::new(clients)));
        let resolver = Arc::new(RwLock::new(Arc::new(resolver)));
        let bulkheads = Arc::new(BulkheadRegistry::new());

        let engine = ExecutionEngine {
            settings: Arc::clone(&settings),
            router: Arc::clone(&router),
            clients: Arc::clone(&clients),
            resolver: Arc::clone(&resolver),
            bulkheads: Arc::clone(&bulkheads),
            toggles: Arc::clone(&toggles),
            store: Arc::clone(&store),
            dispatcher: dispatcher.clone(),
        };

        Ok(Gateway {
            settings,
            router,
            clients,
            resolver,
            bulkheads,
            toggles,
            store,
            memory,
            dispatcher,
            engine,
            worker: Mutex::new(Some(worker)),
            cluster_watch: self.cluster_watch,
        })
    }
}

/// The assembled gateway.
pub struct Gateway {
    settings: Arc<RwLock<Arc<Settings>>>,
    router: Arc<RwLock<Arc<ServiceRouter>>>,
    clients: Arc<RwLock<Arc<ClientFactory>>>,
    resolver: Arc<RwLock<Arc<ServiceResolver>>>,
    bulkheads: Arc<BulkheadRegistry>,
    toggles: Arc<ApiToggles>,
    store: Arc<dyn MailboxStore>,
    memory: Option<Arc<InMemoryMailbox>>,
    dispatcher: CallbackDispatcher,
    engine: ExecutionEngine,
    worker: Mutex<Option<CallbackWorker>>,
    cluster_watch: Option<ClusterWatch>,
}

impl Gateway {
    pub fn builder(settings: Settings) -> GatewayBuilder {
        GatewayBuilder {
            settings,
            mailbox: None,
            cluster_watch: None,
        }
    }

    /// Spawns the background machinery: callback worker, callback rescuer
    /// and (for the in-memory mailbox) the TTL sweeper. Call once.
    pub fn start_background(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        if let Some(worker) = self.worker.lock().expect("worker lock").take() {
            handles.push(tokio::spawn(worker.run()));
        } else {
            warn!("background tasks already started");
        }
        handles.push(self.dispatcher.spawn_rescuer());
        if let Some(memory) = &self.memory {
            handles.push(memory.spawn_sweeper());
        }
        handles
    }

    /// Runs the invoke pipeline for one ingress request.
    pub async fn invoke(&self, ingress: IngressRequest) -> Result<EngineResponse, GatewayError> {
        self.engine.invoke(ingress).await
    }

    /// Applies a new configuration transactionally.
    ///
    /// Everything is rebuilt off to the side first; only when router,
    /// clients and resolver all build does the gateway swap them in. A
    /// validation or build failure leaves the running config untouched.
    /// Returns `false` for a no-op (identical content - bulkheads are not
    /// rebuilt).
    pub fn apply(&self, new_settings: Settings) -> Result<bool, String> {
        new_settings.validate()?;
        {
            let current = self.settings.read().expect("settings lock");
            if **current == new_settings {
                return Ok(false);
            }
        }

        let router = ServiceRouter::compile(&new_settings.services).map_err(|e| e.to_string())?;
        let clients = ClientFactory::build(&new_settings)?;
        let resolver = ServiceResolver::from_settings(&new_settings, self.cluster_watch.clone())?;

        self.toggles.register(&new_settings);
        *self.router.write().expect("router lock") = Arc::new(router);
        *self.clients.write().expect("clients lock") = Arc::new(clients);
        *self.resolver.write().expect("resolver lock") = Arc::new(resolver);
        *self.settings.write().expect("settings lock") = Arc::new(new_settings);
        // In-flight requests keep the compartments they acquired; new calls
        // build fresh ones against the new runtime.
        self.bulkheads.rebuild();
        info!("configuration applied, routing table swapped");
        Ok(true)
    }

    /// Admin listing: every registered API with its toggle and breaker
    /// state. Compartments that have not been exercised yet report no
    /// circuit.
    pub fn api_status(&self) -> Vec<ApiStatus> {
        let breakers: AHashMap<String, (CircuitState, usize)> = self
            .bulkheads
            .states()
            .into_iter()
            .map(|(name, state, errors)| (name, (state, errors)))
            .collect();
        self.toggles
            .snapshot()
            .into_iter()
            .map(|((service, api), enabled)| {
                let breaker = breakers.get(&format!("{}.{}", service, api));
                ApiStatus {
                    service,
                    api,
                    enabled,
                    circuit: breaker.map(|(state, _)| *state),
                    window_errors: breaker.map(|(_, errors)| *errors),
                }
            })
            .collect()
    }

    /// Summary rows for `/v1/metadata/status`.
    pub fn metadata_status(&self) -> Vec<ServiceStatusSummary> {
        let settings = self.settings.read().expect("settings lock").clone();
        let resolver = self.resolver.read().expect("resolver lock").clone();
        settings
            .services
            .iter()
            .map(|spec| resolver.summarize(spec))
            .collect()
    }

    pub fn toggles(&self) -> &ApiToggles {
        &self.toggles
    }

    pub fn store(&self) -> &Arc<dyn MailboxStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &CallbackDispatcher {
        &self.dispatcher
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.read().expect("settings lock").clone()
    }

    /// Whether the routing table currently knows this service.
    pub fn has_service(&self, service: &str) -> bool {
        self.router
            .read()
            .expect("router lock")
            .has_service(service)
    }
}
