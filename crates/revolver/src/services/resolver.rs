//! Endpoint resolution for upstream services.
//!
//! Two variants share one non-blocking contract, `resolve(service) ->
//! Option<Endpoint>`:
//!
//! - [`StaticResolver`] walks a configured endpoint list round-robin.
//! - [`ClusterResolver`] reads a live member set published by an external
//!   discovery driver through a `tokio::sync::watch` channel and picks
//!   uniformly at random among healthy members.
//!
//! Neither variant performs I/O on the hot path; cluster membership is
//! refreshed out-of-band by whatever drives the watch sender.

use crate::models::service::ServiceSpec;
use crate::models::settings::Settings;
use ahash::HashMap as AHashMap;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;

/// A concrete upstream address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

/// Health of a discovered cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// One member of a watched cluster.
#[derive(Debug, Clone)]
pub struct ClusterMember {
    pub endpoint: Endpoint,
    pub status: HealthStatus,
}

/// Receivers published by an external discovery driver, one per service.
pub type ClusterWatch = AHashMap<String, watch::Receiver<Vec<ClusterMember>>>;

/// Summary row for the metadata status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatusSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub instances: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub unknown: usize,
}

#[derive(Debug)]
struct StaticEntry {
    endpoints: Vec<Endpoint>,
    cursor: AtomicUsize,
}

/// Round-robin resolver over statically configured endpoints.
#[derive(Debug, Default)]
pub struct StaticResolver {
    services: AHashMap<String, StaticEntry>,
}

impl StaticResolver {
    fn resolve(&self, service: &str) -> Option<Endpoint> {
        let entry = self.services.get(service)?;
        if entry.endpoints.is_empty() {
            return None;
        }
        let index = entry.cursor.fetch_add(1, Ordering::Relaxed) % entry.endpoints.len();
        Some(entry.endpoints[index].clone())
    }
}

/// Resolver over live cluster membership.
pub struct ClusterResolver {
    services: ClusterWatch,
}

impl ClusterResolver {
    fn resolve(&self, service: &str) -> Option<Endpoint> {
        let rx = self.services.get(service)?;
        let members = rx.borrow();
        let healthy: Vec<&ClusterMember> = members
            .iter()
            .filter(|m| m.status == HealthStatus::Healthy)
            .collect();
        healthy
            .choose(&mut rand::thread_rng())
            .map(|m| m.endpoint.clone())
    }

    fn counts(&self, service: &str) -> Option<(usize, usize, usize, usize)> {
        let rx = self.services.get(service)?;
        let members = rx.borrow();
        let mut healthy = 0;
        let mut unhealthy = 0;
        let mut unknown = 0;
        for m in members.iter() {
            match m.status {
                HealthStatus::Healthy => healthy += 1,
                HealthStatus::Unhealthy => unhealthy += 1,
                HealthStatus::Unknown => unknown += 1,
            }
        }
        Some((members.len(), healthy, unhealthy, unknown))
    }
}

/// Endpoint resolver for every configured service.
pub enum ServiceResolver {
    Static(StaticResolver),
    Cluster(ClusterResolver),
}

impl ServiceResolver {
    /// Builds the resolver selected by `serviceResolverConfig`.
    ///
    /// Static mode materializes endpoint lists from the settings; curator
    /// mode requires the caller to inject the watch receivers produced by the
    /// external discovery driver.
    pub fn from_settings(
        settings: &Settings,
        cluster_watch: Option<ClusterWatch>,
    ) -> Result<ServiceResolver, String> {
        if settings.service_resolver_config.use_curator {
            let watch = cluster_watch
                .ok_or_else(|| "useCurator requires an injected discovery driver".to_string())?;
            return Ok(ServiceResolver::Cluster(ClusterResolver { services: watch }));
        }

        let mut services = AHashMap::default();
        for spec in &settings.services {
            let endpoints = settings
                .service_resolver_config
                .endpoints
                .get(&spec.name)
                .map(|list| {
                    list.iter()
                        .map(|e| Endpoint {
                            host: e.host.clone(),
                            port: e.port,
                            secure: spec.service_type.is_secure(),
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            services.insert(
                spec.name.clone(),
                StaticEntry {
                    endpoints,
                    cursor: AtomicUsize::new(0),
                },
            );
        }
        Ok(ServiceResolver::Static(StaticResolver { services }))
    }

    /// Picks an endpoint for the service, or `None` when nothing is
    /// resolvable. Never blocks.
    pub fn resolve(&self, service: &str) -> Option<Endpoint> {
        match self {
            ServiceResolver::Static(inner) => inner.resolve(service),
            ServiceResolver::Cluster(inner) => inner.resolve(service),
        }
    }

    /// Status summary row for one service, for `/v1/metadata/status`.
    pub fn summarize(&self, spec: &ServiceSpec) -> ServiceStatusSummary {
        let (instances, healthy, unhealthy, unknown) = match self {
            ServiceResolver::Static(inner) => {
                let count = inner
                    .services
                    .get(&spec.name)
                    .map(|e| e.endpoints.len())
                    .unwrap_or(0);
                // Static endpoints carry no health signal.
                (count, 0, 0, count)
            }
            ServiceResolver::Cluster(inner) => {
                inner.counts(&spec.name).unwrap_or((0, 0, 0, 0))
            }
        };
        ServiceStatusSummary {
            name: spec.name.clone(),
            service_type: spec.service_type.scheme().to_string(),
            instances,
            healthy,
            unhealthy,
            unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(host: &str) -> Endpoint {
        Endpoint {
            host: host.to_string(),
            port: 8080,
            secure: false,
        }
    }

    #[test]
    fn static_resolution_is_round_robin() {
        let mut services = AHashMap::default();
        services.insert(
            "payments".to_string(),
            StaticEntry {
                endpoints: vec![endpoint("a"), endpoint("b")],
                cursor: AtomicUsize::new(0),
            },
        );
        let resolver = ServiceResolver::Static(StaticResolver { services });

        assert_eq!(resolver.resolve("payments").unwrap().host, "a");
        assert_eq!(resolver.resolve("payments").unwrap().host, "b");
        assert_eq!(resolver.resolve("payments").unwrap().host, "a");
        assert!(resolver.resolve("missing").is_none());
    }

    #[test]
    fn cluster_resolution_skips_unhealthy() {
        let (tx, rx) = watch::channel(vec![
            ClusterMember {
                endpoint: endpoint("sick"),
                status: HealthStatus::Unhealthy,
            },
            ClusterMember {
                endpoint: endpoint("ok"),
                status: HealthStatus::Healthy,
            },
        ]);
        let mut services = AHashMap::default();
        services.insert("payments".to_string(), rx);
        let resolver = ServiceResolver::Cluster(ClusterResolver { services });

        for _ in 0..16 {
            assert_eq!(resolver.resolve("payments").unwrap().host, "ok");
        }

        tx.send(vec![]).unwrap();
        assert!(resolver.resolve("payments").is_none());
    }
}
