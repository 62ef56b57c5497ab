//! Pooled HTTP clients, one per upstream service.
//!
//! Each client is built from the service's connection settings (pool size,
//! keep-alive, compression) with the workspace-wide defaults from
//! `clientConfig` filling the gaps, plus an optional PKCS#12 client identity
//! for `https` services. Clients are cheap to clone and reused across
//! requests; a config swap builds a fresh factory and the replaced clients
//! drain as their last in-flight references drop.

use crate::models::settings::Settings;
use ahash::HashMap as AHashMap;
use log::debug;
use reqwest::Client;
use std::time::Duration;

/// Per-service client registry.
#[derive(Debug, Default, Clone)]
pub struct ClientFactory {
    clients: AHashMap<String, Client>,
}

impl ClientFactory {
    /// Builds one pooled client per configured service.
    ///
    /// Fails when the TLS material cannot be read or parsed, or when a
    /// client cannot be constructed; config swaps treat this as a validation
    /// failure and keep the previous factory.
    pub fn build(settings: &Settings) -> Result<ClientFactory, String> {
        let mut clients = AHashMap::default();
        for service in &settings.services {
            let pool_size = service
                .connection_pool_size
                .unwrap_or(settings.client_config.pool_size);
            let keep_alive = service
                .keep_alive_seconds
                .unwrap_or(settings.client_config.keep_alive_seconds);
            let compression = service
                .compression
                .unwrap_or(settings.client_config.compression);
            let mut builder = Client::builder()
                .pool_max_idle_per_host(pool_size)
                .pool_idle_timeout(Duration::from_secs(keep_alive))
                .gzip(compression);

            if let Some(path) = &service.keystore_path {
                let bytes = std::fs::read(path)
                    .map_err(|e| format!("service {}: cannot read keystore: {}", service.name, e))?;
                let password = service.keystore_password.as_deref().unwrap_or("");
                let identity = reqwest::Identity::from_pkcs12_der(&bytes, password)
                    .map_err(|e| format!("service {}: invalid keystore: {}", service.name, e))?;
                builder = builder.identity(identity);
            }

            let client = builder
                .build()
                .map_err(|e| format!("service {}: client build failed: {}", service.name, e))?;
            debug!(
                "built client for {} (pool={}, keep_alive={}s)",
                service.name, pool_size, keep_alive
            );
            clients.insert(service.name.clone(), client);
        }
        Ok(ClientFactory { clients })
    }

    pub fn client(&self, service: &str) -> Option<&Client> {
        self.clients.get(service)
    }
}
