//! Top-level application configuration.
//!
//! The config file is YAML with a single `revolver` root key. Everything
//! under it deserializes into [`Settings`]; see `config::settings` for
//! loading and `config::validation` for the comprehensive startup checks.
//!
//! ```yaml
//! revolver:
//!   clientConfig: { poolSize: 32, keepAliveSeconds: 30, compression: true }
//!   global: { timeoutMs: 10000, concurrency: 32 }
//!   serviceResolverConfig:
//!     useCurator: false
//!     endpoints:
//!       payments:
//!         - { host: payments-1.internal, port: 8080 }
//!   services:
//!     - name: payments
//!       type: http
//!       apis:
//!         - name: order
//!           path: /orders/{id}
//!           methods: [GET, POST]
//!   mailBox: { type: in_memory, ttlSeconds: 900 }
//!   callbackTimeout: 3000
//! ```

use crate::models::service::{RuntimeConfig, ServiceSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hard ceiling for callback delivery timeouts; larger configured values are
/// clamped, not rejected.
pub const MAX_CALLBACK_TIMEOUT_MS: u64 = 30_000;

/// Wrapper matching the file's `revolver:` root key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootConfig {
    pub revolver: Settings,
}

/// Defaults applied to every upstream client unless the service overrides
/// them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSettings {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_seconds: u64,
    #[serde(default = "default_compression")]
    pub compression: bool,
}

fn default_pool_size() -> usize {
    32
}

fn default_keep_alive() -> u64 {
    30
}

fn default_compression() -> bool {
    true
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            keep_alive_seconds: default_keep_alive(),
            compression: default_compression(),
        }
    }
}

/// A statically configured upstream address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSettings {
    pub host: String,
    pub port: u16,
}

/// Endpoint resolution settings.
///
/// With `useCurator: false` the `endpoints` map drives a static round-robin
/// resolver. With `useCurator: true` an external cluster-discovery driver
/// must be injected into the gateway builder; `zkConnectString` is handed to
/// that driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverSettings {
    #[serde(default)]
    pub use_curator: bool,
    #[serde(default)]
    pub endpoints: BTreeMap<String, Vec<EndpointSettings>>,
    #[serde(default)]
    pub zk_connect_string: Option<String>,
}

/// Mailbox store selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailboxKind {
    #[default]
    InMemory,
    External,
}

/// Request persistence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxSettings {
    #[serde(rename = "type", default)]
    pub kind: MailboxKind,
    /// Retention for stored records, seconds.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    /// When set, synchronous requests are persisted too.
    #[serde(default)]
    pub persist_sync: bool,
}

fn default_ttl_seconds() -> u64 {
    900
}

impl Default for MailboxSettings {
    fn default() -> Self {
        Self {
            kind: MailboxKind::default(),
            ttl_seconds: default_ttl_seconds(),
            persist_sync: false,
        }
    }
}

/// Complete gateway configuration (the content of the `revolver:` key).
///
/// # Defaults
///
/// Every section except `services` is optional:
///
/// - `clientConfig`: pool 32, keep-alive 30s, compression on
/// - `global`: timeout 10000ms, concurrency 32, breaker 50%/20/5000ms
/// - `mailBox`: in-memory, TTL 900s, sync requests not persisted
/// - `callbackTimeout`: 3000ms (hard ceiling 30000ms)
/// - `maxCallbackAttempts`: 5, `callbackQueueSize`: 1024
/// - `configPollIntervalSeconds`: 600, `dynamicConfig`: off
/// - `shutdownGraceSeconds`: 30
///
/// # Examples
///
/// ```rust
/// use revolver::config::settings::parse_settings;
///
/// let settings = parse_settings(r#"
/// revolver:
///   serviceResolverConfig:
///     endpoints:
///       payments: [{ host: 127.0.0.1, port: 8080 }]
///   services:
///     - name: payments
///       type: http
///       apis:
///         - { name: order, path: "/orders/{id}", methods: [GET] }
/// "#).unwrap();
///
/// assert_eq!(settings.global.timeout_ms, 10_000);
/// assert_eq!(settings.config_poll_interval_seconds, 600);
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub client_config: ClientSettings,
    #[serde(default)]
    pub global: RuntimeConfig,
    #[serde(default)]
    pub service_resolver_config: ResolverSettings,
    pub services: Vec<ServiceSpec>,
    #[serde(default)]
    pub mail_box: MailboxSettings,
    /// Callback delivery timeout, milliseconds. Clamped to
    /// [`MAX_CALLBACK_TIMEOUT_MS`].
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout: u64,
    #[serde(default = "default_max_callback_attempts")]
    pub max_callback_attempts: u32,
    #[serde(default = "default_callback_queue_size")]
    pub callback_queue_size: usize,
    #[serde(default)]
    pub dynamic_config: bool,
    #[serde(default = "default_poll_interval")]
    pub config_poll_interval_seconds: u64,
    #[serde(default)]
    pub dynamic_config_url: Option<String>,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

fn default_callback_timeout() -> u64 {
    3000
}

fn default_max_callback_attempts() -> u32 {
    5
}

fn default_callback_queue_size() -> usize {
    1024
}

fn default_poll_interval() -> u64 {
    600
}

fn default_shutdown_grace() -> u64 {
    30
}

impl Settings {
    /// Effective callback timeout after clamping.
    ///
    /// Configured values above [`MAX_CALLBACK_TIMEOUT_MS`] are clamped, not
    /// rejected; the comprehensive validator emits a warning for them.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use revolver::config::settings::parse_settings;
    ///
    /// let settings =
    ///     parse_settings("revolver:\n  services: []\n  callbackTimeout: 45000\n").unwrap();
    /// assert_eq!(settings.callback_timeout, 45_000);
    /// assert_eq!(settings.callback_timeout_ms(), 30_000);
    /// ```
    pub fn callback_timeout_ms(&self) -> u64 {
        self.callback_timeout.min(MAX_CALLBACK_TIMEOUT_MS)
    }

    /// First-pass structural validation. The comprehensive pass with
    /// warnings and recommendations lives in `config::validation`.
    ///
    /// # Errors
    ///
    /// Returns a descriptive message when:
    /// - no services are configured, or two share a name
    /// - any service fails `ServiceSpec::validate`
    /// - static resolution is selected and a service has no endpoints
    /// - `useCurator` is set without `zkConnectString`
    /// - `dynamicConfig` is set without `dynamicConfigUrl`, or with a zero
    ///   poll interval
    pub fn validate(&self) -> Result<(), String> {
        if self.services.is_empty() {
            return Err("at least one service must be configured".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for service in &self.services {
            service.validate()?;
            if !seen.insert(service.name.as_str()) {
                return Err(format!("service {} declared more than once", service.name));
            }
        }
        if !self.service_resolver_config.use_curator {
            for service in &self.services {
                let entry = self.service_resolver_config.endpoints.get(&service.name);
                if entry.map(|e| e.is_empty()).unwrap_or(true) {
                    return Err(format!(
                        "service {} has no endpoints in serviceResolverConfig",
                        service.name
                    ));
                }
            }
        } else if self.service_resolver_config.zk_connect_string.is_none() {
            return Err("useCurator requires zkConnectString".to_string());
        }
        if self.dynamic_config && self.dynamic_config_url.is_none() {
            return Err("dynamicConfig requires dynamicConfigUrl".to_string());
        }
        if self.dynamic_config && self.config_poll_interval_seconds == 0 {
            return Err("configPollIntervalSeconds must be positive".to_string());
        }
        Ok(())
    }
}
