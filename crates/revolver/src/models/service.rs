//! Service and API descriptors.
//!
//! A [`ServiceSpec`] describes one logical upstream: how to reach it, how to
//! talk to it (pooling, keep-alive, compression, auth) and the ordered set of
//! [`ApiSpec`]s it exposes. Specs are deserialized from the YAML config and
//! validated before the router or any client is built from them.

use serde::{Deserialize, Serialize};

/// Transport scheme of an upstream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Http,
    Https,
}

impl ServiceType {
    pub fn scheme(self) -> &'static str {
        match self {
            ServiceType::Http => "http",
            ServiceType::Https => "https",
        }
    }

    pub fn is_secure(self) -> bool {
        matches!(self, ServiceType::Https)
    }
}

/// Upstream auth decoration, discriminated by `type`.
///
/// - `basic` - `Authorization: Basic <base64(user:pass)>`
/// - `token` - `Authorization: Bearer <token>`
///
/// # Examples
///
/// ```yaml
/// auth:
///   type: basic
///   username: gateway
///   password: secret
/// ```
///
/// ```yaml
/// auth:
///   type: token
///   token: abc123
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    Basic { username: String, password: String },
    Token { token: String },
}

/// Circuit breaker thresholds for one compartment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitConfig {
    /// Percentage of non-success completions in the window that opens the
    /// circuit.
    #[serde(default = "default_error_threshold")]
    pub error_threshold_percent: u8,
    /// Sliding window size: the breaker evaluates the last this-many
    /// completions, and never trips before the window has filled once.
    #[serde(default = "default_request_volume")]
    pub request_volume: usize,
    /// How long an open circuit sheds load before admitting a trial call.
    #[serde(default = "default_sleep_window")]
    pub sleep_window_ms: u64,
}

fn default_error_threshold() -> u8 {
    50
}

fn default_request_volume() -> usize {
    20
}

fn default_sleep_window() -> u64 {
    5000
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            error_threshold_percent: default_error_threshold(),
            request_volume: default_request_volume(),
            sleep_window_ms: default_sleep_window(),
        }
    }
}

/// Effective runtime budget of a compartment: time, concurrency, breaker and
/// whether a fallback response may be synthesized on failure.
///
/// The `global` block of the configuration is one of these; each API may
/// carry a [`RuntimeOverride`] that selectively replaces fields. The merged
/// result is what the bulkhead is built from.
///
/// # Defaults
///
/// - `timeoutMs`: 10000
/// - `concurrency`: 32
/// - `circuit`: see [`CircuitConfig`]
/// - `fallbackEnabled`: false
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub circuit: CircuitConfig,
    #[serde(default)]
    pub fallback_enabled: bool,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_concurrency() -> usize {
    32
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            concurrency: default_concurrency(),
            circuit: CircuitConfig::default(),
            fallback_enabled: false,
        }
    }
}

impl RuntimeConfig {
    /// Merges a per-API override over the global runtime. Absent fields keep
    /// the global value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use revolver::models::service::{RuntimeConfig, RuntimeOverride};
    ///
    /// let global = RuntimeConfig::default();
    /// let over = RuntimeOverride {
    ///     timeout_ms: Some(500),
    ///     ..Default::default()
    /// };
    ///
    /// let merged = global.merged(Some(&over));
    /// assert_eq!(merged.timeout_ms, 500);
    /// assert_eq!(merged.concurrency, global.concurrency);
    ///
    /// // No override: the global runtime applies unchanged.
    /// assert_eq!(global.merged(None), global);
    /// ```
    pub fn merged(&self, over: Option<&RuntimeOverride>) -> RuntimeConfig {
        let Some(over) = over else {
            return self.clone();
        };
        RuntimeConfig {
            timeout_ms: over.timeout_ms.unwrap_or(self.timeout_ms),
            concurrency: over.concurrency.unwrap_or(self.concurrency),
            circuit: over.circuit.unwrap_or(self.circuit),
            fallback_enabled: over.fallback_enabled.unwrap_or(self.fallback_enabled),
        }
    }
}

/// Per-API runtime override; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeOverride {
    pub timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub circuit: Option<CircuitConfig>,
    pub fallback_enabled: Option<bool>,
}

/// Retry policy for transient upstream failures.
///
/// Applied only to idempotent methods (GET/HEAD/OPTIONS); the attempts and
/// backoff sleeps all run inside the compartment's time budget, so retries
/// never extend a request's deadline.
///
/// # Examples
///
/// ```yaml
/// retry:
///   maxAttempts: 3
///   initialBackoffMs: 100
///   maxBackoffMs: 5000
///   multiplier: 2.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    100
}

fn default_max_backoff() -> u64 {
    5000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay for the given zero-based attempt, capped at
    /// `max_backoff_ms`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use revolver::models::service::RetryPolicy;
    ///
    /// let retry = RetryPolicy::default();
    /// assert_eq!(retry.backoff_ms(0), 100);
    /// assert_eq!(retry.backoff_ms(1), 200);
    /// assert_eq!(retry.backoff_ms(2), 400);
    /// assert_eq!(retry.backoff_ms(10), 5000); // capped
    /// ```
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let backoff = (self.initial_backoff_ms as f64) * self.multiplier.powi(attempt as i32);
        backoff.min(self.max_backoff_ms as f64) as u64
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry maxAttempts must be at least 1".to_string());
        }
        if self.max_attempts > 10 {
            return Err("retry maxAttempts must not exceed 10".to_string());
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err("retry initialBackoffMs cannot exceed maxBackoffMs".to_string());
        }
        if self.multiplier < 1.0 {
            return Err("retry multiplier must be >= 1.0".to_string());
        }
        Ok(())
    }
}

/// Synthesized response returned in place of an error when the compartment's
/// fallback is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackSpec {
    #[serde(default = "default_fallback_status")]
    pub status: u16,
    #[serde(default = "default_fallback_body")]
    pub body: String,
    #[serde(default = "default_fallback_content_type")]
    pub content_type: String,
}

fn default_fallback_status() -> u16 {
    200
}

fn default_fallback_body() -> String {
    "{}".to_string()
}

fn default_fallback_content_type() -> String {
    "application/json".to_string()
}

impl Default for FallbackSpec {
    fn default() -> Self {
        Self {
            status: default_fallback_status(),
            body: default_fallback_body(),
            content_type: default_fallback_content_type(),
        }
    }
}

/// Default execution mode of an API when the caller sends no mode header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiMode {
    #[default]
    Sync,
    Polling,
}

/// A named route on a service.
///
/// The `path` is a literal URL path in which `{name}` segments match a single
/// path segment. Methods are the allowed subset for this API; requests with
/// other methods are rejected before any upstream work happens.
///
/// # Examples
///
/// Minimal API:
///
/// ```yaml
/// apis:
///   - name: latest
///     path: /orders/latest
///     methods: [GET]
/// ```
///
/// Fully specified API with runtime override, retries, header whitelists
/// and a fallback:
///
/// ```yaml
/// apis:
///   - name: order
///     path: /orders/{id}
///     methods: [GET, POST]
///     mode: polling
///     runtime:
///       timeoutMs: 500
///       concurrency: 8
///     retry:
///       maxAttempts: 3
///       initialBackoffMs: 100
///     authRequired: true
///     requestHeaders: [x-tenant]
///     responseHeaders: [x-upstream-tag]
///     fallback:
///       status: 200
///       body: '{}'
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSpec {
    pub name: String,
    pub path: String,
    pub methods: Vec<String>,
    #[serde(default)]
    pub mode: ApiMode,
    #[serde(default)]
    pub runtime: Option<RuntimeOverride>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub auth_required: bool,
    /// Request-header whitelist. Empty means "forward everything except
    /// hop-by-hop headers".
    #[serde(default)]
    pub request_headers: Vec<String>,
    /// Response-header whitelist, same empty semantics.
    #[serde(default)]
    pub response_headers: Vec<String>,
    #[serde(default)]
    pub fallback: Option<FallbackSpec>,
}

const VALID_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

impl ApiSpec {
    /// Parameter names in declaration order, extracted from `{name}` segments.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use revolver::models::service::ApiSpec;
    ///
    /// let api: ApiSpec = serde_yaml::from_str(r#"
    /// name: item
    /// path: /orders/{order_id}/items/{item_id}
    /// methods: [GET]
    /// "#).unwrap();
    ///
    /// assert_eq!(api.param_names(), vec!["order_id", "item_id"]);
    /// ```
    pub fn param_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut chars = self.path.chars();
        while let Some(ch) = chars.next() {
            if ch == '{' {
                let mut name = String::new();
                for inner in chars.by_ref() {
                    if inner == '}' {
                        break;
                    }
                    name.push(inner);
                }
                if !name.is_empty() {
                    names.push(name);
                }
            }
        }
        names
    }

    pub fn allows_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }

    /// Validates the API descriptor.
    ///
    /// # Errors
    ///
    /// Returns a descriptive message when:
    /// - the name is empty or the path does not start with `/`
    /// - no methods are listed, or a method is outside the supported set
    /// - the same `{name}` parameter appears twice in the template
    /// - the retry policy or runtime override carries impossible values
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("api name cannot be empty".to_string());
        }
        if !self.path.starts_with('/') {
            return Err(format!("api {} path must start with '/'", self.name));
        }
        if self.methods.is_empty() {
            return Err(format!("api {} must allow at least one method", self.name));
        }
        for method in &self.methods {
            if !VALID_METHODS.contains(&method.as_str()) {
                return Err(format!("api {} has invalid method: {}", self.name, method));
            }
        }
        let params = self.param_names();
        let mut seen = std::collections::HashSet::new();
        for param in &params {
            if !seen.insert(param.as_str()) {
                return Err(format!(
                    "api {} declares parameter {{{}}} more than once",
                    self.name, param
                ));
            }
        }
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        if let Some(over) = &self.runtime {
            if over.timeout_ms == Some(0) {
                return Err(format!("api {} timeoutMs must be positive", self.name));
            }
            if over.concurrency == Some(0) {
                return Err(format!("api {} concurrency must be positive", self.name));
            }
        }
        Ok(())
    }
}

/// One logical upstream service and its APIs.
///
/// Connection settings (`connectionPoolSize`, `keepAliveSeconds`,
/// `compression`) are optional; unset values fall back to the global
/// `clientConfig` block. A service must declare at least one API.
///
/// # Examples
///
/// ```yaml
/// services:
///   - name: payments
///     type: http
///     connectionPoolSize: 16
///     trackingHeaders: true
///     auth:
///       type: basic
///       username: gateway
///       password: secret
///     apis:
///       - name: order
///         path: /orders/{id}
///         methods: [GET, POST]
/// ```
///
/// An `https` service may additionally carry PKCS#12 client-TLS material:
///
/// ```yaml
///   - name: identity
///     type: https
///     keystorePath: /etc/revolver/identity.p12
///     keystorePassword: changeit
///     apis:
///       - name: whoami
///         path: /whoami
///         methods: [GET]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    /// Connection-pool size; falls back to `clientConfig.poolSize`.
    #[serde(default)]
    pub connection_pool_size: Option<usize>,
    /// Keep-alive duration; falls back to `clientConfig.keepAliveSeconds`.
    #[serde(default)]
    pub keep_alive_seconds: Option<u64>,
    /// Response compression; falls back to `clientConfig.compression`.
    #[serde(default)]
    pub compression: Option<bool>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    /// When set, the gateway stamps forwarding metadata (`X-Forwarded-For`,
    /// `X-Gateway-Timestamp`) onto upstream requests.
    #[serde(default)]
    pub tracking_headers: bool,
    /// PKCS#12 bundle for client TLS against `https` upstreams.
    #[serde(default)]
    pub keystore_path: Option<String>,
    #[serde(default)]
    pub keystore_password: Option<String>,
    pub apis: Vec<ApiSpec>,
}

impl ServiceSpec {
    /// Validates the service and every API it declares.
    ///
    /// # Errors
    ///
    /// Returns a descriptive message when:
    /// - the name is empty, or the service declares zero APIs
    /// - `connectionPoolSize` is zero
    /// - any API fails [`ApiSpec::validate`], or two APIs share a name
    /// - a keystore is configured on a non-`https` service
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("service name cannot be empty".to_string());
        }
        if self.apis.is_empty() {
            return Err(format!("service {} declares zero apis", self.name));
        }
        if self.connection_pool_size == Some(0) {
            return Err(format!(
                "service {} connectionPoolSize must be positive",
                self.name
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for api in &self.apis {
            api.validate()
                .map_err(|e| format!("service {}: {}", self.name, e))?;
            if !seen.insert(api.name.as_str()) {
                return Err(format!(
                    "service {} declares api {} more than once",
                    self.name, api.name
                ));
            }
        }
        if self.keystore_path.is_some() && !self.service_type.is_secure() {
            return Err(format!(
                "service {} configures a keystore but is not https",
                self.name
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(path: &str) -> ApiSpec {
        ApiSpec {
            name: "test".to_string(),
            path: path.to_string(),
            methods: vec!["GET".to_string()],
            mode: ApiMode::default(),
            runtime: None,
            retry: None,
            auth_required: false,
            request_headers: vec![],
            response_headers: vec![],
            fallback: None,
        }
    }

    #[test]
    fn duplicate_params_rejected() {
        let spec = api("/orders/{id}/items/{id}");
        assert!(spec.validate().is_err());
    }

    #[test]
    fn param_names_in_order() {
        let spec = api("/orders/{order_id}/items/{item_id}");
        assert_eq!(spec.param_names(), vec!["order_id", "item_id"]);
    }

    #[test]
    fn runtime_override_merging() {
        let global = RuntimeConfig::default();
        let over = RuntimeOverride {
            timeout_ms: Some(500),
            ..Default::default()
        };
        let merged = global.merged(Some(&over));
        assert_eq!(merged.timeout_ms, 500);
        assert_eq!(merged.concurrency, global.concurrency);
    }

    #[test]
    fn backoff_is_capped() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.backoff_ms(0), 100);
        assert_eq!(retry.backoff_ms(1), 200);
        assert_eq!(retry.backoff_ms(10), 5000);
    }
}
