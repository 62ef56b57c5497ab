//! Comprehensive configuration validation with detailed reporting.
//!
//! The structural checks in `Settings::validate` are the hard gate; this
//! pass layers warnings and recommendations on top so operators see
//! questionable-but-legal configuration at startup instead of in an
//! incident.
//!
//! # Severity Levels
//!
//! - **Errors** - the configuration is unusable; the server refuses to
//!   start and a dynamic reload keeps the previous config
//! - **Warnings** - legal but likely wrong (a clamped timeout, a very short
//!   TTL); logged at `warn` level
//! - **Recommendations** - improvements worth considering; logged at `info`
//!
//! # Examples
//!
//! ```rust
//! use revolver::config::settings::parse_settings;
//! use revolver::config::validation::ConfigValidator;
//!
//! let settings = parse_settings("revolver:\n  services: []\n").unwrap();
//! let result = ConfigValidator::validate_comprehensive(&settings);
//!
//! // Zero services is a hard error.
//! assert!(!result.is_valid());
//! assert!(!result.errors.is_empty());
//! ```

use crate::models::settings::{Settings, MAX_CALLBACK_TIMEOUT_MS};
use log::{info, warn};

/// Result of configuration validation, split by severity.
///
/// # Examples
///
/// ```rust
/// use revolver::config::validation::ValidationResult;
///
/// let mut result = ValidationResult::default();
/// result.add_error("missing required field".to_string());
/// result.add_warning("using default value".to_string());
/// result.add_recommendation("consider enabling https".to_string());
///
/// assert!(!result.is_valid());
/// assert_eq!(result.errors.len(), 1);
/// assert_eq!(result.warnings.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Critical errors that prevent startup.
    pub errors: Vec<String>,
    /// Legal but questionable settings.
    pub warnings: Vec<String>,
    /// Suggestions for improvement.
    pub recommendations: Vec<String>,
}

impl ValidationResult {
    /// Whether the configuration may be used (no errors recorded).
    ///
    /// Warnings and recommendations never make a configuration invalid.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use revolver::config::validation::ValidationResult;
    ///
    /// let mut result = ValidationResult::default();
    /// assert!(result.is_valid());
    ///
    /// result.add_warning("short ttl".to_string());
    /// assert!(result.is_valid()); // still valid despite the warning
    ///
    /// result.add_error("no services".to_string());
    /// assert!(!result.is_valid());
    /// ```
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Records a critical error, marking the configuration invalid.
    pub fn add_error(&mut self, message: String) {
        self.errors.push(message);
    }

    /// Records a non-critical issue that should be addressed.
    pub fn add_warning(&mut self, message: String) {
        self.warnings.push(message);
    }

    /// Records a suggestion for improving the configuration.
    pub fn add_recommendation(&mut self, message: String) {
        self.recommendations.push(message);
    }
}

/// Runs every validation pass over the settings.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the settings and collects every finding.
    ///
    /// This wraps the structural `Settings::validate` pass and then layers
    /// the softer checks on top:
    ///
    /// - `callbackTimeout` above the 30s ceiling (clamped, warning)
    /// - very short mailbox TTLs (warning)
    /// - per-API merged timeouts below 50ms (warning)
    /// - circuit thresholds above 100% (error)
    /// - fallback enabled without a fallback body (recommendation)
    /// - `https` services without a client keystore (recommendation)
    /// - aggressive dynamic-config poll intervals (warning)
    ///
    /// # Parameters
    ///
    /// * `settings` - The parsed configuration to inspect
    ///
    /// # Returns
    ///
    /// A [`ValidationResult`]; callers gate startup on
    /// [`ValidationResult::is_valid`] and log the rest via
    /// [`ConfigValidator::report`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use revolver::config::settings::parse_settings;
    /// use revolver::config::validation::ConfigValidator;
    ///
    /// let settings = parse_settings(r#"
    /// revolver:
    ///   serviceResolverConfig:
    ///     endpoints:
    ///       s: [{ host: localhost, port: 9000 }]
    ///   services:
    ///     - name: s
    ///       type: http
    ///       apis:
    ///         - { name: a, path: /x, methods: [GET] }
    ///   callbackTimeout: 45000
    /// "#).unwrap();
    ///
    /// let result = ConfigValidator::validate_comprehensive(&settings);
    /// assert!(result.is_valid());
    /// assert!(result.warnings.iter().any(|w| w.contains("clamped")));
    /// ```
    pub fn validate_comprehensive(settings: &Settings) -> ValidationResult {
        let mut result = ValidationResult::default();

        if let Err(e) = settings.validate() {
            result.add_error(e);
        }

        if settings.callback_timeout > MAX_CALLBACK_TIMEOUT_MS {
            result.add_warning(format!(
                "callbackTimeout {}ms exceeds the {}ms ceiling and will be clamped",
                settings.callback_timeout, MAX_CALLBACK_TIMEOUT_MS
            ));
        }

        if settings.mail_box.ttl_seconds < 60 {
            result.add_warning(format!(
                "mailBox ttlSeconds {} is very short; polled responses may expire before retrieval",
                settings.mail_box.ttl_seconds
            ));
        }

        for service in &settings.services {
            for api in &service.apis {
                let runtime = settings.global.merged(api.runtime.as_ref());
                if runtime.timeout_ms < 50 {
                    result.add_warning(format!(
                        "{}.{} timeoutMs {} is below 50ms; expect spurious timeouts",
                        service.name, api.name, runtime.timeout_ms
                    ));
                }
                if runtime.circuit.error_threshold_percent > 100 {
                    result.add_error(format!(
                        "{}.{} errorThresholdPercent {} exceeds 100",
                        service.name, api.name, runtime.circuit.error_threshold_percent
                    ));
                }
                if runtime.fallback_enabled && api.fallback.is_none() {
                    result.add_recommendation(format!(
                        "{}.{} enables fallback without a fallback body; an empty JSON object will be served",
                        service.name, api.name
                    ));
                }
            }
            if service.service_type.is_secure() && service.keystore_path.is_none() {
                result.add_recommendation(format!(
                    "service {} is https without a client keystore; server-auth TLS only",
                    service.name
                ));
            }
        }

        if settings.dynamic_config && settings.config_poll_interval_seconds < 10 {
            result.add_warning(format!(
                "configPollIntervalSeconds {} is aggressive for a remote config source",
                settings.config_poll_interval_seconds
            ));
        }

        result
    }

    /// Logs warnings and recommendations the way the server binary expects
    /// them. Errors are the caller's to surface (the binary exits, the
    /// dynamic poller rejects the document).
    pub fn report(result: &ValidationResult) {
        for warning in &result.warnings {
            warn!("config warning: {}", warning);
        }
        for recommendation in &result.recommendations {
            info!("config recommendation: {}", recommendation);
        }
    }
}
