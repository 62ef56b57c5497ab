//! Compiled per-service routing tables.
//!
//! Path templates are literal URL paths in which `{name}` segments match one
//! path segment (`[^/]+`). Compilation turns each template into an anchored
//! regex; matching walks the per-service route list in specificity order and
//! returns the first hit.
//!
//! # Ordering and Tie-Breaking
//!
//! For each service, routes are ordered by decreasing specificity: fewer
//! parameter segments first (so a literal template always beats a
//! parametric one), with ties broken by lexicographic order of the compiled
//! expression. Declaration order never influences matching, which keeps
//! `match_path` deterministic across reloads.
//!
//! # Thread Safety
//!
//! A compiled [`ServiceRouter`] is immutable. The gateway publishes it
//! behind an atomic `Arc` swap, so concurrent matchers always see either the
//! old or the new table in full, never a mix.
//!
//! # Examples
//!
//! ```rust
//! use revolver::models::service::{ApiMode, ApiSpec, ServiceSpec, ServiceType};
//! use revolver::utils::route_matcher::ServiceRouter;
//!
//! let order = ApiSpec {
//!     name: "order".to_string(),
//!     path: "/orders/{id}".to_string(),
//!     methods: vec!["GET".to_string()],
//!     mode: ApiMode::default(),
//!     runtime: None,
//!     retry: None,
//!     auth_required: false,
//!     request_headers: vec![],
//!     response_headers: vec![],
//!     fallback: None,
//! };
//! let latest = ApiSpec {
//!     name: "latest".to_string(),
//!     path: "/orders/latest".to_string(),
//!     ..order.clone()
//! };
//! let services = vec![ServiceSpec {
//!     name: "payments".to_string(),
//!     service_type: ServiceType::Http,
//!     connection_pool_size: None,
//!     keep_alive_seconds: None,
//!     compression: None,
//!     auth: None,
//!     tracking_headers: false,
//!     keystore_path: None,
//!     keystore_password: None,
//!     apis: vec![order, latest],
//! }];
//!
//! let router = ServiceRouter::compile(&services)?;
//!
//! // The literal template wins over the parametric one.
//! assert_eq!(router.match_path("payments", "/orders/latest").unwrap().api.name, "latest");
//! assert_eq!(router.match_path("payments", "/orders/42").unwrap().api.name, "order");
//! # Ok::<(), revolver::utils::route_matcher::RouteError>(())
//! ```

use crate::models::service::{ApiSpec, ServiceSpec};
use ahash::HashMap as AHashMap;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while compiling route tables.
///
/// These surface at startup or on dynamic reload, never on the hot path;
/// a table that compiled is immutable and infallible to match against.
#[derive(Error, Debug, PartialEq)]
pub enum RouteError {
    /// The path template has malformed parameter syntax.
    ///
    /// Raised for an unclosed brace (`/orders/{id`), an empty parameter
    /// (`/orders/{}`) or a parameter name containing anything other than
    /// alphanumerics and underscores.
    #[error("invalid route pattern: {pattern}")]
    InvalidPattern { pattern: String },

    /// The generated expression failed to compile; indicates a bug in
    /// pattern conversion rather than bad user input.
    #[error("regex compilation failed: {0}")]
    Regex(String),
}

/// A single compiled route: anchored regex, capture names and the API it
/// belongs to.
///
/// # Examples
///
/// ```text
/// Template:  "/orders/{order_id}/items/{item_id}"
/// Pattern:   "^/orders/([^/]+)/items/([^/]+)$"
/// Params:    ["order_id", "item_id"]
/// ```
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    pub service: String,
    pub api: Arc<ApiSpec>,
    pub regex: Regex,
    pub param_names: Vec<String>,
    /// The compiled expression, kept for listing and for the lexicographic
    /// tie-break between routes of equal specificity.
    pub pattern: String,
}

/// Result of a successful match: the API descriptor plus extracted path
/// parameters in declaration order.
///
/// The `ApiSpec` is shared via `Arc`, so a match is cheap to hand across
/// tasks and survives a router swap that happens while the request is still
/// in flight.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub api: Arc<ApiSpec>,
    pub params: Vec<(String, String)>,
}

/// Immutable routing table covering every configured service.
///
/// # Performance Characteristics
///
/// - Compilation: once per config (re)load, never per request
/// - Matching: O(routes per service), each step one pre-compiled regex test
/// - Sharing: the table is swapped as a whole `Arc`; readers never lock
#[derive(Debug, Default)]
pub struct ServiceRouter {
    services: AHashMap<String, Vec<CompiledRoute>>,
}

impl ServiceRouter {
    /// Compiles the routing table for a set of services.
    ///
    /// Per service, routes are ordered by decreasing specificity: fewer
    /// parameter segments first (a literal always beats a parametric
    /// template), ties broken by lexicographic order of the compiled
    /// expression. The ordering makes matching deterministic regardless of
    /// declaration order.
    ///
    /// # Parameters
    ///
    /// * `services` - The service specs whose APIs become routes
    ///
    /// # Returns
    ///
    /// - `Ok(ServiceRouter)` - every template compiled
    /// - `Err(RouteError)` - the first malformed template encountered
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidPattern`] for templates with unclosed
    /// braces, empty parameters or invalid parameter characters. The
    /// gateway treats this as a config validation failure: on dynamic
    /// reload the previous table stays published.
    pub fn compile(services: &[ServiceSpec]) -> Result<ServiceRouter, RouteError> {
        let mut table: AHashMap<String, Vec<CompiledRoute>> = AHashMap::default();
        for service in services {
            let mut routes = Vec::with_capacity(service.apis.len());
            for api in &service.apis {
                routes.push(Self::compile_route(&service.name, api)?);
            }
            routes.sort_by(|a, b| {
                a.param_names
                    .len()
                    .cmp(&b.param_names.len())
                    .then_with(|| a.pattern.cmp(&b.pattern))
            });
            table.insert(service.name.clone(), routes);
        }
        Ok(ServiceRouter { services: table })
    }

    /// Matches an incoming `(service, path)` pair.
    ///
    /// Walks the per-service list in specificity order and returns the
    /// first route whose regex matches, together with the captured path
    /// parameters. Unknown service or no matching route returns `None`.
    ///
    /// # Parameters
    ///
    /// * `service` - The logical service name from the ingress URL
    /// * `path` - The request path below the service prefix, with leading `/`
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use revolver::models::service::{ApiMode, ApiSpec, ServiceSpec, ServiceType};
    /// # use revolver::utils::route_matcher::ServiceRouter;
    /// # let api = ApiSpec {
    /// #     name: "item".to_string(),
    /// #     path: "/orders/{order_id}/items/{item_id}".to_string(),
    /// #     methods: vec!["GET".to_string()],
    /// #     mode: ApiMode::default(),
    /// #     runtime: None,
    /// #     retry: None,
    /// #     auth_required: false,
    /// #     request_headers: vec![],
    /// #     response_headers: vec![],
    /// #     fallback: None,
    /// # };
    /// # let services = vec![ServiceSpec {
    /// #     name: "shop".to_string(),
    /// #     service_type: ServiceType::Http,
    /// #     connection_pool_size: None,
    /// #     keep_alive_seconds: None,
    /// #     compression: None,
    /// #     auth: None,
    /// #     tracking_headers: false,
    /// #     keystore_path: None,
    /// #     keystore_password: None,
    /// #     apis: vec![api],
    /// # }];
    /// # let router = ServiceRouter::compile(&services)?;
    /// let matched = router.match_path("shop", "/orders/o-1/items/i-9").unwrap();
    /// assert_eq!(matched.api.name, "item");
    /// assert_eq!(matched.params, vec![
    ///     ("order_id".to_string(), "o-1".to_string()),
    ///     ("item_id".to_string(), "i-9".to_string()),
    /// ]);
    ///
    /// assert!(router.match_path("shop", "/refunds/1").is_none());
    /// assert!(router.match_path("warehouse", "/orders/1/items/2").is_none());
    /// # Ok::<(), revolver::utils::route_matcher::RouteError>(())
    /// ```
    ///
    /// # Thread Safety
    ///
    /// Safe to call concurrently; the table is immutable after
    /// construction.
    pub fn match_path(&self, service: &str, path: &str) -> Option<RouteMatch> {
        let routes = self.services.get(service)?;
        for route in routes {
            if let Some(captures) = route.regex.captures(path) {
                let params = route
                    .param_names
                    .iter()
                    .enumerate()
                    .filter_map(|(i, name)| {
                        captures
                            .get(i + 1)
                            .map(|c| (name.clone(), c.as_str().to_string()))
                    })
                    .collect();
                return Some(RouteMatch {
                    api: Arc::clone(&route.api),
                    params,
                });
            }
        }
        None
    }

    /// Iterates `(service, api, compiled_pattern)` over the whole table.
    ///
    /// Used by diagnostics and tests to enumerate what the router actually
    /// published; the order within a service is the matching order.
    pub fn routes(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.services.iter().flat_map(|(service, routes)| {
            routes
                .iter()
                .map(move |r| (service.as_str(), r.api.name.as_str(), r.pattern.as_str()))
        })
    }

    /// Whether the table knows this service at all.
    pub fn has_service(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    fn compile_route(service: &str, api: &ApiSpec) -> Result<CompiledRoute, RouteError> {
        let pattern = Self::template_to_regex(&api.path)?;
        let regex = Regex::new(&pattern).map_err(|e| RouteError::Regex(e.to_string()))?;
        Ok(CompiledRoute {
            service: service.to_string(),
            api: Arc::new(api.clone()),
            regex,
            param_names: api.param_names(),
            pattern,
        })
    }

    /// Converts a path template to an anchored regex, escaping literal regex
    /// metacharacters and turning each `{name}` into a `([^/]+)` capture.
    fn template_to_regex(template: &str) -> Result<String, RouteError> {
        let mut pattern = String::with_capacity(template.len() * 2);
        pattern.push('^');

        let mut chars = template.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        if inner.is_alphanumeric() || inner == '_' {
                            name.push(inner);
                        } else {
                            return Err(RouteError::InvalidPattern {
                                pattern: template.to_string(),
                            });
                        }
                    }
                    if !closed || name.is_empty() {
                        return Err(RouteError::InvalidPattern {
                            pattern: template.to_string(),
                        });
                    }
                    pattern.push_str("([^/]+)");
                }
                '.' | '?' | '*' | '+' | '^' | '$' | '[' | ']' | '(' | ')' | '|' | '\\' => {
                    pattern.push('\\');
                    pattern.push(ch);
                }
                _ => pattern.push(ch),
            }
        }

        pattern.push('$');
        Ok(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_conversion_escapes_literals() {
        assert_eq!(
            ServiceRouter::template_to_regex("/v1.0/orders/{id}").unwrap(),
            r"^/v1\.0/orders/([^/]+)$"
        );
    }

    #[test]
    fn unclosed_brace_is_invalid() {
        assert!(matches!(
            ServiceRouter::template_to_regex("/orders/{id"),
            Err(RouteError::InvalidPattern { .. })
        ));
        assert!(matches!(
            ServiceRouter::template_to_regex("/orders/{}"),
            Err(RouteError::InvalidPattern { .. })
        ));
    }
}
