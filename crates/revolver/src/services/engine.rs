//! The execution engine: everything between an accepted ingress request and
//! the upstream wire.
//!
//! `invoke` runs the pipeline: route lookup, admin toggle, mode selection,
//! idempotency check, persistence, endpoint resolution, bulkhead submission,
//! upstream call, response filtering, terminal-state persistence and callback
//! dispatch. Synchronous requests ride the pipeline inline; asynchronous
//! modes persist a `RECEIVED` record, spawn the remainder as a background
//! task and answer `202 Accepted` immediately.
//!
//! Retries live here rather than in the bulkhead: they apply only to
//! idempotent methods on transient failures, and the whole retry loop runs
//! under the compartment's single time budget, so retries are never additive
//! to the deadline.

use crate::gateway::ApiToggles;
use crate::models::error::GatewayError;
use crate::models::record::{RequestMode, RequestRecord, RequestState, StoredResponse};
use crate::models::service::{ApiMode, ApiSpec, AuthConfig, RetryPolicy, RuntimeConfig, ServiceSpec};
use crate::models::settings::Settings;
use crate::services::bulkhead::{BulkheadError, BulkheadRegistry};
use crate::services::client::ClientFactory;
use crate::services::dispatcher::CallbackDispatcher;
use crate::services::resolver::ServiceResolver;
use crate::storage::{MailboxStore, RecordPatch, StorageError};
use crate::utils::path::format_target;
use crate::utils::route_matcher::ServiceRouter;

use actix_web::http::header::HeaderMap as ActixHeaderMap;
use actix_web::http::Method as ActixMethod;
use actix_web::web::Bytes;
use base64::Engine as _;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap as ReqwestHeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method as ReqwestMethod};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

/// Headers never forwarded in either direction.
static HOP_HEADERS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "host",
        "connection",
        "keep-alive",
        "proxy-connection",
        "transfer-encoding",
        "te",
        "trailer",
        "upgrade",
        "content-length",
    ]
});

/// An ingress request as handed over by the HTTP layer.
#[derive(Debug, Clone)]
pub struct IngressRequest {
    pub service: String,
    /// Path below the service prefix, with leading `/`.
    pub path: String,
    pub method: ActixMethod,
    pub headers: ActixHeaderMap,
    pub body: Bytes,
    pub peer_addr: Option<String>,
}

/// What the HTTP layer turns into the wire response.
#[derive(Debug)]
pub enum EngineResponse {
    /// Synchronous result: the upstream response, headers already filtered.
    Inline {
        request_id: String,
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
    /// Asynchronous acceptance: `202` with the request id.
    Accepted { request_id: String },
}

#[derive(Debug)]
struct UpstreamCallError {
    message: String,
    status: Option<u16>,
}

/// Everything one upstream call needs, captured before the bulkhead so the
/// async continuation owns its data outright.
struct CallContext {
    service: String,
    api: Arc<ApiSpec>,
    runtime: RuntimeConfig,
    request_id: String,
    mode: RequestMode,
    persisted: bool,
    client: Client,
    method: ReqwestMethod,
    target: String,
    headers: ReqwestHeaderMap,
    body: Vec<u8>,
    started: Instant,
}

/// The engine itself. Cheap to clone; all fields are shared handles, and the
/// swap-able ones (`router`, `clients`, `resolver`, `settings`) are replaced
/// wholesale on config reload.
#[derive(Clone)]
pub struct ExecutionEngine {
    pub(crate) settings: Arc<RwLock<Arc<Settings>>>,
    pub(crate) router: Arc<RwLock<Arc<ServiceRouter>>>,
    pub(crate) clients: Arc<RwLock<Arc<ClientFactory>>>,
    pub(crate) resolver: Arc<RwLock<Arc<ServiceResolver>>>,
    pub(crate) bulkheads: Arc<BulkheadRegistry>,
    pub(crate) toggles: Arc<ApiToggles>,
    pub(crate) store: Arc<dyn MailboxStore>,
    pub(crate) dispatcher: CallbackDispatcher,
}

impl ExecutionEngine {
    /// Runs the invoke pipeline for one ingress request.
    pub async fn invoke(&self, ingress: IngressRequest) -> Result<EngineResponse, GatewayError> {
        let started = Instant::now();
        let settings: Arc<Settings> = self.settings.read().expect("settings lock").clone();
        let router: Arc<ServiceRouter> = self.router.read().expect("router lock").clone();

        let matched = router
            .match_path(&ingress.service, &ingress.path)
            .ok_or_else(|| GatewayError::RouteNotFound {
                service: ingress.service.clone(),
                path: ingress.path.clone(),
            })?;
        let api = matched.api;

        if !api.allows_method(ingress.method.as_str()) {
            return Err(GatewayError::BadRequest {
                message: format!(
                    "method {} not allowed for {}.{}",
                    ingress.method, ingress.service, api.name
                ),
            });
        }

        if !self.toggles.is_enabled(&ingress.service, &api.name) {
            return Err(GatewayError::ApiDisabled {
                service: ingress.service.clone(),
                api: api.name.clone(),
            });
        }

        let (mode, callback_uri) = select_mode(&ingress.headers, api.mode)?;

        if api.auth_required && !has_credentials(&ingress.headers) {
            return Err(GatewayError::Auth {
                message: "missing Authorization header".to_string(),
            });
        }

        let request_id = header_value(&ingress.headers, "x-request-id")?
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mailbox_id = header_value(&ingress.headers, "x-mailbox-id")?;

        // Replay-safe async retries: an id whose record already holds a
        // completed upstream response is acknowledged again without
        // touching the upstream. A failed, timed-out or callback-exhausted
        // record does not swallow the retry - the resubmission overwrites
        // it and drives a fresh upstream call.
        if mode.is_async() {
            let existing = self
                .store
                .get(&request_id)
                .await
                .map_err(storage_failure)?;
            if let Some(existing) = existing {
                if existing.state.has_upstream_response() {
                    debug!(
                        "request {} replayed in state {:?}, acknowledging",
                        request_id, existing.state
                    );
                    return Ok(EngineResponse::Accepted { request_id });
                }
                debug!(
                    "request {} resubmitted in state {:?}, re-executing",
                    request_id, existing.state
                );
            }
        }

        let service_spec = settings
            .services
            .iter()
            .find(|s| s.name == ingress.service)
            .cloned()
            .ok_or_else(|| GatewayError::Internal {
                message: format!("service {} matched a route but has no spec", ingress.service),
            })?;

        let persisted = mode.is_async() || settings.mail_box.persist_sync;
        if persisted {
            let record = RequestRecord::received(
                request_id.clone(),
                mailbox_id,
                ingress.service.clone(),
                api.name.clone(),
                mode,
                ingress.method.to_string(),
                ingress.path.clone(),
                collect_headers(&ingress.headers),
                ingress.body.to_vec(),
                callback_uri.clone(),
                chrono::Duration::seconds(settings.mail_box.ttl_seconds as i64),
            );
            self.store.save(record).await.map_err(storage_failure)?;
        }

        let resolver: Arc<ServiceResolver> = self.resolver.read().expect("resolver lock").clone();
        let endpoint = match resolver.resolve(&ingress.service) {
            Some(endpoint) => endpoint,
            None => {
                if persisted {
                    let _ = self
                        .store
                        .update_state(&request_id, RequestState::Failed, RecordPatch::none())
                        .await;
                }
                return Err(GatewayError::Upstream {
                    message: format!("no endpoint available for {}", ingress.service),
                    status: None,
                });
            }
        };

        let clients: Arc<ClientFactory> = self.clients.read().expect("clients lock").clone();
        let client = clients
            .client(&ingress.service)
            .cloned()
            .ok_or_else(|| GatewayError::Internal {
                message: format!("no client for service {}", ingress.service),
            })?;

        let ctx = CallContext {
            runtime: settings.global.merged(api.runtime.as_ref()),
            method: convert_method(&ingress.method),
            target: format_target(&endpoint, &ingress.path),
            headers: build_upstream_headers(
                &ingress.headers,
                &api,
                &service_spec,
                &request_id,
                ingress.peer_addr.as_deref(),
            ),
            body: ingress.body.to_vec(),
            service: ingress.service.clone(),
            api,
            request_id: request_id.clone(),
            mode,
            persisted,
            client,
            started,
        };

        match mode {
            RequestMode::Sync => {
                let runtime = ctx.runtime.clone();
                let fallback = ctx.api.fallback.clone();
                match self.execute_call(ctx).await {
                    Ok(stored) => Ok(EngineResponse::Inline {
                        request_id,
                        status: stored.status,
                        headers: stored.headers,
                        body: stored.body,
                    }),
                    Err(err) if runtime.fallback_enabled => {
                        let fallback = fallback.unwrap_or_default();
                        debug!("synthesizing fallback response: {}", err);
                        Ok(EngineResponse::Inline {
                            request_id,
                            status: fallback.status,
                            headers: vec![("content-type".to_string(), fallback.content_type)],
                            body: fallback.body.into_bytes(),
                        })
                    }
                    Err(err) => Err(err),
                }
            }
            RequestMode::Polling | RequestMode::Callback => {
                let engine = self.clone();
                tokio::spawn(async move {
                    if let Err(err) = engine.execute_call(ctx).await {
                        debug!("async request finished with error: {}", err);
                    }
                });
                Ok(EngineResponse::Accepted { request_id })
            }
        }
    }

    /// Submits the upstream call through the compartment and persists the
    /// terminal state. Shared by the inline and spawned paths.
    async fn execute_call(&self, ctx: CallContext) -> Result<StoredResponse, GatewayError> {
        if ctx.persisted {
            // Best-effort: a callback receipt may already have completed the
            // record, in which case the transition is refused and the
            // outcome below is simply not recorded.
            let _ = self
                .store
                .update_state(&ctx.request_id, RequestState::InProgress, RecordPatch::none())
                .await;
        }

        let bulkhead = self
            .bulkheads
            .get_or_create(&ctx.service, &ctx.api.name, &ctx.runtime);

        let retry = ctx.api.retry.clone().unwrap_or_default();
        let retryable = ctx.method == ReqwestMethod::GET
            || ctx.method == ReqwestMethod::HEAD
            || ctx.method == ReqwestMethod::OPTIONS;
        let call = call_upstream(
            ctx.client.clone(),
            ctx.method.clone(),
            ctx.target.clone(),
            ctx.headers.clone(),
            ctx.body.clone(),
            retry,
            retryable,
        );

        let outcome = bulkhead.execute(call).await;
        let latency_ms = ctx.started.elapsed().as_millis();

        match outcome {
            Ok(stored) => {
                let stored = StoredResponse {
                    headers: filter_response_headers(stored.headers, &ctx.api.response_headers),
                    ..stored
                };
                info!(
                    target: "revolver::trace",
                    "service={} api={} latency_ms={} outcome=ok status={}",
                    ctx.service, ctx.api.name, latency_ms, stored.status
                );
                if ctx.persisted {
                    // A racing callback receipt may have completed the record
                    // already; losing that race is not an error.
                    match self
                        .store
                        .update_state(
                            &ctx.request_id,
                            RequestState::Completed,
                            RecordPatch::with_response(stored.clone()),
                        )
                        .await
                    {
                        Ok(_) if ctx.mode == RequestMode::Callback => {
                            match self
                                .store
                                .update_state(
                                    &ctx.request_id,
                                    RequestState::CallbackPending,
                                    RecordPatch::none(),
                                )
                                .await
                            {
                                Ok(_) => self.dispatcher.enqueue(&ctx.request_id),
                                Err(e) => warn!(
                                    "request {} not queued for callback: {}",
                                    ctx.request_id, e
                                ),
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!(
                            "request {} completion not recorded: {}",
                            ctx.request_id, e
                        ),
                    }
                }
                Ok(stored)
            }
            Err(err) => {
                let (state, gateway_err) = map_failure(&ctx, err);
                info!(
                    target: "revolver::trace",
                    "service={} api={} latency_ms={} outcome={}",
                    ctx.service, ctx.api.name, latency_ms, gateway_err.kind()
                );
                if ctx.persisted {
                    if let Err(e) = self
                        .store
                        .update_state(&ctx.request_id, state, RecordPatch::none())
                        .await
                    {
                        warn!("request {} failure not recorded: {}", ctx.request_id, e);
                    }
                }
                Err(gateway_err)
            }
        }
    }
}

fn map_failure(ctx: &CallContext, err: BulkheadError<UpstreamCallError>) -> (RequestState, GatewayError) {
    match err {
        BulkheadError::TimedOut { timeout_ms } => (
            RequestState::TimedOut,
            GatewayError::Timeout { timeout_ms },
        ),
        BulkheadError::CapacityExceeded { retry_after_ms } => (
            RequestState::Failed,
            GatewayError::CapacityExceeded {
                service: ctx.service.clone(),
                api: ctx.api.name.clone(),
                retry_after_ms,
            },
        ),
        BulkheadError::CircuitOpen { retry_after_ms } => (
            RequestState::Failed,
            GatewayError::CircuitOpen {
                service: ctx.service.clone(),
                api: ctx.api.name.clone(),
                retry_after_ms,
            },
        ),
        BulkheadError::Failed(call_err) => (
            RequestState::Failed,
            GatewayError::Upstream {
                message: call_err.message,
                status: call_err.status,
            },
        ),
    }
}

/// The raw upstream exchange with the retry loop. Runs entirely inside the
/// compartment's time budget.
async fn call_upstream(
    client: Client,
    method: ReqwestMethod,
    target: String,
    headers: ReqwestHeaderMap,
    body: Vec<u8>,
    retry: RetryPolicy,
    retryable: bool,
) -> Result<StoredResponse, UpstreamCallError> {
    let attempts = if retryable { retry.max_attempts } else { 1 };
    let mut last_err = UpstreamCallError {
        message: "upstream call never attempted".to_string(),
        status: None,
    };

    for attempt in 0..attempts {
        if attempt > 0 {
            sleep(Duration::from_millis(retry.backoff_ms(attempt - 1))).await;
            warn!("retry attempt {} for {}", attempt, target);
        }

        let request = client
            .request(method.clone(), &target)
            .headers(headers.clone())
            .body(body.clone());

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_server_error() {
                    last_err = UpstreamCallError {
                        message: format!("upstream returned {}", status),
                        status: Some(status.as_u16()),
                    };
                    if attempt + 1 < attempts {
                        continue;
                    }
                    return Err(last_err);
                }

                let response_headers = response
                    .headers()
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|v| (name.as_str().to_string(), v.to_string()))
                    })
                    .collect();
                let status_code = status.as_u16();
                return match response.bytes().await {
                    Ok(bytes) => Ok(StoredResponse {
                        status: status_code,
                        headers: response_headers,
                        body: bytes.to_vec(),
                    }),
                    Err(e) => Err(UpstreamCallError {
                        message: format!("failed reading upstream body: {}", e),
                        status: Some(status_code),
                    }),
                };
            }
            Err(e) => {
                last_err = UpstreamCallError {
                    message: e.to_string(),
                    status: None,
                };
                if attempt + 1 < attempts {
                    continue;
                }
                return Err(last_err);
            }
        }
    }
    Err(last_err)
}

/// Determines the execution mode from headers and the API default.
///
/// `X-Callback-Uri` wins; an explicit `X-Request-Mode` must be one of the
/// three known values, and `CALLBACK` without a callback URI is malformed.
fn select_mode(
    headers: &ActixHeaderMap,
    api_mode: ApiMode,
) -> Result<(RequestMode, Option<String>), GatewayError> {
    let callback_uri = header_value(headers, "x-callback-uri")?;
    if let Some(uri) = callback_uri {
        if uri.is_empty() {
            return Err(GatewayError::BadRequest {
                message: "X-Callback-Uri must not be empty".to_string(),
            });
        }
        return Ok((RequestMode::Callback, Some(uri)));
    }

    if let Some(raw) = header_value(headers, "x-request-mode")? {
        return match RequestMode::from_header(&raw) {
            Some(RequestMode::Callback) => Err(GatewayError::BadRequest {
                message: "CALLBACK mode requires X-Callback-Uri".to_string(),
            }),
            Some(mode) => Ok((mode, None)),
            None => Err(GatewayError::BadRequest {
                message: format!("unknown request mode: {}", raw),
            }),
        };
    }

    match api_mode {
        ApiMode::Polling => Ok((RequestMode::Polling, None)),
        ApiMode::Sync => Ok((RequestMode::Sync, None)),
    }
}

fn has_credentials(headers: &ActixHeaderMap) -> bool {
    headers
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}

fn header_value(headers: &ActixHeaderMap, name: &str) -> Result<Option<String>, GatewayError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|v| Some(v.to_string()))
            .map_err(|_| GatewayError::BadRequest {
                message: format!("header {} is not valid UTF-8", name),
            }),
    }
}

fn collect_headers(headers: &ActixHeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn storage_failure(err: StorageError) -> GatewayError {
    GatewayError::Storage {
        message: err.to_string(),
    }
}

fn convert_method(method: &ActixMethod) -> ReqwestMethod {
    match *method {
        ActixMethod::GET => ReqwestMethod::GET,
        ActixMethod::POST => ReqwestMethod::POST,
        ActixMethod::PUT => ReqwestMethod::PUT,
        ActixMethod::DELETE => ReqwestMethod::DELETE,
        ActixMethod::PATCH => ReqwestMethod::PATCH,
        ActixMethod::HEAD => ReqwestMethod::HEAD,
        ActixMethod::OPTIONS => ReqwestMethod::OPTIONS,
        _ => ReqwestMethod::GET,
    }
}

/// Assembles the upstream header map: hop-by-hop stripped, whitelist
/// applied, then auth decoration, correlation id and tracking metadata.
fn build_upstream_headers(
    original: &ActixHeaderMap,
    api: &ApiSpec,
    service: &ServiceSpec,
    request_id: &str,
    peer_addr: Option<&str>,
) -> ReqwestHeaderMap {
    let mut headers = ReqwestHeaderMap::with_capacity(original.len() + 4);

    for (name, value) in original {
        let lower = name.as_str().to_ascii_lowercase();
        if HOP_HEADERS.iter().any(|h| *h == lower) {
            continue;
        }
        if !api.request_headers.is_empty()
            && lower != "content-type"
            && !api
                .request_headers
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(&lower))
        {
            continue;
        }
        if let (Ok(header_name), Ok(header_value)) = (
            HeaderName::from_bytes(name.as_ref()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.insert(header_name, header_value);
        }
    }

    match &service.auth {
        Some(AuthConfig::Basic { username, password }) => {
            let token = base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", username, password));
            if let Ok(value) = HeaderValue::from_str(&format!("Basic {}", token)) {
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
        }
        Some(AuthConfig::Token { token }) => {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
        }
        None => {}
    }

    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(HeaderName::from_static("x-request-id"), value);
    }

    if service.tracking_headers {
        if let Some(peer) = peer_addr {
            if let Ok(value) = HeaderValue::from_str(peer) {
                headers.insert(HeaderName::from_static("x-forwarded-for"), value);
            }
        }
        if let Ok(value) = HeaderValue::from_str(&chrono::Utc::now().to_rfc3339()) {
            headers.insert(HeaderName::from_static("x-gateway-timestamp"), value);
        }
    }

    headers
        .entry(reqwest::header::USER_AGENT)
        .or_insert_with(|| HeaderValue::from_static("revolver/0.3"));

    headers
}

/// Filters upstream response headers through the API whitelist. Hop-by-hop
/// headers never pass.
fn filter_response_headers(
    headers: Vec<(String, String)>,
    whitelist: &[String],
) -> Vec<(String, String)> {
    headers
        .into_iter()
        .filter(|(name, _)| {
            let lower = name.to_ascii_lowercase();
            if HOP_HEADERS.iter().any(|h| *h == lower) {
                return false;
            }
            whitelist.is_empty()
                || lower == "content-type"
                || whitelist.iter().any(|allowed| allowed.eq_ignore_ascii_case(&lower))
        })
        .collect()
}
