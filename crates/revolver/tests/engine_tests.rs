//! End-to-end engine tests against a live local upstream.

use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use actix_web::http::Method;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use revolver::config::settings::parse_settings;
use revolver::gateway::Gateway;
use revolver::models::error::GatewayError;
use revolver::models::record::{RequestRecord, RequestState};
use revolver::services::engine::{EngineResponse, IngressRequest};
use revolver::storage::MailboxStore;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};

async fn upstream_handler(
    req: HttpRequest,
    hits: web::Data<Arc<AtomicUsize>>,
) -> HttpResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    match req.path() {
        "/slow" => {
            sleep(Duration::from_millis(2000)).await;
            HttpResponse::Ok().json(json!({"message": "late"}))
        }
        "/busy" => {
            sleep(Duration::from_millis(300)).await;
            HttpResponse::Ok().json(json!({"message": "busy"}))
        }
        "/fail" | "/fail2" => HttpResponse::InternalServerError().finish(),
        _ => HttpResponse::Ok()
            .insert_header(("x-upstream-tag", "v1"))
            .insert_header(("x-internal-secret", "do-not-leak"))
            .json(json!({"message": "hello"})),
    }
}

/// Spawns the upstream on an ephemeral port; returns the port and a counter
/// of requests that actually reached it.
fn spawn_upstream() -> (u16, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_factory = Arc::clone(&hits);
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(Arc::clone(&hits_factory)))
            .default_service(web::to(upstream_handler))
    })
    .workers(1)
    .disable_signals()
    .listen(listener)
    .unwrap()
    .run();
    tokio::spawn(server);
    (port, hits)
}

fn gateway_for(port: u16) -> Gateway {
    let yaml = format!(
        r#"
revolver:
  global:
    timeoutMs: 2000
    concurrency: 8
  serviceResolverConfig:
    endpoints:
      payments:
        - host: 127.0.0.1
          port: {port}
  services:
    - name: payments
      type: http
      apis:
        - name: order
          path: /orders/{{id}}
          methods: [GET, POST]
        - name: slow
          path: /slow
          methods: [GET]
          runtime:
            timeoutMs: 500
        - name: busy
          path: /busy
          methods: [GET]
          runtime:
            concurrency: 3
        - name: flaky
          path: /fail
          methods: [POST]
          runtime:
            circuit:
              errorThresholdPercent: 50
              requestVolume: 10
              sleepWindowMs: 1000
        - name: guarded
          path: /guarded
          methods: [GET]
          authRequired: true
        - name: covered
          path: /fail2
          methods: [POST]
          runtime:
            fallbackEnabled: true
          fallback:
            status: 200
            body: '{{"fallback":true}}'
        - name: clean
          path: /clean
          methods: [GET]
          responseHeaders: [x-upstream-tag]
  mailBox:
    type: in_memory
    ttlSeconds: 900
    persistSync: true
  callbackTimeout: 2000
"#
    );
    let settings = parse_settings(&yaml).unwrap();
    Gateway::builder(settings).build().unwrap()
}

fn ingress(
    service: &str,
    path: &str,
    method: Method,
    headers: &[(&str, &str)],
    body: &[u8],
) -> IngressRequest {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    IngressRequest {
        service: service.to_string(),
        path: path.to_string(),
        method,
        headers: map,
        body: web::Bytes::copy_from_slice(body),
        peer_addr: None,
    }
}

async fn wait_for_state(
    gateway: &Gateway,
    request_id: &str,
    state: RequestState,
    budget: Duration,
) -> RequestRecord {
    let deadline = Instant::now() + budget;
    loop {
        if let Some(record) = gateway.store().get(request_id).await.unwrap() {
            if record.state == state {
                return record;
            }
        }
        assert!(
            Instant::now() < deadline,
            "request {} never reached {:?}",
            request_id,
            state
        );
        sleep(Duration::from_millis(50)).await;
    }
}

#[actix_web::test]
async fn sync_invoke_forwards_and_returns_inline() {
    let (port, hits) = spawn_upstream();
    let gateway = gateway_for(port);

    let response = gateway
        .invoke(ingress("payments", "/orders/42", Method::GET, &[], b""))
        .await
        .unwrap();

    match response {
        EngineResponse::Inline { status, body, .. } => {
            assert_eq!(status, 200);
            assert!(String::from_utf8_lossy(&body).contains("hello"));
        }
        other => panic!("expected inline response, got {:?}", other),
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn unknown_route_is_not_found() {
    let (port, _hits) = spawn_upstream();
    let gateway = gateway_for(port);

    let err = gateway
        .invoke(ingress("payments", "/refunds/1", Method::GET, &[], b""))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::RouteNotFound { .. }));

    let err = gateway
        .invoke(ingress("identity", "/orders/1", Method::GET, &[], b""))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::RouteNotFound { .. }));
}

#[actix_web::test]
async fn disallowed_method_is_rejected() {
    let (port, hits) = spawn_upstream();
    let gateway = gateway_for(port);

    let err = gateway
        .invoke(ingress("payments", "/slow", Method::POST, &[], b""))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::BadRequest { .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[actix_web::test]
async fn disabled_api_returns_api_disabled() {
    let (port, hits) = spawn_upstream();
    let gateway = gateway_for(port);

    gateway.toggles().set("payments", "order", false).unwrap();
    let err = gateway
        .invoke(ingress("payments", "/orders/42", Method::GET, &[], b""))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ApiDisabled { .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    gateway.toggles().set("payments", "order", true).unwrap();
    assert!(gateway
        .invoke(ingress("payments", "/orders/42", Method::GET, &[], b""))
        .await
        .is_ok());
}

#[actix_web::test]
async fn auth_required_demands_credentials() {
    let (port, _hits) = spawn_upstream();
    let gateway = gateway_for(port);

    let err = gateway
        .invoke(ingress("payments", "/guarded", Method::GET, &[], b""))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Auth { .. }));

    let response = gateway
        .invoke(ingress(
            "payments",
            "/guarded",
            Method::GET,
            &[("authorization", "Bearer caller-token")],
            b"",
        ))
        .await;
    assert!(response.is_ok());
}

#[actix_web::test]
async fn upstream_timeout_maps_to_timed_out() {
    let (port, _hits) = spawn_upstream();
    let gateway = gateway_for(port);

    let started = Instant::now();
    let err = gateway
        .invoke(ingress(
            "payments",
            "/slow",
            Method::GET,
            &[("x-request-id", "slow-1")],
            b"",
        ))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, GatewayError::Timeout { timeout_ms: 500 }));
    assert!(
        elapsed >= Duration::from_millis(400) && elapsed <= Duration::from_millis(1200),
        "timeout took {:?}",
        elapsed
    );

    // persistSync is on, so the record carries the terminal state.
    let record = gateway.store().get("slow-1").await.unwrap().unwrap();
    assert_eq!(record.state, RequestState::TimedOut);
}

#[actix_web::test]
async fn bulkhead_sheds_calls_over_the_cap() {
    let (port, _hits) = spawn_upstream();
    let gateway = gateway_for(port);

    let results = futures::future::join_all(
        (0..5).map(|_| gateway.invoke(ingress("payments", "/busy", Method::GET, &[], b""))),
    )
    .await;

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let shed = results
        .iter()
        .filter(|r| matches!(r, Err(GatewayError::CapacityExceeded { .. })))
        .count();
    assert_eq!(ok, 3);
    assert_eq!(shed, 2);
}

#[actix_web::test]
async fn breaker_trips_and_admits_trial_after_sleep_window() {
    let (port, hits) = spawn_upstream();
    let gateway = gateway_for(port);

    // POST is non-idempotent, so every call is a single upstream attempt.
    for _ in 0..10 {
        let err = gateway
            .invoke(ingress("payments", "/fail", Method::POST, &[], b""))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Upstream { status: Some(500), .. }));
    }
    assert_eq!(hits.load(Ordering::SeqCst), 10);

    // Window full at 100% errors: the next call fails fast.
    let err = gateway
        .invoke(ingress("payments", "/fail", Method::POST, &[], b""))
        .await
        .unwrap_err();
    match err {
        GatewayError::CircuitOpen { retry_after_ms, .. } => {
            assert!(retry_after_ms > 0 && retry_after_ms <= 1000);
        }
        other => panic!("expected CircuitOpen, got {:?}", other),
    }
    assert_eq!(hits.load(Ordering::SeqCst), 10);

    // After the sleep window one trial goes through (and fails upstream).
    sleep(Duration::from_millis(1100)).await;
    let err = gateway
        .invoke(ingress("payments", "/fail", Method::POST, &[], b""))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Upstream { .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 11);

    // Failed trial re-opens the circuit.
    let err = gateway
        .invoke(ingress("payments", "/fail", Method::POST, &[], b""))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::CircuitOpen { .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 11);
}

#[actix_web::test]
async fn fallback_replaces_failure_for_sync_callers() {
    let (port, hits) = spawn_upstream();
    let gateway = gateway_for(port);

    let response = gateway
        .invoke(ingress("payments", "/fail2", Method::POST, &[], b""))
        .await
        .unwrap();
    match response {
        EngineResponse::Inline { status, body, .. } => {
            assert_eq!(status, 200);
            assert_eq!(body, b"{\"fallback\":true}");
        }
        other => panic!("expected fallback inline, got {:?}", other),
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn response_header_whitelist_is_applied() {
    let (port, _hits) = spawn_upstream();
    let gateway = gateway_for(port);

    let response = gateway
        .invoke(ingress("payments", "/clean", Method::GET, &[], b""))
        .await
        .unwrap();
    match response {
        EngineResponse::Inline { headers, .. } => {
            let names: Vec<&str> = headers.iter().map(|(n, _)| n.as_str()).collect();
            assert!(names.contains(&"x-upstream-tag"));
            assert!(names.contains(&"content-type"));
            assert!(!names.contains(&"x-internal-secret"));
        }
        other => panic!("expected inline response, got {:?}", other),
    }
}

#[actix_web::test]
async fn polling_mode_accepts_and_stores_the_response() {
    let (port, hits) = spawn_upstream();
    let gateway = gateway_for(port);

    let response = gateway
        .invoke(ingress(
            "payments",
            "/orders/9",
            Method::GET,
            &[("x-request-mode", "POLLING"), ("x-request-id", "r1")],
            b"",
        ))
        .await
        .unwrap();
    assert!(matches!(
        response,
        EngineResponse::Accepted { ref request_id } if request_id.as_str() == "r1"
    ));

    let record = wait_for_state(&gateway, "r1", RequestState::Completed, Duration::from_secs(3)).await;
    let stored = record.response.unwrap();
    assert_eq!(stored.status, 200);
    assert!(String::from_utf8_lossy(&stored.body).contains("hello"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn duplicate_async_submission_is_replay_safe() {
    let (port, hits) = spawn_upstream();
    let gateway = gateway_for(port);

    let headers = [("x-request-mode", "POLLING"), ("x-request-id", "r1")];
    gateway
        .invoke(ingress("payments", "/orders/9", Method::GET, &headers, b""))
        .await
        .unwrap();
    wait_for_state(&gateway, "r1", RequestState::Completed, Duration::from_secs(3)).await;

    // The resubmission is acknowledged without touching the upstream.
    let response = gateway
        .invoke(ingress("payments", "/orders/9", Method::GET, &headers, b""))
        .await
        .unwrap();
    assert!(matches!(
        response,
        EngineResponse::Accepted { ref request_id } if request_id.as_str() == "r1"
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn failed_async_submission_is_retried_not_replayed() {
    let (port, hits) = spawn_upstream();
    let gateway = gateway_for(port);

    let headers = [("x-request-mode", "POLLING"), ("x-request-id", "retry-1")];
    let response = gateway
        .invoke(ingress("payments", "/fail", Method::POST, &headers, b""))
        .await
        .unwrap();
    assert!(matches!(response, EngineResponse::Accepted { .. }));
    wait_for_state(&gateway, "retry-1", RequestState::Failed, Duration::from_secs(3)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // A FAILED record must not swallow the retry: the same id is accepted
    // again and drives a fresh upstream call.
    let response = gateway
        .invoke(ingress("payments", "/fail", Method::POST, &headers, b""))
        .await
        .unwrap();
    assert!(matches!(response, EngineResponse::Accepted { .. }));

    let deadline = Instant::now() + Duration::from_secs(3);
    while hits.load(Ordering::SeqCst) < 2 {
        assert!(
            Instant::now() < deadline,
            "resubmission never reached the upstream"
        );
        sleep(Duration::from_millis(50)).await;
    }
    wait_for_state(&gateway, "retry-1", RequestState::Failed, Duration::from_secs(3)).await;
}

#[actix_web::test]
async fn callback_mode_delivers_to_the_callback_url() {
    let (port, _hits) = spawn_upstream();

    // Callback target that records hits.
    let cb_hits = Arc::new(AtomicUsize::new(0));
    let cb_factory = Arc::clone(&cb_hits);
    let cb_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let cb_port = cb_listener.local_addr().unwrap().port();
    let cb_server = HttpServer::new(move || {
        let hits = Arc::clone(&cb_factory);
        App::new().default_service(web::to(move || {
            let hits = Arc::clone(&hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                HttpResponse::Ok().finish()
            }
        }))
    })
    .workers(1)
    .disable_signals()
    .listen(cb_listener)
    .unwrap()
    .run();
    tokio::spawn(cb_server);

    let gateway = gateway_for(port);
    let _background = gateway.start_background();

    let callback_uri = format!("http://127.0.0.1:{}/hook", cb_port);
    let response = gateway
        .invoke(ingress(
            "payments",
            "/orders/5",
            Method::POST,
            &[
                ("x-request-id", "cb-1"),
                ("x-callback-uri", callback_uri.as_str()),
            ],
            b"{\"amount\":10}",
        ))
        .await
        .unwrap();
    assert!(matches!(response, EngineResponse::Accepted { .. }));

    let record =
        wait_for_state(&gateway, "cb-1", RequestState::CallbackSent, Duration::from_secs(5)).await;
    assert_eq!(record.attempts, 1);
    assert_eq!(cb_hits.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn malformed_mode_header_is_a_bad_request() {
    let (port, hits) = spawn_upstream();
    let gateway = gateway_for(port);

    let err = gateway
        .invoke(ingress(
            "payments",
            "/orders/1",
            Method::GET,
            &[("x-request-mode", "BATCH")],
            b"",
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::BadRequest { .. }));

    let err = gateway
        .invoke(ingress(
            "payments",
            "/orders/1",
            Method::GET,
            &[("x-request-mode", "CALLBACK")],
            b"",
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::BadRequest { .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}
