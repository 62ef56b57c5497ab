use revolver::models::service::{ApiMode, ApiSpec, ServiceSpec, ServiceType};
use revolver::utils::route_matcher::{RouteError, ServiceRouter};

fn api(name: &str, path: &str) -> ApiSpec {
    ApiSpec {
        name: name.to_string(),
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

fn service(name: &str, apis: Vec<ApiSpec>) -> ServiceSpec {
    ServiceSpec {
        name: name.to_string(),
        service_type: ServiceType::Http,
        connection_pool_size: None,
        keep_alive_seconds: None,
        compression: None,
        auth: None,
        tracking_headers: false,
        keystore_path: None,
        keystore_password: None,
        apis,
    }
}

#[test]
fn literal_beats_parametric() {
    // Declaration order is deliberately parametric-first; specificity
    // ordering must still give the literal route priority.
    let services = vec![service(
        "payments",
        vec![
            api("order", "/orders/{id}"),
            api("latest", "/orders/latest"),
        ],
    )];
    let router = ServiceRouter::compile(&services).unwrap();

    let m = router.match_path("payments", "/orders/latest").unwrap();
    assert_eq!(m.api.name, "latest");
    assert!(m.params.is_empty());

    let m = router.match_path("payments", "/orders/42").unwrap();
    assert_eq!(m.api.name, "order");
    assert_eq!(m.params, vec![("id".to_string(), "42".to_string())]);
}

#[test]
fn parameters_are_extracted_in_order() {
    let services = vec![service(
        "shop",
        vec![api("item", "/orders/{order_id}/items/{item_id}")],
    )];
    let router = ServiceRouter::compile(&services).unwrap();

    let m = router
        .match_path("shop", "/orders/o-1/items/i-9")
        .unwrap();
    assert_eq!(
        m.params,
        vec![
            ("order_id".to_string(), "o-1".to_string()),
            ("item_id".to_string(), "i-9".to_string()),
        ]
    );
}

#[test]
fn parameters_do_not_cross_segments() {
    let services = vec![service("shop", vec![api("item", "/items/{id}")])];
    let router = ServiceRouter::compile(&services).unwrap();

    assert!(router.match_path("shop", "/items/1/extra").is_none());
    assert!(router.match_path("shop", "/items/").is_none());
}

#[test]
fn unknown_service_or_path_returns_none() {
    let services = vec![service("payments", vec![api("order", "/orders/{id}")])];
    let router = ServiceRouter::compile(&services).unwrap();

    assert!(router.match_path("identity", "/orders/1").is_none());
    assert!(router.match_path("payments", "/refunds/1").is_none());
}

#[test]
fn matching_is_deterministic() {
    // Two parametric templates of equal specificity: the lexicographically
    // smaller compiled expression must win, on every call.
    let services = vec![service(
        "svc",
        vec![api("b", "/x/{v}/b"), api("a", "/x/{v}/a")],
    )];
    let router = ServiceRouter::compile(&services).unwrap();

    for _ in 0..20 {
        let m = router.match_path("svc", "/x/1/a").unwrap();
        assert_eq!(m.api.name, "a");
        let m = router.match_path("svc", "/x/1/b").unwrap();
        assert_eq!(m.api.name, "b");
    }
}

#[test]
fn tie_break_is_lexicographic_on_compiled_expression() {
    // Both templates match "/both/42"; specificity is equal (one parameter
    // each), so ordering falls back to the compiled pattern text.
    let services = vec![service(
        "svc",
        vec![api("zed", "/both/{z}"), api("alpha", "/both/{a}")],
    )];
    let router = ServiceRouter::compile(&services).unwrap();

    // Compiled patterns are identical ("^/both/([^/]+)$") regardless of the
    // parameter name, so the sort is stable and matching deterministic.
    let first = router.match_path("svc", "/both/42").unwrap().api.name.clone();
    for _ in 0..10 {
        assert_eq!(router.match_path("svc", "/both/42").unwrap().api.name, first);
    }
}

#[test]
fn malformed_templates_fail_compilation() {
    let services = vec![service("svc", vec![api("bad", "/orders/{id")])];
    assert!(matches!(
        ServiceRouter::compile(&services),
        Err(RouteError::InvalidPattern { .. })
    ));

    let services = vec![service("svc", vec![api("bad", "/orders/{}")])];
    assert!(ServiceRouter::compile(&services).is_err());
}

#[test]
fn regex_metacharacters_in_literals_are_escaped() {
    let services = vec![service("svc", vec![api("versioned", "/v1.0/ping")])];
    let router = ServiceRouter::compile(&services).unwrap();

    assert!(router.match_path("svc", "/v1.0/ping").is_some());
    // '.' must not act as a wildcard.
    assert!(router.match_path("svc", "/v1x0/ping").is_none());
}

#[test]
fn routes_listing_covers_every_api() {
    let services = vec![
        service("a", vec![api("one", "/one"), api("two", "/two/{id}")]),
        service("b", vec![api("three", "/three")]),
    ];
    let router = ServiceRouter::compile(&services).unwrap();

    let mut listed: Vec<(String, String)> = router
        .routes()
        .map(|(s, a, _)| (s.to_string(), a.to_string()))
        .collect();
    listed.sort();
    assert_eq!(
        listed,
        vec![
            ("a".to_string(), "one".to_string()),
            ("a".to_string(), "two".to_string()),
            ("b".to_string(), "three".to_string()),
        ]
    );
}
