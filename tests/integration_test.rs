use assert_json_diff::assert_json_eq;
use axum::{extract::ConnectInfo, Router};
use cmdgate::{
    build_router,
    config::GatewayConfig,
    proxy::ProxyState,
    rate_limit::{
        ClientRateLimiter, CommandLimiterRegistry, CommandSource, LimitPolicy, ManualClock,
        RateLimitMiddleware,
    },
    GatewayLimiters,
};
use http::{Request, StatusCode};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

/// Gateway in front of a mock upstream, limiting `search` to 2 and everything else to 5
async fn setup_test_gateway(clock: ManualClock) -> (Router, MockServer) {
    let mock_server = MockServer::start().await;

    let limits = HashMap::from([("search".to_string(), 2)]);
    let registry = CommandLimiterRegistry::build(limits, 5, Duration::from_secs(60)).unwrap();
    let limiter = RateLimitMiddleware::new(Arc::new(registry)).with_clock(Arc::new(clock));
    let proxy_state = ProxyState::new(&mock_server.uri(), Duration::from_secs(30)).unwrap();

    (build_router(proxy_state, limiter, None), mock_server)
}

fn request(uri: &str, client: &str) -> Request<axum::body::Body> {
    let addr: SocketAddr = format!("{}:40000", client).parse().unwrap();
    Request::builder()
        .uri(uri)
        .method("GET")
        .extension(ConnectInfo(addr))
        .body(axum::body::Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_admitted_request_is_proxied() {
    let (app, mock_server) = setup_test_gateway(ManualClock::default()).await;

    Mock::given(method("GET"))
        .and(path("/api/search"))
        .and(query_param("q", "rust"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": ["tokio", "axum"]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = app
        .oneshot(request("/api/search?q=rust", "1.2.3.4"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("X-RateLimit-Limit").unwrap(), "2");
    assert_eq!(response.headers().get("X-RateLimit-Remaining").unwrap(), "1");

    assert_json_eq!(
        body_json(response).await,
        serde_json::json!({ "results": ["tokio", "axum"] })
    );
}

#[tokio::test]
async fn test_search_then_export_scenario() {
    let (app, mock_server) = setup_test_gateway(ManualClock::default()).await;

    // Only the two admitted searches may reach the upstream
    Mock::given(method("GET"))
        .and(path("/api/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/export"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&mock_server)
        .await;

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(request("/api/search", "1.2.3.4"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let rejected = app
        .clone()
        .oneshot(request("/api/search", "1.2.3.4"))
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(rejected.headers().get("Retry-After").unwrap(), "60");
    assert_json_eq!(
        body_json(rejected).await,
        serde_json::json!({ "message": "You have reached maximum request limit." })
    );

    let export = app
        .oneshot(request("/api/export", "1.2.3.4"))
        .await
        .unwrap();
    assert_eq!(export.status(), StatusCode::OK);
    assert_eq!(export.headers().get("X-RateLimit-Limit").unwrap(), "5");
}

#[tokio::test]
async fn test_window_rollover_readmits() {
    let clock = ManualClock::default();
    let (app, mock_server) = setup_test_gateway(clock.clone()).await;

    Mock::given(method("GET"))
        .and(path("/api/search"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&mock_server)
        .await;

    for _ in 0..2 {
        app.clone()
            .oneshot(request("/api/search", "1.2.3.4"))
            .await
            .unwrap();
    }
    let rejected = app
        .clone()
        .oneshot(request("/api/search", "1.2.3.4"))
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);

    clock.advance(Duration::from_secs(60));

    let response = app
        .oneshot(request("/api/search", "1.2.3.4"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_clients_are_limited_independently() {
    let (app, mock_server) = setup_test_gateway(ManualClock::default()).await;

    Mock::given(method("GET"))
        .and(path("/api/search"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    for _ in 0..2 {
        app.clone()
            .oneshot(request("/api/search", "1.2.3.4"))
            .await
            .unwrap();
    }
    let saturated = app
        .clone()
        .oneshot(request("/api/search", "1.2.3.4"))
        .await
        .unwrap();
    assert_eq!(saturated.status(), StatusCode::TOO_MANY_REQUESTS);

    let other = app
        .oneshot(request("/api/search", "5.6.7.8"))
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_query_command_source() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rpc"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let limits = HashMap::from([("search".to_string(), 1)]);
    let registry = CommandLimiterRegistry::build(limits, 5, Duration::from_secs(60)).unwrap();
    let limiter = RateLimitMiddleware::new(Arc::new(registry)).with_command_source(
        CommandSource::Query {
            name: "cmd".to_string(),
        },
    );
    let proxy_state = ProxyState::new(&mock_server.uri(), Duration::from_secs(30)).unwrap();
    let app = build_router(proxy_state, limiter, None);

    let first = app
        .clone()
        .oneshot(request("/rpc?cmd=search", "1.2.3.4"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(request("/rpc?cmd=search", "1.2.3.4"))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

async fn statuses(app: &Router, uris: &[&str]) -> Vec<u16> {
    let mut statuses = Vec::new();
    for uri in uris {
        let response = app.clone().oneshot(request(uri, "1.2.3.4")).await.unwrap();
        statuses.push(response.status().as_u16());
    }
    statuses
}

#[tokio::test]
async fn test_encoded_query_commands_share_a_limit() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rpc"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let limits = HashMap::from([("search".to_string(), 1)]);
    let registry = CommandLimiterRegistry::build(limits, 100, Duration::from_secs(60)).unwrap();
    let limiter = RateLimitMiddleware::new(Arc::new(registry)).with_command_source(
        CommandSource::Query {
            name: "cmd".to_string(),
        },
    );
    let proxy_state = ProxyState::new(&mock_server.uri(), Duration::from_secs(30)).unwrap();
    let app = build_router(proxy_state, limiter, None);

    let got = statuses(
        &app,
        &[
            "/rpc?cmd=search",
            "/rpc?cmd=sea%72ch",
            "/rpc?cmd=%73earch",
            "/rpc?c%6Dd=search",
        ],
    )
    .await;
    assert_eq!(got, vec![200, 429, 429, 429]);
}

#[tokio::test]
async fn test_encoded_path_commands_share_a_limit() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let limits = HashMap::from([("search".to_string(), 1)]);
    let registry = CommandLimiterRegistry::build(limits, 100, Duration::from_secs(60)).unwrap();
    let limiter = RateLimitMiddleware::new(Arc::new(registry));
    let proxy_state = ProxyState::new(&mock_server.uri(), Duration::from_secs(30)).unwrap();
    let app = build_router(proxy_state, limiter, None);

    let got = statuses(&app, &["/api/search", "/api/sea%72ch", "/api/%73earch"]).await;
    assert_eq!(got, vec![200, 429, 429]);
}

#[tokio::test]
async fn test_global_limit_spans_commands() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(4)
        .mount(&mock_server)
        .await;

    let registry = CommandLimiterRegistry::build(HashMap::new(), 100, Duration::from_secs(60)).unwrap();
    let global = ClientRateLimiter::new(
        "global",
        LimitPolicy::new("global", 3, Duration::from_secs(60)).unwrap(),
    );
    let limiters = GatewayLimiters {
        commands: RateLimitMiddleware::new(Arc::new(registry)),
        global: Some(global),
        routes: Vec::new(),
    };
    let proxy_state = ProxyState::new(&mock_server.uri(), Duration::from_secs(30)).unwrap();
    let app = build_router(proxy_state, limiters, None);

    let got = statuses(
        &app,
        &["/api/search", "/api/export", "/api/import", "/api/search"],
    )
    .await;
    assert_eq!(got, vec![200, 200, 200, 429]);

    // other clients keep their own global budget
    let other = app.oneshot(request("/api/search", "5.6.7.8")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_route_limit_from_config() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/profile"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&mock_server)
        .await;

    let yaml = r#"
upstream:
  url: "http://localhost:3000"
rate_limiting:
  default: 10
  routes:
    /api/login:
      max_requests: 1
"#;
    let config = GatewayConfig::from_yaml(yaml).unwrap();
    config.validate().unwrap();

    let registry = Arc::new(CommandLimiterRegistry::from_config(&config.rate_limiting).unwrap());
    let limiters = GatewayLimiters::from_config(registry, &config.rate_limiting).unwrap();
    assert_eq!(limiters.client_limiters().count(), 1);

    let proxy_state = ProxyState::new(&mock_server.uri(), Duration::from_secs(30)).unwrap();
    let app = build_router(proxy_state, limiters, None);

    let login = app.clone().oneshot(request("/api/login", "1.2.3.4")).await.unwrap();
    assert_eq!(login.status(), StatusCode::OK);
    // the route limit is the innermost, so it reports
    assert_eq!(login.headers().get("X-RateLimit-Limit").unwrap(), "1");

    let got = statuses(&app, &["/api/login", "/api/profile", "/api/profile"]).await;
    assert_eq!(got, vec![429, 200, 200]);
}

#[tokio::test]
async fn test_upstream_unreachable_is_bad_gateway() {
    let registry = CommandLimiterRegistry::build(HashMap::new(), 5, Duration::from_secs(60)).unwrap();
    let limiter = RateLimitMiddleware::new(Arc::new(registry));
    // Nothing listens on port 9 locally
    let proxy_state = ProxyState::new("http://127.0.0.1:9", Duration::from_secs(5)).unwrap();
    let app = build_router(proxy_state, limiter, None);

    let response = app
        .oneshot(request("/api/search", "1.2.3.4"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(body_json(response).await["message"].is_string());
}

#[test]
fn test_invalid_config_fails_before_serving() {
    let yaml = r#"
upstream:
  url: "http://localhost:3000"
rate_limiting:
  default: 5
  commands:
    search: 0
"#;

    let config = GatewayConfig::from_yaml(yaml).unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("search"));
    assert!(CommandLimiterRegistry::from_config(&config.rate_limiting).is_err());
}
