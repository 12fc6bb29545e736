//! Origin allow-list and rate gate

use std::net::SocketAddr;

use actix_web::http::{Method, StatusCode};
use actix_web::test::{TestRequest, call_service, read_body_json};
use admissions_gateway::testing::setup;
use serde_json::Value;

#[actix_web::test]
async fn test_allowed_origin_is_reflected() {
    let (service, _state) = gateway!(setup::config());

    let req = TestRequest::get()
        .uri("/health")
        .insert_header(("origin", "http://localhost:3000"))
        .to_request();
    let res = call_service(&service, req).await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers().get("access-control-allow-origin").unwrap(),
        "http://localhost:3000"
    );
    assert_eq!(
        res.headers().get("access-control-allow-credentials").unwrap(),
        "true"
    );
}

#[actix_web::test]
async fn test_unlisted_origin_is_served_without_cors_headers() {
    let (service, _state) = gateway!(setup::config());

    let req = TestRequest::get()
        .uri("/health")
        .insert_header(("origin", "https://evil.example"))
        .to_request();
    let res = call_service(&service, req).await;

    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().get("access-control-allow-origin").is_none());
}

#[actix_web::test]
async fn test_rate_limit_headers_and_rejection() {
    let mut config = setup::config();
    if let Some(tier) = config.security.rate_limit.tiers.get_mut("default") {
        tier.requests = 2;
    }
    let (service, _state) = gateway!(config);
    let peer: SocketAddr = "203.0.113.7:50000".parse().unwrap();

    for remaining in ["1", "0"] {
        let req = TestRequest::get().uri("/health").peer_addr(peer).to_request();
        let res = call_service(&service, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get("ratelimit-limit").unwrap(), "2");
        assert_eq!(res.headers().get("ratelimit-remaining").unwrap(), remaining);
        assert!(res.headers().contains_key("ratelimit-reset"));
    }

    let req = TestRequest::get().uri("/health").peer_addr(peer).to_request();
    let res = call_service(&service, req).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(res.headers().contains_key("retry-after"));
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.headers().get("ratelimit-remaining").unwrap(), "0");

    let body: Value = read_body_json(res).await;
    assert_eq!(body["code"], "RATE_LIMITED");

    // Another client has its own budget
    let other: SocketAddr = "198.51.100.4:50000".parse().unwrap();
    let req = TestRequest::get().uri("/health").peer_addr(other).to_request();
    let res = call_service(&service, req).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[actix_web::test]
async fn test_disabled_rate_limit_adds_no_headers() {
    let mut config = setup::config();
    config.security.rate_limit.enabled = false;
    let (service, _state) = gateway!(config);

    let res = call_service(&service, TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().get("ratelimit-limit").is_none());
}

#[actix_web::test]
async fn test_preflights_are_rate_limited() {
    let mut config = setup::config();
    if let Some(tier) = config.security.rate_limit.tiers.get_mut("default") {
        tier.requests = 1;
    }
    let (service, _state) = gateway!(config);
    let peer: SocketAddr = "203.0.113.9:50000".parse().unwrap();

    let preflight = || {
        TestRequest::default()
            .method(Method::OPTIONS)
            .uri("/api/catalog/programs")
            .peer_addr(peer)
            .insert_header(("origin", "http://localhost:3000"))
            .insert_header(("access-control-request-method", "POST"))
            .to_request()
    };

    let res = call_service(&service, preflight()).await;
    assert!(res.status().is_success());
    assert_eq!(res.headers().get("ratelimit-limit").unwrap(), "1");
    assert_eq!(res.headers().get("ratelimit-remaining").unwrap(), "0");
    assert_eq!(
        res.headers().get("access-control-allow-origin").unwrap(),
        "http://localhost:3000"
    );

    for _ in 0..4 {
        let res = call_service(&service, preflight()).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(res.headers().contains_key("retry-after"));
        assert_eq!(res.headers().get("ratelimit-limit").unwrap(), "1");
        assert_eq!(
            res.headers().get("access-control-allow-origin").unwrap(),
            "http://localhost:3000"
        );
    }
}

#[actix_web::test]
async fn test_rejection_carries_cors_headers_for_allowed_origin_only() {
    let mut config = setup::config();
    if let Some(tier) = config.security.rate_limit.tiers.get_mut("default") {
        tier.requests = 1;
    }
    let (service, _state) = gateway!(config);
    let peer: SocketAddr = "203.0.113.10:50000".parse().unwrap();

    let request = |origin: &str| {
        TestRequest::get()
            .uri("/health")
            .peer_addr(peer)
            .insert_header(("origin", origin.to_string()))
            .to_request()
    };

    let res = call_service(&service, request("http://localhost:3000")).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = call_service(&service, request("http://localhost:3000")).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        res.headers().get("access-control-allow-origin").unwrap(),
        "http://localhost:3000"
    );
    assert_eq!(
        res.headers().get("access-control-allow-credentials").unwrap(),
        "true"
    );

    let res = call_service(&service, request("https://evil.example")).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(res.headers().get("access-control-allow-origin").is_none());
}
