//! Routing and forwarding

use actix_web::http::{StatusCode, Version, header};
use actix_web::test::{TestRequest, call_service, read_body, read_body_json};
use admissions_gateway::testing::{setup, upstream};
use serde_json::Value;

use super::bearer;

#[actix_web::test]
async fn test_unmapped_path_is_404_regardless_of_auth() {
    let (service, state) = gateway!(setup::config());
    let session = state.guard.login(1, "ana@school.cl", "guardian").await.unwrap();

    for req in [
        TestRequest::get().uri("/api/unknown").to_request(),
        TestRequest::get()
            .uri("/api/unknown")
            .insert_header(bearer(&session.token))
            .to_request(),
        TestRequest::get()
            .uri("/api/unknown")
            .insert_header(("authorization", "Bearer garbage"))
            .to_request(),
    ] {
        let res = call_service(&service, req).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let body: Value = read_body_json(res).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "ROUTE_NOT_FOUND");
    }
}

#[actix_web::test]
async fn test_public_route_forwards_request_verbatim() {
    let upstream = upstream::spawn().await;
    let mut config = setup::config();
    config
        .proxy
        .routes
        .push(setup::route("/api/catalog", &upstream.base_url, false));
    let (service, _state) = gateway!(config);

    let req = TestRequest::post()
        .uri("/api/catalog/programs/7?year=2025")
        .insert_header(("content-type", "application/json"))
        .insert_header(("x-request-id", "trace-123"))
        .insert_header(("x-user-id", "999"))
        .insert_header(("connection", "keep-alive"))
        .set_payload(r#"{"name":"Engineering"}"#)
        .to_request();
    let res = call_service(&service, req).await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get("x-upstream").unwrap(), "echo");
    assert_eq!(res.headers().get("x-request-id").unwrap(), "trace-123");

    let body: Value = read_body_json(res).await;
    assert_eq!(body["method"], "POST");
    assert_eq!(body["path"], "/programs/7");
    assert_eq!(body["query"], "year=2025");
    assert_eq!(body["body"], r#"{"name":"Engineering"}"#);
    assert_eq!(body["headers"]["x-request-id"], "trace-123");
    assert_eq!(body["headers"]["content-type"], "application/json");
    assert!(body["headers"]["x-forwarded-proto"].is_string());
    assert!(body["headers"].get("x-user-id").is_none(), "spoofed identity must be stripped");

    upstream.stop().await;
}

#[actix_web::test]
async fn test_http2_body_without_length_is_forwarded() {
    let upstream = upstream::spawn().await;
    let mut config = setup::config();
    config
        .proxy
        .routes
        .push(setup::route("/api/catalog", &upstream.base_url, false));
    let (service, _state) = gateway!(config);

    let mut req = TestRequest::post()
        .uri("/api/catalog/programs")
        .version(Version::HTTP_2)
        .insert_header(("content-type", "application/json"))
        .set_payload(r#"{"name":"Engineering"}"#)
        .to_request();
    req.headers_mut().remove(header::CONTENT_LENGTH);
    assert!(!req.head().headers.contains_key(header::CONTENT_LENGTH));

    let res = call_service(&service, req).await;
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = read_body_json(res).await;
    assert_eq!(body["method"], "POST");
    assert_eq!(body["body"], r#"{"name":"Engineering"}"#);

    upstream.stop().await;
}

#[actix_web::test]
async fn test_upstream_status_is_passed_through() {
    let upstream = upstream::spawn().await;
    let mut config = setup::config();
    config
        .proxy
        .routes
        .push(setup::route("/api/catalog", &upstream.base_url, false));
    let (service, _state) = gateway!(config);

    let req = TestRequest::get().uri("/api/catalog/status/409").to_request();
    let res = call_service(&service, req).await;
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let body = read_body(res).await;
    assert_eq!(body.as_ref(), br#"{"status":409}"#);

    upstream.stop().await;
}

#[actix_web::test]
async fn test_protected_route_requires_bearer() {
    let mut config = setup::config();
    config
        .proxy
        .routes
        .push(setup::route("/api/students", &upstream::unreachable(), true));
    let (service, _state) = gateway!(config);

    let res = call_service(&service, TestRequest::get().uri("/api/students/1").to_request()).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(res.headers().get("www-authenticate").unwrap(), "Bearer");

    let body: Value = read_body_json(res).await;
    assert_eq!(body["code"], "AUTH_MISSING");
}

#[actix_web::test]
async fn test_protected_route_forwards_identity() {
    let upstream = upstream::spawn().await;
    let mut config = setup::config();
    config
        .proxy
        .routes
        .push(setup::route("/api/students", &upstream.base_url, true));
    let (service, state) = gateway!(config);
    let session = state.guard.login(42, "ana@school.cl", "guardian").await.unwrap();

    let req = TestRequest::get()
        .uri("/api/students/42")
        .insert_header(bearer(&session.token))
        .insert_header(("x-user-role", "admin"))
        .to_request();
    let res = call_service(&service, req).await;
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = read_body_json(res).await;
    assert_eq!(body["path"], "/42");
    assert_eq!(body["headers"]["x-user-id"], "42");
    assert_eq!(body["headers"]["x-user-email"], "ana@school.cl");
    assert_eq!(body["headers"]["x-user-role"], "guardian");

    upstream.stop().await;
}

#[actix_web::test]
async fn test_down_upstream_with_valid_session_is_502_not_401() {
    let mut config = setup::config();
    config
        .proxy
        .routes
        .push(setup::route("/api/students", &upstream::unreachable(), true));
    let (service, state) = gateway!(config);
    let session = state.guard.login(42, "ana@school.cl", "guardian").await.unwrap();

    let req = TestRequest::get()
        .uri("/api/students/42")
        .insert_header(bearer(&session.token))
        .to_request();
    let res = call_service(&service, req).await;
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

    let body: Value = read_body_json(res).await;
    assert_eq!(body["code"], "UPSTREAM_UNAVAILABLE");
}

#[actix_web::test]
async fn test_route_timeout_is_502() {
    let upstream = upstream::spawn().await;
    let mut config = setup::config();
    let mut route = setup::route("/api/reports", &upstream.base_url, false);
    route.timeout_ms = Some(200);
    config.proxy.routes.push(route);
    let (service, _state) = gateway!(config);

    let res = call_service(&service, TestRequest::get().uri("/api/reports/slow").to_request()).await;
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

    upstream.stop().await;
}

#[actix_web::test]
async fn test_route_roles_are_enforced() {
    let upstream = upstream::spawn().await;
    let mut config = setup::config();
    let mut route = setup::route("/api/admin", &upstream.base_url, true);
    route.roles = Some(vec!["admin".to_string()]);
    config.proxy.routes.push(route);
    let (service, state) = gateway!(config);

    let guardian = state.guard.login(1, "g@school.cl", "guardian").await.unwrap();
    let admin = state.guard.login(2, "a@school.cl", "admin").await.unwrap();

    let req = TestRequest::get()
        .uri("/api/admin/reports")
        .insert_header(bearer(&guardian.token))
        .to_request();
    let res = call_service(&service, req).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: Value = read_body_json(res).await;
    assert_eq!(body["code"], "FORBIDDEN");

    let req = TestRequest::get()
        .uri("/api/admin/reports")
        .insert_header(bearer(&admin.token))
        .to_request();
    let res = call_service(&service, req).await;
    assert_eq!(res.status(), StatusCode::OK);

    upstream.stop().await;
}
