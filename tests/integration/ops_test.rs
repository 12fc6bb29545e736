//! Operational endpoints

use actix_web::http::StatusCode;
use actix_web::test::{TestRequest, call_service, read_body, read_body_json};
use admissions_gateway::testing::setup;
use serde_json::Value;

use super::bearer;

#[actix_web::test]
async fn test_health_and_ready() {
    let (service, _state) = gateway!(setup::config());

    let res = call_service(&service, TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = read_body_json(res).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "healthy");

    let res = call_service(&service, TestRequest::get().uri("/ready").to_request()).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = read_body_json(res).await;
    assert_eq!(body["data"]["status"], "ready");
}

#[actix_web::test]
async fn test_gateway_status_lists_routes() {
    let mut config = setup::config();
    config
        .proxy
        .routes
        .push(setup::route("/api/students", "http://127.0.0.1:3003", true));
    config
        .proxy
        .routes
        .push(setup::route("/api/catalog", "http://127.0.0.1:3005", false));
    let (service, _state) = gateway!(config);

    let res = call_service(&service, TestRequest::get().uri("/gateway/status").to_request()).await;
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = read_body_json(res).await;
    assert_eq!(body["data"]["type"], "reverse-proxy-gateway");
    assert_eq!(body["data"]["name"], "admissions-gateway");

    let routes = body["data"]["routes"].as_array().unwrap();
    assert_eq!(routes.len(), 2);
    assert!(routes.iter().any(|r| r["prefix"] == "/api/students" && r["auth_required"] == true));
    assert!(routes.iter().any(|r| r["prefix"] == "/api/catalog" && r["auth_required"] == false));
}

#[actix_web::test]
async fn test_breaker_dashboard_requires_ops_role() {
    let (service, state) = gateway!(setup::config());

    let res = call_service(&service, TestRequest::get().uri("/gateway/breakers").to_request()).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let guardian = state.guard.login(1, "g@school.cl", "guardian").await.unwrap();
    let req = TestRequest::get()
        .uri("/gateway/breakers")
        .insert_header(bearer(&guardian.token))
        .to_request();
    let res = call_service(&service, req).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let admin = state.guard.login(2, "ops@school.cl", "admin").await.unwrap();
    let req = TestRequest::get()
        .uri("/gateway/breakers")
        .insert_header(bearer(&admin.token))
        .to_request();
    let res = call_service(&service, req).await;
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = read_body_json(res).await;
    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|b| b["name"].as_str())
        .collect();
    assert_eq!(names, ["sessions.simple", "sessions.medium", "sessions.write"]);
    assert!(body["data"].as_array().unwrap().iter().all(|b| b["state"] == "CLOSED"));
}

#[actix_web::test]
async fn test_metrics_exposition() {
    let (service, _state) = gateway!(setup::config());

    call_service(&service, TestRequest::get().uri("/health").to_request()).await;

    let res = call_service(&service, TestRequest::get().uri("/metrics").to_request()).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(
        res.headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );

    let body = read_body(res).await;
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("http_requests_total"));
}
