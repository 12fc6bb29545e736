//! Single-session login semantics as seen through the gateway

use actix_web::http::StatusCode;
use actix_web::test::{TestRequest, call_service, read_body_json};
use admissions_gateway::config::AuthConfig;
use admissions_gateway::entities::sessions;
use admissions_gateway::security::{Claims, TokenSigner};
use admissions_gateway::testing::{setup, upstream};
use chrono::Utc;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::Barrier;
use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::Value;

use super::bearer;

#[actix_web::test]
async fn test_second_login_invalidates_first_token() {
    let upstream = upstream::spawn().await;
    let mut config = setup::config();
    config
        .proxy
        .routes
        .push(setup::route("/api/applications", &upstream.base_url, true));
    let (service, state) = gateway!(config);

    let first = state.guard.login(5, "ana@school.cl", "guardian").await.unwrap();
    let second = state.guard.login(5, "ana@school.cl", "guardian").await.unwrap();

    let req = TestRequest::get()
        .uri("/api/applications")
        .insert_header(bearer(&first.token))
        .to_request();
    let res = call_service(&service, req).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = read_body_json(res).await;
    assert_eq!(body["code"], "SESSION_INVALIDATED");

    let req = TestRequest::get()
        .uri("/api/applications")
        .insert_header(bearer(&second.token))
        .to_request();
    let res = call_service(&service, req).await;
    assert_eq!(res.status(), StatusCode::OK);

    upstream.stop().await;
}

#[actix_web::test]
async fn test_logout_revokes_own_session() {
    let (service, state) = gateway!(setup::config());
    let session = state.guard.login(5, "ana@school.cl", "guardian").await.unwrap();

    let req = TestRequest::delete()
        .uri("/gateway/session")
        .insert_header(bearer(&session.token))
        .to_request();
    let res = call_service(&service, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = read_body_json(res).await;
    assert_eq!(body["data"]["revoked"], true);

    // The token no longer authenticates, not even for logout
    let req = TestRequest::delete()
        .uri("/gateway/session")
        .insert_header(bearer(&session.token))
        .to_request();
    let res = call_service(&service, req).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = read_body_json(res).await;
    assert_eq!(body["code"], "SESSION_INVALIDATED");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_logins_leave_one_session() {
    // File-backed so the logins run on separate connections and overlap
    let (db, path) = setup::file_database(8).await;
    let state = setup::state_with_database(setup::config(), db).await;
    let start = Arc::new(Barrier::new(8));

    let logins = (0..8).map(|_| {
        let guard = state.guard.clone();
        let start = start.clone();
        tokio::spawn(async move {
            start.wait().await;
            guard.login(9, "ana@school.cl", "guardian").await
        })
    });
    let issued: Vec<_> = join_all(logins)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();
    assert_eq!(issued.len(), 8);

    let rows = sessions::Entity::find()
        .count(state.pool.connection())
        .await
        .unwrap();

    let mut live = 0;
    for session in &issued {
        let header = format!("Bearer {}", session.token);
        if state.guard.authenticate(Some(&header)).await.is_ok() {
            live += 1;
        }
    }

    setup::remove_file_database(&path);
    assert_eq!(rows, 1);
    assert_eq!(live, 1);
}

#[actix_web::test]
async fn test_expired_token_is_rejected_before_session_lookup() {
    let mut config = setup::config();
    config
        .proxy
        .routes
        .push(setup::route("/api/students", &upstream::unreachable(), true));
    let (service, _state) = gateway!(config);

    let now = Utc::now().timestamp();
    let token = TokenSigner::new(&AuthConfig::default())
        .sign(&Claims {
            sub: 5,
            email: "ana@school.cl".to_string(),
            role: "guardian".to_string(),
            iat: now - 7200,
            exp: now - 3600,
            jti: "expired".to_string(),
        })
        .unwrap();

    let req = TestRequest::get()
        .uri("/api/students/5")
        .insert_header(bearer(&token))
        .to_request();
    let res = call_service(&service, req).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = read_body_json(res).await;
    assert_eq!(body["code"], "AUTH_EXPIRED");
}
