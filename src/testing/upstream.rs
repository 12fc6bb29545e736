//! Throwaway upstream services bound to ephemeral ports
//!
//! The echo service answers every request with a JSON description of what
//! it received, so tests can assert on what the gateway forwarded.

use std::net::TcpListener;
use std::time::Duration;

use actix_web::dev::ServerHandle;
use actix_web::http::StatusCode;
use actix_web::web::{Bytes, Path};
use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
use serde_json::{Map, Value, json};

pub struct Upstream {
    pub base_url: String,
    handle: ServerHandle,
}

impl Upstream {
    pub async fn stop(self) {
        self.handle.stop(false).await;
    }
}

async fn echo(req: HttpRequest, body: Bytes) -> HttpResponse {
    let headers: Map<String, Value> = req
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), Value::String(value.to_string())))
        })
        .collect();

    HttpResponse::Ok()
        .insert_header(("x-upstream", "echo"))
        .json(json!({
            "method": req.method().as_str(),
            "path": req.path(),
            "query": req.query_string(),
            "headers": headers,
            "body": String::from_utf8_lossy(&body),
        }))
}

async fn status(code: Path<u16>) -> HttpResponse {
    let status = StatusCode::from_u16(code.into_inner()).unwrap_or(StatusCode::BAD_REQUEST);
    HttpResponse::build(status).json(json!({ "status": status.as_u16() }))
}

async fn slow() -> HttpResponse {
    actix_web::rt::time::sleep(Duration::from_secs(2)).await;
    HttpResponse::Ok().finish()
}

/// Start an echo upstream on 127.0.0.1 with an OS-assigned port
///
/// `/status/{code}` answers with that status and `/slow` waits two seconds;
/// every other path echoes the request.
pub async fn spawn() -> Upstream {
    let server = HttpServer::new(|| {
        App::new()
            .route("/status/{code}", web::to(status))
            .route("/slow", web::to(slow))
            .default_service(web::to(echo))
    })
    .workers(1)
    .disable_signals()
    .bind(("127.0.0.1", 0))
    .expect("Failed to bind upstream");

    let port = server.addrs()[0].port();
    let server = server.run();
    let handle = server.handle();
    actix_web::rt::spawn(server);

    Upstream {
        base_url: format!("http://127.0.0.1:{}", port),
        handle,
    }
}

/// A base URL nothing is listening on
pub fn unreachable() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to reserve a port");
    let port = listener
        .local_addr()
        .expect("Reserved port has no address")
        .port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}
