//! End-to-end tests through `router::app`

/// Build the gateway for `$config` over a fresh database
///
/// Expands to `(service, state)`.
macro_rules! gateway {
    ($config:expr) => {{
        let state = admissions_gateway::testing::setup::state($config).await;
        let service =
            actix_web::test::init_service(admissions_gateway::router::app(state.clone())).await;
        (service, state)
    }};
}

pub mod gate_test;
pub mod ops_test;
pub mod proxy_test;
pub mod session_test;

pub fn bearer(token: &str) -> (&'static str, String) {
    ("authorization", format!("Bearer {}", token))
}
