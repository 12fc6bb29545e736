//! Reverse proxy: route table, upstream transport and the catch-all handler

pub mod forwarder;
pub mod handler;
pub mod routes;

pub use forwarder::{Forwarder, Transport, UpstreamTls, X_USER_EMAIL, X_USER_ID, X_USER_ROLE};
pub use handler::proxy;
pub use routes::{Route, RouteMatch, RouteTable};
