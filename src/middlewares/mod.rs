pub mod auth;
pub mod request_id;

pub use auth::{IssuedSession, Principal, SessionGuard, require_role};
pub use request_id::{RequestId, RequestIdMiddleware, X_REQUEST_ID};
