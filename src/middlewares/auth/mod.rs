mod guard;
mod principal;

pub use guard::{IssuedSession, SessionGuard};
pub use principal::{Principal, require_role};
