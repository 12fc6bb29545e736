pub mod session;

pub use session::{DatabaseSessionStore, SessionStore};
