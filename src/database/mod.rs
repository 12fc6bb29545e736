//! Session-store access with circuit breaker integration

mod pool;

pub use pool::{DatabaseError, DatabasePool, connect};
