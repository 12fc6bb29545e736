pub mod breaker_test;
pub mod config_test;
