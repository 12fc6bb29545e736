//! Configuration loading and validation

use admissions_gateway::config::*;
use serial_test::serial;
use std::env;

mod utils {
    /// Remove every GATEWAY-prefixed variable and APP_ENV
    pub fn clean_env_vars() {
        let keys: Vec<String> = std::env::vars()
            .filter(|(k, _)| k.starts_with("GATEWAY"))
            .map(|(k, _)| k)
            .collect();

        for key in keys {
            unsafe { std::env::remove_var(&key) };
        }
        unsafe { std::env::remove_var("APP_ENV") };
    }
}

// =============================================================================
// Loading
// =============================================================================

#[test]
#[serial]
fn test_load_default_file() {
    utils::clean_env_vars();

    let config = load().unwrap();

    assert_eq!(config.app.name, "admissions-gateway");
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.auth.token_expiration, 28800);
    assert_eq!(config.security.cors.origins, vec!["http://localhost:3000"]);
    assert_eq!(config.security.rate_limit.backend, RateLimitBackend::Local);

    let auth_tier = config.security.rate_limit.tiers["auth"];
    assert_eq!(auth_tier.requests, 10);
    assert_eq!(auth_tier.window_secs, 60);

    assert_eq!(config.resilience.breakers.simple.timeout_ms, 2000);
    assert_eq!(config.resilience.breakers.write.error_threshold_percentage, 30);
    assert_eq!(config.resilience.breakers.medium.reset_timeout_ms, 30000);
    assert_eq!(config.resilience.window.volume_threshold, 10);

    let admin = config
        .proxy
        .routes
        .iter()
        .find(|route| route.prefix == "/api/admin")
        .unwrap();
    assert!(admin.auth_required);
    assert_eq!(admin.roles.as_deref(), Some(&["admin".to_string()][..]));

    let login = config
        .proxy
        .routes
        .iter()
        .find(|route| route.prefix == "/api/auth")
        .unwrap();
    assert!(!login.auth_required);
    assert_eq!(login.rate_limit_tier, "auth");
}

#[test]
#[serial]
fn test_environment_variable_override() {
    utils::clean_env_vars();

    unsafe {
        env::set_var("GATEWAY__SERVER__PORT", "9090");
        env::set_var("GATEWAY__APP__NAME", "gateway-canary");
        env::set_var("GATEWAY__AUTH__TOKEN_EXPIRATION", "3600");
        env::set_var("GATEWAY__SECURITY__RATE_LIMIT__ENABLED", "false");
    }

    let result = load();
    utils::clean_env_vars();
    let config = result.unwrap();

    assert_eq!(config.server.port, 9090);
    assert_eq!(config.app.name, "gateway-canary");
    assert_eq!(config.auth.token_expiration, 3600);
    assert!(!config.security.rate_limit.enabled);
}

#[test]
#[serial]
fn test_missing_environment_file_is_ignored() {
    utils::clean_env_vars();
    unsafe { env::set_var("APP_ENV", "nonexistent-environment") };

    let result = load();
    utils::clean_env_vars();

    assert_eq!(result.unwrap().server.port, 8080);
}

#[test]
#[serial]
fn test_invalid_override_fails_validation() {
    utils::clean_env_vars();
    unsafe { env::set_var("GATEWAY__AUTH__JWT_SECRET", "short") };

    let result = load();
    utils::clean_env_vars();

    match result {
        Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("jwt_secret")),
        other => panic!("Expected ValidationError, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_single_breaker_field_override() {
    let config: AppConfig = ::config::Config::builder()
        .add_source(::config::File::from_str(
            "[resilience.breakers.write]\ntimeout_ms = 1000\n\n[resilience.breakers.simple]\nerror_threshold_percentage = 75\n",
            ::config::FileFormat::Toml,
        ))
        .build()
        .unwrap()
        .try_deserialize()
        .unwrap();

    let breakers = config.resilience.breakers;
    assert_eq!(breakers.write.timeout_ms, 1000);
    assert_eq!(breakers.write.error_threshold_percentage, 30);
    assert_eq!(breakers.write.reset_timeout_ms, 45000);
    assert_eq!(breakers.simple.timeout_ms, 2000);
    assert_eq!(breakers.simple.error_threshold_percentage, 75);
    assert_eq!(breakers.medium, BreakersConfig::default().medium);
    assert!(config.resilience.validate().is_ok());
}

// =============================================================================
// Validation
// =============================================================================

fn route(prefix: &str, upstream: &str) -> RouteConfig {
    RouteConfig {
        prefix: prefix.to_string(),
        upstream: upstream.to_string(),
        auth_required: true,
        rate_limit_tier: "default".to_string(),
        roles: None,
        timeout_ms: None,
    }
}

fn assert_invalid(config: &AppConfig, needle: &str) {
    match config.validate() {
        Err(ConfigError::ValidationError(msg)) => {
            assert!(msg.contains(needle), "'{}' does not mention '{}'", msg, needle)
        }
        other => panic!("Expected ValidationError mentioning '{}', got {:?}", needle, other),
    }
}

#[test]
fn test_wildcard_origin_is_rejected() {
    let mut config = AppConfig::default();
    config.security.cors.origins = vec!["*".to_string()];
    assert_invalid(&config, "security.cors.origins");
}

#[test]
fn test_disabled_cors_skips_origin_checks() {
    let mut config = AppConfig::default();
    config.security.cors.enabled = false;
    config.security.cors.origins.clear();
    assert!(config.validate().is_ok());
}

#[test]
fn test_default_tier_is_required() {
    let mut config = AppConfig::default();
    config.security.rate_limit.tiers.remove("default");
    assert_invalid(&config, "'default' tier");
}

#[test]
fn test_zero_request_tier_is_rejected() {
    let mut config = AppConfig::default();
    config.security.rate_limit.tiers.insert(
        "burst".to_string(),
        RateLimitTier {
            requests: 0,
            window_secs: 1,
        },
    );
    assert_invalid(&config, "tiers.burst.requests");
}

#[test]
fn test_redis_backend_requires_url() {
    let mut config = AppConfig::default();
    config.security.rate_limit.backend = RateLimitBackend::Redis;
    config.security.rate_limit.redis_url = None;
    assert_invalid(&config, "redis_url");
}

#[test]
fn test_route_validation() {
    let mut config = AppConfig::default();
    config.proxy.routes.push(route("api/students", "http://127.0.0.1:3003"));
    assert_invalid(&config, "must start with '/'");

    let mut config = AppConfig::default();
    config.proxy.routes.push(route("/api/students", "ftp://files"));
    assert_invalid(&config, "http or https");

    let mut config = AppConfig::default();
    config.proxy.routes.push(route("/api/students", "http://127.0.0.1:3003"));
    config.proxy.routes.push(route("/api/students/", "http://127.0.0.1:3004"));
    assert_invalid(&config, "duplicate prefix");

    let mut config = AppConfig::default();
    let mut public = route("/api/catalog", "http://127.0.0.1:3005");
    public.auth_required = false;
    public.roles = Some(vec!["admin".to_string()]);
    config.proxy.routes.push(public);
    assert_invalid(&config, "requires auth_required");
}

#[test]
fn test_breaker_threshold_over_100_is_rejected() {
    let mut config = AppConfig::default();
    config.resilience.breakers.simple.error_threshold_percentage = 150;
    assert!(config.validate().is_err());
}

#[test]
fn test_ops_roles_cannot_be_empty() {
    let mut config = AppConfig::default();
    config.ops.roles.clear();
    assert_invalid(&config, "ops.roles");
}
