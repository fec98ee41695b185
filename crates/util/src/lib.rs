pub mod config;

use std::{env, net::SocketAddr, path::Path};

pub use config::{AppConfig, ConfigError, Environment, RateLimitConfig};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Loads environment variables from `.env` (or the file named by `ENV_FILE`) when available.
///
/// Missing files are ignored so the function is safe in production builds
/// where dotenv files are not deployed.
pub fn load_env_file() {
    match env::var("ENV_FILE") {
        Ok(path) if !path.is_empty() => {
            let _ = dotenvy::from_path(Path::new(&path));
        }
        _ => {
            let _ = dotenvy::dotenv();
        }
    }
}

/// Returns the address the ops HTTP server should bind to.
///
/// The value is resolved from the `APP_BIND_ADDR` environment variable and
/// falls back to [`DEFAULT_BIND_ADDR`] when the variable is not set.
pub fn server_bind_address() -> Result<SocketAddr, std::net::AddrParseError> {
    let value = env::var("APP_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    value.parse()
}

/// Refuses to continue unless the process time zone is `UTC`.
///
/// Rate-limit windows are stored as unix seconds and compared against the
/// wall clock, so the process must agree with the store on what "now" is.
pub fn ensure_utc_timezone() -> Result<(), ConfigError> {
    match env::var("TZ") {
        Ok(value) if value == "UTC" => Ok(()),
        Ok(value) => Err(ConfigError::NonUtcTimezone(Some(value))),
        Err(_) => Err(ConfigError::NonUtcTimezone(None)),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ENV_GUARD;
    use std::env;

    #[test]
    fn returns_default_address_when_env_missing() {
        let _lock = ENV_GUARD.lock().expect("env guard poisoned");
        env::remove_var("APP_BIND_ADDR");
        let addr = server_bind_address().expect("default address is valid");
        assert_eq!(addr.to_string(), DEFAULT_BIND_ADDR);
    }

    #[test]
    fn parses_custom_address_from_env() {
        let _lock = ENV_GUARD.lock().expect("env guard poisoned");
        env::set_var("APP_BIND_ADDR", "0.0.0.0:9000");
        let addr = server_bind_address().expect("custom address should parse");
        assert_eq!(addr.to_string(), "0.0.0.0:9000");
        env::remove_var("APP_BIND_ADDR");
    }

    #[test]
    fn utc_timezone_is_accepted() {
        let _lock = ENV_GUARD.lock().expect("env guard poisoned");
        env::set_var("TZ", "UTC");
        ensure_utc_timezone().expect("UTC is accepted");
    }

    #[test]
    fn other_timezones_are_fatal() {
        let _lock = ENV_GUARD.lock().expect("env guard poisoned");
        env::set_var("TZ", "Asia/Tehran");
        let err = ensure_utc_timezone().expect_err("non-UTC must fail");
        assert!(matches!(err, ConfigError::NonUtcTimezone(Some(ref tz)) if tz == "Asia/Tehran"));

        env::remove_var("TZ");
        let err = ensure_utc_timezone().expect_err("unset TZ must fail");
        assert!(matches!(err, ConfigError::NonUtcTimezone(None)));
        env::set_var("TZ", "UTC");
    }
}
