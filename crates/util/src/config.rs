use std::{env, fmt, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use super::server_bind_address;

pub const DEFAULT_DATABASE_PATH: &str = "domains.db";
pub const DEFAULT_BOT_API_BASE_URL: &str = "https://api.telegram.org/";
pub const DEFAULT_DNS_SERVER: &str = "8.8.8.8:53";
pub const DEFAULT_DNS_RETRIES: u32 = 3;
pub const DEFAULT_RATE_LIMIT_MAX_ATTEMPTS: u32 = 300;
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_WAL_CHECKPOINT_INTERVAL_SECS: u64 = 5 * 60;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Attempt quota applied per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window: Duration,
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_path: PathBuf,
    pub bot_token: String,
    pub bot_api_base_url: String,
    /// Optional HTTP proxy for Bot API traffic only; DNS checks never use it.
    pub bot_http_proxy_url: Option<String>,
    pub publish_chat_id: String,
    pub rate_limit: RateLimitConfig,
    pub dns_server: SocketAddr,
    pub dns_retries: u32,
    pub wal_checkpoint_interval: Duration,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let database_path = env::var("DATABASE_PATH")
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string())
            .into();
        let bot_token = required("BOT_TOKEN")?;
        let publish_chat_id = required("PUBLISH_CHAT_ID")?;
        let bot_api_base_url =
            env::var("BOT_API_BASE_URL").unwrap_or_else(|_| DEFAULT_BOT_API_BASE_URL.to_string());
        let bot_http_proxy_url = env::var("BOT_HTTP_PROXY_URL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let max_attempts: u32 =
            parse_or("RATE_LIMIT_MAX_ATTEMPTS", DEFAULT_RATE_LIMIT_MAX_ATTEMPTS)?;
        if max_attempts == 0 {
            return Err(ConfigError::MustBePositive("RATE_LIMIT_MAX_ATTEMPTS"));
        }
        let window_secs: u64 = parse_or("RATE_LIMIT_WINDOW_SECS", DEFAULT_RATE_LIMIT_WINDOW_SECS)?;
        if window_secs == 0 {
            return Err(ConfigError::MustBePositive("RATE_LIMIT_WINDOW_SECS"));
        }

        let dns_server = env::var("DNS_SERVER")
            .unwrap_or_else(|_| DEFAULT_DNS_SERVER.to_string())
            .parse()
            .map_err(ConfigError::DnsServer)?;
        let dns_retries = parse_or("DNS_RETRIES", DEFAULT_DNS_RETRIES)?;

        let checkpoint_secs: u64 = parse_or(
            "WAL_CHECKPOINT_INTERVAL_SECS",
            DEFAULT_WAL_CHECKPOINT_INTERVAL_SECS,
        )?;
        if checkpoint_secs == 0 {
            return Err(ConfigError::MustBePositive("WAL_CHECKPOINT_INTERVAL_SECS"));
        }

        Ok(Self {
            bind_addr,
            environment,
            database_path,
            bot_token,
            bot_api_base_url,
            bot_http_proxy_url,
            publish_chat_id,
            rate_limit: RateLimitConfig {
                max_attempts,
                window: Duration::from_secs(window_secs),
            },
            dns_server,
            dns_retries,
            wal_checkpoint_interval: Duration::from_secs(checkpoint_secs),
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
            name,
            value,
        }),
        Err(_) => Ok(default),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    DnsServer(std::net::AddrParseError),
    Missing(&'static str),
    InvalidNumber { name: &'static str, value: String },
    MustBePositive(&'static str),
    NonUtcTimezone(Option<String>),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::DnsServer(err) => write!(f, "invalid DNS_SERVER value: {err}"),
            Self::Missing(name) => write!(f, "required environment variable '{name}' is not set"),
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a non-negative integer (got {value})")
            }
            Self::MustBePositive(name) => write!(f, "{name} must be greater than zero"),
            Self::NonUtcTimezone(Some(value)) => {
                write!(f, "TZ environment variable must be set to UTC (got {value})")
            }
            Self::NonUtcTimezone(None) => write!(f, "TZ environment variable must be set to UTC"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ENV_GUARD;
    use crate::DEFAULT_BIND_ADDR;

    const VARS: &[&str] = &[
        "APP_ENV",
        "APP_BIND_ADDR",
        "DATABASE_PATH",
        "BOT_TOKEN",
        "PUBLISH_CHAT_ID",
        "BOT_API_BASE_URL",
        "BOT_HTTP_PROXY_URL",
        "RATE_LIMIT_MAX_ATTEMPTS",
        "RATE_LIMIT_WINDOW_SECS",
        "DNS_SERVER",
        "DNS_RETRIES",
        "WAL_CHECKPOINT_INTERVAL_SECS",
    ];

    fn reset_env() {
        for name in VARS {
            env::remove_var(name);
        }
        env::set_var("BOT_TOKEN", "123:abc");
        env::set_var("PUBLISH_CHAT_ID", "-100200300");
    }

    #[test]
    fn loads_defaults_in_development() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        reset_env();

        let config = AppConfig::from_env().expect("config should load with defaults");
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.database_path, PathBuf::from(DEFAULT_DATABASE_PATH));
        assert_eq!(config.rate_limit.max_attempts, 300);
        assert_eq!(config.rate_limit.window, Duration::from_secs(86_400));
        assert_eq!(config.dns_server.to_string(), DEFAULT_DNS_SERVER);
        assert_eq!(config.dns_retries, 3);
        assert_eq!(config.bot_api_base_url, DEFAULT_BOT_API_BASE_URL);
        assert_eq!(config.bot_http_proxy_url, None);
        assert_eq!(config.wal_checkpoint_interval, Duration::from_secs(300));
    }

    #[test]
    fn rejects_invalid_environment() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        reset_env();
        env::set_var("APP_ENV", "invalid");

        let err = AppConfig::from_env().expect_err("invalid env should error");
        assert!(matches!(err, ConfigError::InvalidEnvironment(value) if value == "invalid"));

        env::remove_var("APP_ENV");
    }

    #[test]
    fn requires_bot_token() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        reset_env();
        env::remove_var("BOT_TOKEN");

        let err = AppConfig::from_env().expect_err("missing token should error");
        assert!(matches!(err, ConfigError::Missing("BOT_TOKEN")));
    }

    #[test]
    fn parses_rate_limit_overrides() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        reset_env();
        env::set_var("APP_ENV", "production");
        env::set_var("RATE_LIMIT_MAX_ATTEMPTS", "5");
        env::set_var("RATE_LIMIT_WINDOW_SECS", "60");
        env::set_var("DNS_RETRIES", "0");

        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(
            config.rate_limit,
            RateLimitConfig {
                max_attempts: 5,
                window: Duration::from_secs(60),
            }
        );
        assert_eq!(config.dns_retries, 0);
    }

    #[test]
    fn rejects_zero_attempt_quota() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        reset_env();
        env::set_var("RATE_LIMIT_MAX_ATTEMPTS", "0");

        let err = AppConfig::from_env().expect_err("zero quota should error");
        assert!(matches!(err, ConfigError::MustBePositive("RATE_LIMIT_MAX_ATTEMPTS")));
    }

    #[test]
    fn rejects_unparsable_numbers() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        reset_env();
        env::set_var("RATE_LIMIT_WINDOW_SECS", "a day");

        let err = AppConfig::from_env().expect_err("bad number should error");
        assert!(matches!(
            err,
            ConfigError::InvalidNumber { name: "RATE_LIMIT_WINDOW_SECS", .. }
        ));
    }

    #[test]
    fn reads_optional_bot_proxy() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        reset_env();
        env::set_var("BOT_HTTP_PROXY_URL", " http://127.0.0.1:8118 ");

        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(
            config.bot_http_proxy_url.as_deref(),
            Some("http://127.0.0.1:8118")
        );

        env::set_var("BOT_HTTP_PROXY_URL", "");
        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(config.bot_http_proxy_url, None, "empty value disables the proxy");

        env::remove_var("BOT_HTTP_PROXY_URL");
    }
}
