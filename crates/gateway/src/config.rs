//! Typed environment configuration. Loaded once at startup; nothing here
//! re-reads the environment after `Config::from_env()` returns.

use std::env;
use std::time::Duration;

use gateway_protocol::{
    DEFAULT_AUTH_TIMEOUT_MS, DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_RATE_LIMIT_MAX,
    DEFAULT_RATE_LIMIT_WINDOW_MS,
};
use secrecy::SecretString;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// The three key-source modes the token verifier tries in order.
#[derive(Clone)]
pub struct JwtConfig {
    pub public_key_pem: Option<String>,
    pub hs256_secret: Option<SecretString>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub idp_base_url: Option<String>,
    pub idp_realm: Option<String>,
}

#[derive(Clone)]
pub struct Config {
    pub bind_addr: String,
    pub redis_url: String,
    pub jwt: JwtConfig,
    pub rate_limit_window: Duration,
    pub rate_limit_max: u64,
    pub auth_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub game_service_url: String,
    pub player_service_url: String,
    pub event_service_url: String,
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8080"),
            redis_url: require("REDIS_URL")?,
            jwt: JwtConfig {
                public_key_pem: optional("JWT_PUBLIC_KEY"),
                hs256_secret: optional("JWT_HS256_SECRET").map(SecretString::from),
                issuer: optional("JWT_ISSUER"),
                audience: optional("JWT_AUDIENCE"),
                idp_base_url: optional("JWT_IDP_BASE_URL"),
                idp_realm: optional("JWT_IDP_REALM"),
            },
            rate_limit_window: Duration::from_millis(env_u64(
                "WS_RATE_LIMIT_WINDOW_MS",
                DEFAULT_RATE_LIMIT_WINDOW_MS,
            )?),
            rate_limit_max: env_u64("WS_RATE_LIMIT_MAX", DEFAULT_RATE_LIMIT_MAX)?,
            auth_timeout: Duration::from_millis(env_u64(
                "WS_AUTH_TIMEOUT_MS",
                DEFAULT_AUTH_TIMEOUT_MS,
            )?),
            heartbeat_interval: Duration::from_millis(env_u64(
                "WS_HEARTBEAT_INTERVAL_MS",
                DEFAULT_HEARTBEAT_INTERVAL_MS,
            )?),
            game_service_url: require("GAME_SERVICE_URL")?,
            player_service_url: require("PLAYER_SERVICE_URL")?,
            event_service_url: require("EVENT_SERVICE_URL")?,
            log_format: match env_or("LOG_FORMAT", "pretty").as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(ConfigError::Invalid {
                        name: "LOG_FORMAT",
                        value: other.to_string(),
                    });
                }
            },
        })
    }
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_or(name: &'static str, default: &str) -> String {
    optional(name).unwrap_or_else(|| default.to_string())
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn env_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    parse_u64_default(optional(name), default, name)
}

fn parse_u64_default(
    raw: Option<String>,
    default: u64,
    name: &'static str,
) -> Result<u64, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
    }
}
