use log::{info, warn};
use std::env;
use std::time::Duration;

const DEFAULT_CHAT_URL: &str = "http://localhost:11434/api/chat";
const DEFAULT_DATABASE_URL: &str = "sqlite://chat.db";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_CORS_ORIGINS: &str = "http://localhost:5173";

/// Runtime settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub chat_url: String,
    pub upstream_timeout: Duration,
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Browser origins allowed to call the API; `*` allows any.
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let config = Self {
            chat_url: env_or("OLLAMA_CHAT_URL", DEFAULT_CHAT_URL),
            upstream_timeout: Duration::from_secs(parse_or(
                "UPSTREAM_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )),
            database_url: env_or("DATABASE_URL", DEFAULT_DATABASE_URL),
            host: env_or("HOST", DEFAULT_HOST),
            port: parse_or("PORT", DEFAULT_PORT),
            cors_origins: split_origins(&env_or("CORS_ALLOWED_ORIGINS", DEFAULT_CORS_ORIGINS)),
        };

        info!("Using inference backend at: {}", config.chat_url);
        config
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T: std::str::FromStr + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}, using {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
