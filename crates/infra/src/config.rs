//! Process configuration from the environment.
//!
//! `.env.{ENVIRONMENT}` (or plain `.env`) is loaded first when present; real
//! environment variables always win over file values.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `LOG_LEVEL` | `info` |
//! | `DATABASE_URL`, else `DATABASE_{USERNAME,PASSWORD,HOST,PORT,NAME}` | required |
//! | `REDIS_URL`, else `REDIS_{HOST,PORT,PASSWORD,DATABASE}` | `redis://localhost:6379/0` |
//! | `MEILISEARCH_{HOST,PORT,MASTER_KEY}` | `http://localhost:7700`, no key |
//! | `MEILISEARCH_INDEX` | `orders` |
//! | `LOCK_TTL_MS` | `5000` |
//! | `PROJECTOR_QUEUE` | `1024` |
//! | `BIND_ADDR` | `0.0.0.0:8080` |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::lock::DEFAULT_LEASE_TTL;
use crate::workers::DEFAULT_QUEUE_CAPACITY;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeilisearchConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub index: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub log_level: String,
    pub database_url: String,
    pub redis_url: String,
    pub meilisearch: MeilisearchConfig,
    pub lock_ttl: Duration,
    pub projector_queue: usize,
    pub bind_addr: String,
}

impl Config {
    /// Load dotenv files, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let lock_ttl_ms: u64 = env.parse_or("LOCK_TTL_MS", DEFAULT_LEASE_TTL.as_millis() as u64)?;
        if lock_ttl_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "LOCK_TTL_MS",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            log_level: env.get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            database_url: database_url(&env)?,
            redis_url: redis_url(&env)?,
            meilisearch: MeilisearchConfig {
                url: meilisearch_url(&env)?,
                api_key: env.get("MEILISEARCH_MASTER_KEY"),
                index: env.get("MEILISEARCH_INDEX").unwrap_or_else(|| "orders".to_string()),
            },
            lock_ttl: Duration::from_millis(lock_ttl_ms),
            projector_queue: env.parse_or("PROJECTOR_QUEUE", DEFAULT_QUEUE_CAPACITY)?,
            bind_addr: env.get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.trim().is_empty())
    }

    fn parse_or<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: format!("{raw:?}: {e}"),
            }),
        }
    }
}

fn database_url<F>(env: &Env<F>) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = env.get("DATABASE_URL") {
        return Ok(url);
    }
    let host = env.get("DATABASE_HOST").ok_or(ConfigError::Missing("DATABASE_URL"))?;
    let port: u16 = env.parse_or("DATABASE_PORT", 5432)?;
    let user = env.get("DATABASE_USERNAME").ok_or(ConfigError::Missing("DATABASE_USERNAME"))?;
    let name = env.get("DATABASE_NAME").ok_or(ConfigError::Missing("DATABASE_NAME"))?;
    let credentials = match env.get("DATABASE_PASSWORD") {
        Some(password) => format!("{user}:{password}"),
        None => user,
    };
    Ok(format!("postgres://{credentials}@{host}:{port}/{name}"))
}

fn redis_url<F>(env: &Env<F>) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = env.get("REDIS_URL") {
        return Ok(url);
    }
    let host = env.get("REDIS_HOST").unwrap_or_else(|| "localhost".to_string());
    let port: u16 = env.parse_or("REDIS_PORT", 6379)?;
    let database: u32 = env.parse_or("REDIS_DATABASE", 0)?;
    Ok(match env.get("REDIS_PASSWORD") {
        Some(password) => format!("redis://:{password}@{host}:{port}/{database}"),
        None => format!("redis://{host}:{port}/{database}"),
    })
}

fn meilisearch_url<F>(env: &Env<F>) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let host = env
        .get("MEILISEARCH_HOST")
        .unwrap_or_else(|| "http://localhost".to_string());
    let host = if host.contains("://") {
        host
    } else {
        format!("http://{host}")
    };
    let port: u16 = env.parse_or("MEILISEARCH_PORT", 7700)?;
    Ok(format!("{}:{}", host.trim_end_matches('/'), port))
}

/// Load `.env.{ENVIRONMENT}`, falling back to `.env`. Missing files are fine.
fn load_dotenv() {
    if let Ok(environment) = std::env::var("ENVIRONMENT") {
        match dotenvy::from_filename(format!(".env.{environment}")) {
            Ok(_) => return,
            Err(err) if err.not_found() => {}
            Err(err) => eprintln!("ignoring unreadable .env.{environment}: {err}"),
        }
    }
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            eprintln!("ignoring unreadable .env: {err}");
        }
    }
}
