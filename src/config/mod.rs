//! Configuration module for the design-to-code backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Path asset cache entries live for 12 hours unless overridden.
pub const DEFAULT_ASSET_CACHE_TTL_SECS: u64 = 12 * 60 * 60;

/// Error raised when an environment variable holds an unparsable value.
#[derive(Debug, thiserror::Error)]
#[error("invalid value for {name}: {value:?}")]
pub struct ConfigError {
    pub name: &'static str,
    pub value: String,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (optional in development)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Primary cache node, e.g. `redis://127.0.0.1:6379`. Unset means an in-process cache.
    pub redis_url: Option<String>,
    /// Directory backing the local blob store
    pub blob_root: PathBuf,
    /// Public base URL under which blob keys are served
    pub blob_public_url: String,
    pub asset_cache_ttl: Duration,
    pub dsl_cache_ttl: Duration,
    pub annotation_cache_ttl: Duration,
    /// Maximum number of memoized redirect connections
    pub redirect_pool_size: usize,
    /// Redirect connections unused for this long are dropped
    pub redirect_idle_timeout: Duration,
    pub worker_concurrency: usize,
    /// Pixel density multiplier applied when rasterizing path nodes
    pub render_scale: f32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let api_psk = env::var("DESIGNCODE_API_PSK").ok();

        let db_path = env::var("DESIGNCODE_DB_PATH")
            .unwrap_or_else(|_| "./data/app.sqlite".to_string())
            .into();

        let bind_addr = parse_var("DESIGNCODE_BIND_ADDR", "127.0.0.1:8080".parse().ok())?;

        let log_level = env::var("DESIGNCODE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let redis_url = env::var("DESIGNCODE_REDIS_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let blob_root = env::var("DESIGNCODE_BLOB_ROOT")
            .unwrap_or_else(|_| "./data/blobs".to_string())
            .into();

        let blob_public_url = env::var("DESIGNCODE_BLOB_PUBLIC_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080/files".to_string());

        Ok(Self {
            api_psk,
            db_path,
            bind_addr,
            log_level,
            redis_url,
            blob_root,
            blob_public_url,
            asset_cache_ttl: Duration::from_secs(parse_var(
                "DESIGNCODE_ASSET_CACHE_TTL_SECS",
                Some(DEFAULT_ASSET_CACHE_TTL_SECS),
            )?),
            dsl_cache_ttl: Duration::from_secs(parse_var("DESIGNCODE_DSL_CACHE_TTL_SECS", Some(3600))?),
            annotation_cache_ttl: Duration::from_secs(parse_var(
                "DESIGNCODE_ANNOTATION_CACHE_TTL_SECS",
                Some(3600),
            )?),
            redirect_pool_size: parse_var("DESIGNCODE_REDIRECT_POOL_SIZE", Some(16))?,
            redirect_idle_timeout: Duration::from_secs(parse_var(
                "DESIGNCODE_REDIRECT_IDLE_SECS",
                Some(300),
            )?),
            worker_concurrency: parse_var("DESIGNCODE_WORKER_CONCURRENCY", Some(2))?,
            render_scale: parse_var("DESIGNCODE_RENDER_SCALE", Some(2.0))?,
        })
    }
}

/// Read and parse an environment variable, falling back to `default` when it is unset.
fn parse_var<T: FromStr>(name: &'static str, default: Option<T>) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError { name, value }),
        Err(_) => default.ok_or(ConfigError {
            name,
            value: String::new(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: &[&str] = &[
        "DESIGNCODE_API_PSK",
        "DESIGNCODE_DB_PATH",
        "DESIGNCODE_BIND_ADDR",
        "DESIGNCODE_LOG_LEVEL",
        "DESIGNCODE_REDIS_URL",
        "DESIGNCODE_BLOB_ROOT",
        "DESIGNCODE_BLOB_PUBLIC_URL",
        "DESIGNCODE_ASSET_CACHE_TTL_SECS",
        "DESIGNCODE_DSL_CACHE_TTL_SECS",
        "DESIGNCODE_ANNOTATION_CACHE_TTL_SECS",
        "DESIGNCODE_REDIRECT_POOL_SIZE",
        "DESIGNCODE_REDIRECT_IDLE_SECS",
        "DESIGNCODE_WORKER_CONCURRENCY",
        "DESIGNCODE_RENDER_SCALE",
    ];

    // Env mutation is process-global, so defaults and overrides share one test.
    #[test]
    fn test_default_and_overridden_config() {
        for var in VARS {
            env::remove_var(var);
        }

        let config = Config::from_env().unwrap();

        assert!(config.api_psk.is_none());
        assert!(config.redis_url.is_none());
        assert_eq!(config.db_path, PathBuf::from("./data/app.sqlite"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.asset_cache_ttl, Duration::from_secs(43_200));
        assert_eq!(config.redirect_pool_size, 16);
        assert_eq!(config.worker_concurrency, 2);

        env::set_var("DESIGNCODE_ASSET_CACHE_TTL_SECS", "60");
        env::set_var("DESIGNCODE_REDIS_URL", "redis://10.0.0.5:6379");
        let config = Config::from_env().unwrap();
        assert_eq!(config.asset_cache_ttl, Duration::from_secs(60));
        assert_eq!(config.redis_url.as_deref(), Some("redis://10.0.0.5:6379"));

        env::set_var("DESIGNCODE_WORKER_CONCURRENCY", "many");
        let err = Config::from_env().unwrap_err();
        assert_eq!(err.name, "DESIGNCODE_WORKER_CONCURRENCY");

        for var in VARS {
            env::remove_var(var);
        }
    }
}
