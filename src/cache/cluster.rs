//! Cache node connections backed by the `redis` crate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{ErrorKind, RedisError};

use super::{CacheConnection, CacheConnector, CacheError};

impl From<RedisError> for CacheError {
    fn from(err: RedisError) -> Self {
        match err.kind() {
            ErrorKind::Moved | ErrorKind::Ask => CacheError::Redirect(format!(
                "{} {}",
                err.code().unwrap_or_default(),
                err.detail().unwrap_or_default()
            )),
            ErrorKind::IoError => CacheError::Connection(err.to_string()),
            _ => CacheError::Protocol(err.to_string()),
        }
    }
}

/// A multiplexed connection to a single cache node.
#[derive(Clone)]
pub struct RedisConnection {
    conn: MultiplexedConnection,
}

impl RedisConnection {
    /// Connect to `url`, e.g. `redis://127.0.0.1:6379`.
    pub async fn open(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheConnection for RedisConnection {
    async fn get(&self, key: &str, asking: bool) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        if asking {
            // ASKING only applies to the next command on the same connection, so pipeline both.
            let (value,): (Option<String>,) = redis::pipe()
                .cmd("ASKING")
                .ignore()
                .cmd("GET")
                .arg(key)
                .query_async(&mut conn)
                .await?;
            return Ok(value);
        }
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_ex(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        asking: bool,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let ttl_secs = ttl.as_secs().max(1);
        if asking {
            let _: () = redis::pipe()
                .cmd("ASKING")
                .ignore()
                .cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl_secs)
                .ignore()
                .query_async(&mut conn)
                .await?;
            return Ok(());
        }
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

/// Opens [`RedisConnection`]s to `host:port` redirect targets.
pub struct RedisConnector;

#[async_trait]
impl CacheConnector for RedisConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn CacheConnection>, CacheError> {
        let conn = RedisConnection::open(&format!("redis://{}", address)).await?;
        Ok(Arc::new(conn))
    }
}
