//! Tiered cache client over a clustered key-value store.
//!
//! The cache only ever makes things faster: every failure (outage, malformed redirect, failed
//! retry) is logged and degrades `get` to a miss and `set` to a no-op.

mod cluster;
mod memory;
mod redirect;

pub use cluster::{RedisConnection, RedisConnector};
pub use redirect::RedirectPool;

use memory::MemoryConnection;
use redirect::Redirect;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// Errors raised by a single cache node.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The node answered with a MOVED/ASK redirect; carries `"<TYPE> <slot> <host>:<port>"`.
    #[error("redirect: {0}")]
    Redirect(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// One connection to one cache node.
#[async_trait]
pub trait CacheConnection: Send + Sync {
    /// `asking` prefixes the command with an `ASKING` handshake on the same connection.
    async fn get(&self, key: &str, asking: bool) -> Result<Option<String>, CacheError>;

    async fn set_ex(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        asking: bool,
    ) -> Result<(), CacheError>;
}

/// Opens connections to redirect targets.
#[async_trait]
pub trait CacheConnector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Arc<dyn CacheConnection>, CacheError>;
}

/// Cache client that follows cluster redirects through an owned connection pool.
pub struct TieredCache {
    primary: Arc<dyn CacheConnection>,
    connector: Arc<dyn CacheConnector>,
    redirects: RedirectPool,
}

impl TieredCache {
    pub fn new(
        primary: Arc<dyn CacheConnection>,
        connector: Arc<dyn CacheConnector>,
        redirects: RedirectPool,
    ) -> Self {
        Self {
            primary,
            connector,
            redirects,
        }
    }

    /// In-process cache, used when no cache cluster is configured.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryConnection::new()),
            Arc::new(RedisConnector),
            RedirectPool::new(1, Duration::from_secs(60)),
        )
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        match self.primary.get(key, false).await {
            Ok(value) => value,
            Err(CacheError::Redirect(raw)) => {
                let conn = self.redirect_target(&raw).await?;
                let asking = Redirect::parse(&raw).is_some_and(|r| r.needs_asking());
                match conn.get(key, asking).await {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!("Cache get for {} failed after redirect: {}", key, e);
                        None
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Cache get for {} failed: {}", key, e);
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) {
        match self.primary.set_ex(key, value, ttl, false).await {
            Ok(()) => {}
            Err(CacheError::Redirect(raw)) => {
                let Some(conn) = self.redirect_target(&raw).await else {
                    return;
                };
                let asking = Redirect::parse(&raw).is_some_and(|r| r.needs_asking());
                if let Err(e) = conn.set_ex(key, value, ttl, asking).await {
                    tracing::warn!("Cache set for {} failed after redirect: {}", key, e);
                }
            }
            Err(e) => tracing::warn!("Cache set for {} failed: {}", key, e),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => {
                tracing::debug!("Cache hit for {}", key);
                Some(value)
            }
            Err(e) => {
                tracing::warn!("Discarding undecodable cache entry {}: {}", key, e);
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set(key, &raw, ttl).await,
            Err(e) => tracing::warn!("Skipping cache write for {}: {}", key, e),
        }
    }

    /// Resolve the pooled connection for a redirect error, or `None` when it cannot be followed.
    async fn redirect_target(&self, raw: &str) -> Option<Arc<dyn CacheConnection>> {
        let Some(redirect) = Redirect::parse(raw) else {
            tracing::warn!("Unparsable cache redirect: {}", raw);
            return None;
        };
        tracing::debug!(
            "Following {:?} redirect for slot {} to {}",
            redirect.kind,
            redirect.slot,
            redirect.address()
        );
        match self
            .redirects
            .acquire(&redirect.address(), self.connector.as_ref())
            .await
        {
            Ok(conn) => Some(conn),
            Err(e) => {
                tracing::warn!("Cannot open redirect connection to {}: {}", redirect.address(), e);
                None
            }
        }
    }

    #[cfg(test)]
    pub fn redirect_pool(&self) -> &RedirectPool {
        &self.redirects
    }
}

/// Cache key builders. Every entity has a "latest" key plus a version-qualified key.
pub mod keys {
    pub fn dsl_latest(design_id: &str) -> String {
        format!("design:dsl:{}:latest", design_id)
    }

    pub fn dsl_revision(design_id: &str, revision: i64) -> String {
        format!("design:dsl:{}:rev:{}", design_id, revision)
    }

    pub fn annotation_latest(design_id: &str) -> String {
        format!("annotation:{}:latest", design_id)
    }

    pub fn annotation_version(design_id: &str, version: i64) -> String {
        format!("annotation:{}:v:{}", design_id, version)
    }

    /// Most recently converted path asset.
    pub fn path_asset_latest() -> String {
        "path-asset:latest".to_string()
    }

    pub fn path_asset(digest: &str) -> String {
        format!("path-asset:{}", digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Node that answers every command with a fixed error.
    struct RedirectingConnection {
        error: String,
    }

    #[async_trait]
    impl CacheConnection for RedirectingConnection {
        async fn get(&self, _key: &str, _asking: bool) -> Result<Option<String>, CacheError> {
            Err(CacheError::Redirect(self.error.clone()))
        }

        async fn set_ex(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Duration,
            _asking: bool,
        ) -> Result<(), CacheError> {
            Err(CacheError::Redirect(self.error.clone()))
        }
    }

    struct DownConnection;

    #[async_trait]
    impl CacheConnection for DownConnection {
        async fn get(&self, _key: &str, _asking: bool) -> Result<Option<String>, CacheError> {
            Err(CacheError::Connection("connection refused".into()))
        }

        async fn set_ex(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Duration,
            _asking: bool,
        ) -> Result<(), CacheError> {
            Err(CacheError::Connection("connection refused".into()))
        }
    }

    /// Target node that records whether each command arrived with ASKING.
    #[derive(Default)]
    struct RecordingTarget {
        data: Mutex<HashMap<String, String>>,
        asking_flags: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl CacheConnection for RecordingTarget {
        async fn get(&self, key: &str, asking: bool) -> Result<Option<String>, CacheError> {
            self.asking_flags.lock().unwrap().push(asking);
            Ok(self.data.lock().unwrap().get(key).cloned())
        }

        async fn set_ex(
            &self,
            key: &str,
            value: &str,
            _ttl: Duration,
            asking: bool,
        ) -> Result<(), CacheError> {
            self.asking_flags.lock().unwrap().push(asking);
            self.data
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }
    }

    struct FixedConnector {
        target: Arc<RecordingTarget>,
        connects: AtomicUsize,
        addresses: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CacheConnector for FixedConnector {
        async fn connect(&self, address: &str) -> Result<Arc<dyn CacheConnection>, CacheError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.addresses.lock().unwrap().push(address.to_string());
            Ok(self.target.clone())
        }
    }

    struct RefusingConnector;

    #[async_trait]
    impl CacheConnector for RefusingConnector {
        async fn connect(&self, _address: &str) -> Result<Arc<dyn CacheConnection>, CacheError> {
            Err(CacheError::Connection("no route to host".into()))
        }
    }

    fn redirecting_cache(error: &str) -> (TieredCache, Arc<FixedConnector>) {
        let connector = Arc::new(FixedConnector {
            target: Arc::new(RecordingTarget::default()),
            connects: AtomicUsize::new(0),
            addresses: Mutex::new(Vec::new()),
        });
        let cache = TieredCache::new(
            Arc::new(RedirectingConnection {
                error: error.to_string(),
            }),
            connector.clone(),
            RedirectPool::new(4, Duration::from_secs(60)),
        );
        (cache, connector)
    }

    #[tokio::test]
    async fn test_moved_redirect_retries_on_target() {
        let (cache, connector) = redirecting_cache("MOVED 3999 10.0.0.7:6381");

        cache.set("k", "v", Duration::from_secs(10)).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));

        // one lazily created connection, memoized across both operations
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(connector.addresses.lock().unwrap()[0], "10.0.0.7:6381");
        assert_eq!(*connector.target.asking_flags.lock().unwrap(), vec![false, false]);
        assert!(cache.redirect_pool().contains("10.0.0.7:6381").await);
    }

    #[tokio::test]
    async fn test_ask_redirect_sends_asking() {
        let (cache, connector) = redirecting_cache("ASK 12 10.0.0.8:6382");

        cache.set("k", "v", Duration::from_secs(10)).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        assert_eq!(*connector.target.asking_flags.lock().unwrap(), vec![true, true]);
    }

    #[tokio::test]
    async fn test_malformed_redirect_degrades_to_miss() {
        let (cache, connector) = redirecting_cache("MOVED nonsense");

        cache.set("k", "v", Duration::from_secs(10)).await;
        assert_eq!(cache.get("k").await, None);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unreachable_redirect_target_degrades_to_miss() {
        let cache = TieredCache::new(
            Arc::new(RedirectingConnection {
                error: "MOVED 1 10.0.0.9:6383".to_string(),
            }),
            Arc::new(RefusingConnector),
            RedirectPool::new(4, Duration::from_secs(60)),
        );

        cache.set("k", "v", Duration::from_secs(10)).await;
        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.redirect_pool().len().await, 0);
    }

    #[tokio::test]
    async fn test_outage_degrades_to_miss() {
        let cache = TieredCache::new(
            Arc::new(DownConnection),
            Arc::new(RefusingConnector),
            RedirectPool::new(4, Duration::from_secs(60)),
        );

        cache
            .set_json("k", &serde_json::json!({"a": 1}), Duration::from_secs(10))
            .await;
        assert_eq!(cache.get_json::<serde_json::Value>("k").await, None);
    }

    #[tokio::test]
    async fn test_json_round_trip_and_corrupt_entry() {
        let cache = TieredCache::in_memory();
        cache
            .set_json("k", &vec![1, 2, 3], Duration::from_secs(10))
            .await;
        assert_eq!(cache.get_json::<Vec<i32>>("k").await, Some(vec![1, 2, 3]));

        cache.set("bad", "{not json", Duration::from_secs(10)).await;
        assert_eq!(cache.get_json::<Vec<i32>>("bad").await, None);
    }
}
