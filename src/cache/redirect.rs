//! Cluster redirect parsing and the owned pool of redirect-target connections.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use super::{CacheConnection, CacheConnector, CacheError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// Slot moved permanently; retry on the target.
    Moved,
    /// Slot is migrating; the target needs `ASKING` before the retried command.
    Ask,
}

/// A parsed `"<MOVED|ASK> <slot> <host>:<port>"` error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub kind: RedirectKind,
    pub slot: u16,
    pub host: String,
    pub port: u16,
}

impl Redirect {
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split_whitespace();
        let kind = match parts.next()? {
            "MOVED" => RedirectKind::Moved,
            "ASK" => RedirectKind::Ask,
            _ => return None,
        };
        let slot = parts.next()?.parse().ok()?;
        let target = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        // rsplit keeps bracketless IPv6 hosts intact up to the port separator
        let (host, port) = target.rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        Some(Self {
            kind,
            slot,
            host: host.to_string(),
            port: port.parse().ok()?,
        })
    }

    /// Pool key for the redirect target.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn needs_asking(&self) -> bool {
        self.kind == RedirectKind::Ask
    }
}

struct PooledConnection {
    conn: Arc<dyn CacheConnection>,
    last_used: Instant,
}

/// Lazily created secondary connections keyed by `host:port`.
///
/// Bounded: inserting beyond `max_size` evicts the least recently used entry, and entries idle
/// longer than `idle_timeout` are dropped on the next access.
pub struct RedirectPool {
    max_size: usize,
    idle_timeout: Duration,
    entries: Mutex<HashMap<String, PooledConnection>>,
}

impl RedirectPool {
    pub fn new(max_size: usize, idle_timeout: Duration) -> Self {
        Self {
            max_size: max_size.max(1),
            idle_timeout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the memoized connection for `address`, connecting on first use.
    pub async fn acquire(
        &self,
        address: &str,
        connector: &dyn CacheConnector,
    ) -> Result<Arc<dyn CacheConnection>, CacheError> {
        {
            let mut entries = self.entries.lock().await;
            let now = Instant::now();
            self.evict_idle(&mut entries, now);
            if let Some(entry) = entries.get_mut(address) {
                entry.last_used = now;
                return Ok(entry.conn.clone());
            }
        }

        // Connect outside the lock; a concurrent connect to the same target simply replaces it.
        let conn = connector.connect(address).await?;
        tracing::info!("Opened redirect connection to {}", address);

        let mut entries = self.entries.lock().await;
        if !entries.contains_key(address) && entries.len() >= self.max_size {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            if let Some(key) = oldest {
                tracing::debug!("Evicting redirect connection to {}", key);
                entries.remove(&key);
            }
        }
        entries.insert(
            address.to_string(),
            PooledConnection {
                conn: conn.clone(),
                last_used: Instant::now(),
            },
        );
        Ok(conn)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn contains(&self, address: &str) -> bool {
        self.entries.lock().await.contains_key(address)
    }

    fn evict_idle(&self, entries: &mut HashMap<String, PooledConnection>, now: Instant) {
        entries.retain(|address, entry| {
            let keep = now.duration_since(entry.last_used) < self.idle_timeout;
            if !keep {
                tracing::debug!("Dropping idle redirect connection to {}", address);
            }
            keep
        });
    }
}
