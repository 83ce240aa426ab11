//! In-process cache node used for local development and tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{CacheConnection, CacheError};

/// Expiring key-value map standing in for a single cache node.
#[derive(Default)]
pub struct MemoryConnection {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheConnection for MemoryConnection {
    async fn get(&self, key: &str, _asking: bool) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set_ex(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        _asking: bool,
    ) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_expire() {
        let conn = MemoryConnection::new();
        conn.set_ex("a", "1", Duration::from_millis(20), false)
            .await
            .unwrap();
        assert_eq!(conn.get("a", false).await.unwrap().as_deref(), Some("1"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(conn.get("a", false).await.unwrap(), None);
    }
}
