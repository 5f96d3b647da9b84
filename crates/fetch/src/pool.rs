//! Shared outbound connection pool keyed by `(source, host)`.
//!
//! Each key owns one `reqwest::Client` (its own keep-alive pool) and a
//! semaphore bounding concurrent in-flight requests to that host.

use crate::error::FetchError;
use parking_lot::RwLock;
use portfolio_core::{PoolConfig, SourceId};
use reqwest::{Client, Url};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

type PoolKey = (SourceId, String);

struct PoolEntry {
    client: Client,
    slots: Arc<Semaphore>,
}

/// Leased connection slot; released when dropped.
pub struct PooledConnection {
    client: Client,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }
}

pub struct ConnectionPool {
    config: PoolConfig,
    entries: RwLock<HashMap<PoolKey, Arc<PoolEntry>>>,
}

impl ConnectionPool {
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn max_slots(&self) -> usize {
        self.config.max_connections_per_host.max(1)
    }

    fn build_client(&self) -> Result<Client, FetchError> {
        Client::builder()
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(self.config.idle_timeout_secs))
            .pool_max_idle_per_host(self.max_slots())
            .build()
            .map_err(|e| FetchError::Configuration(format!("failed to build HTTP client: {e}")))
    }

    fn entry(&self, source: &SourceId, host: &str) -> Result<Arc<PoolEntry>, FetchError> {
        let key = (source.clone(), host.to_string());
        if let Some(entry) = self.entries.read().get(&key) {
            return Ok(Arc::clone(entry));
        }

        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(&key) {
            return Ok(Arc::clone(entry));
        }
        debug!(source = %source, host, max_slots = self.max_slots(), "Opening connection pool");
        let entry = Arc::new(PoolEntry {
            client: self.build_client()?,
            slots: Arc::new(Semaphore::new(self.max_slots())),
        });
        entries.insert(key, Arc::clone(&entry));
        Ok(entry)
    }

    /// Leases a slot for `(source, host)`, waiting while all slots are in use.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the HTTP client cannot be built.
    pub async fn acquire(
        &self,
        source: &SourceId,
        host: &str,
    ) -> Result<PooledConnection, FetchError> {
        let entry = self.entry(source, host)?;
        let permit = Arc::clone(&entry.slots)
            .acquire_owned()
            .await
            .map_err(|_| FetchError::unavailable(format!("connection pool for {host} closed")))?;
        Ok(PooledConnection {
            client: entry.client.clone(),
            _permit: permit,
        })
    }

    /// Number of currently leased slots for `(source, host)`.
    #[must_use]
    pub fn in_flight(&self, source: &SourceId, host: &str) -> usize {
        self.entries
            .read()
            .get(&(source.clone(), host.to_string()))
            .map_or(0, |e| self.max_slots() - e.slots.available_permits())
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

/// Extracts `host[:port]` from a URL.
///
/// # Errors
///
/// Returns `Configuration` for unparseable URLs or URLs without a host.
pub fn host_of(url: &str) -> Result<String, FetchError> {
    let parsed =
        Url::parse(url).map_err(|e| FetchError::Configuration(format!("invalid URL {url}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| FetchError::Configuration(format!("URL has no host: {url}")))?;
    Ok(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(max: usize) -> ConnectionPool {
        ConnectionPool::new(PoolConfig {
            max_connections_per_host: max,
            ..PoolConfig::default()
        })
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://www.okx.com/api/v5").unwrap(), "www.okx.com");
        assert_eq!(host_of("http://127.0.0.1:8080/x").unwrap(), "127.0.0.1:8080");
        assert!(matches!(host_of("not a url"), Err(FetchError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_guard_releases_slot_on_drop() {
        let pool = pool(2);
        let source = SourceId::new("okx");

        let first = pool.acquire(&source, "www.okx.com").await.unwrap();
        let second = pool.acquire(&source, "www.okx.com").await.unwrap();
        assert_eq!(pool.in_flight(&source, "www.okx.com"), 2);

        drop(first);
        assert_eq!(pool.in_flight(&source, "www.okx.com"), 1);
        drop(second);
        assert_eq!(pool.in_flight(&source, "www.okx.com"), 0);
    }

    #[tokio::test]
    async fn test_acquire_waits_when_full() {
        let pool = pool(1);
        let source = SourceId::new("okx");
        let _held = pool.acquire(&source, "host").await.unwrap();

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), pool.acquire(&source, "host")).await;
        assert!(blocked.is_err());

        // A different host has its own slots.
        assert!(pool.acquire(&source, "other-host").await.is_ok());
    }

    #[tokio::test]
    async fn test_slot_released_on_error_path() {
        let pool = pool(1);
        let source = SourceId::new("bybit");

        async fn failing_call(pool: &ConnectionPool, source: &SourceId) -> Result<(), FetchError> {
            let _conn = pool.acquire(source, "api.bybit.com").await?;
            Err(FetchError::Network("connection reset".into()))
        }

        assert!(failing_call(&pool, &source).await.is_err());
        assert_eq!(pool.in_flight(&source, "api.bybit.com"), 0);
    }

    #[tokio::test]
    async fn test_slot_released_on_cancellation() {
        let pool = Arc::new(pool(1));
        let source = SourceId::new("okx");

        let task = {
            let pool = Arc::clone(&pool);
            let source = source.clone();
            tokio::spawn(async move {
                let _conn = pool.acquire(&source, "host").await;
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.in_flight(&source, "host"), 1);

        task.abort();
        let _ = task.await;
        assert_eq!(pool.in_flight(&source, "host"), 0);
    }
}
